use agentd_core_dependency::{EngineError, TaskWorker, Worker};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Calls a function right away and then once every period until killed.
///
/// An error returned by the call stops the worker with that error; calls that should survive failures
/// handle them before returning.
pub struct PeriodicWorker {
    inner: TaskWorker,
}

impl PeriodicWorker {
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut call: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let inner = TaskWorker::spawn(name, move |token| async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                trace!(name = %task_name, "Periodic call");
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = call() => result.map_err(EngineError::from)?,
                }
            }
            debug!(name = %task_name, "Periodic worker stopped");
            Ok(())
        });
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }
}

#[async_trait]
impl Worker for PeriodicWorker {
    fn kill(&self) {
        self.inner.kill()
    }

    async fn wait(&self) -> Result<(), EngineError> {
        self.inner.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::eyre;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_calls_every_period() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let worker = PeriodicWorker::spawn("ticker", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        worker.kill();
        assert!(worker.wait().await.is_ok());
        assert_eq!(worker.name(), "ticker");
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_error_stops_worker() {
        let worker = PeriodicWorker::spawn("failing", Duration::from_secs(10), || async { Err(eyre!("api unreachable")) });
        let err = worker.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "api unreachable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_interrupts_slow_call() {
        let worker = PeriodicWorker::spawn("slow", Duration::from_secs(10), || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        worker.kill();
        let started = tokio::time::Instant::now();
        assert!(worker.wait().await.is_ok());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
