use agentd_core_dependency::{Context, EngineError, Manifold, TaskWorker, Worker};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tracing::{error, info};

/// Waits for a termination signal and then asks the engine to shut the whole agent down.
pub struct TerminationWorker {
    inner: TaskWorker,
}

impl TerminationWorker {
    /// Listens for SIGTERM (unix) and Ctrl-C.
    pub fn new() -> Self {
        Self::with_signal(shutdown_signal())
    }

    /// Terminates the agent once `signal` resolves.
    pub fn with_signal<F>(signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = TaskWorker::spawn("termination", move |token| async move {
            tokio::select! {
                _ = token.cancelled() => Ok(()),
                _ = signal => {
                    info!("Termination signal received");
                    Err(EngineError::TerminateAgent)
                }
            }
        });
        Self { inner }
    }
}

impl Default for TerminationWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for TerminationWorker {
    fn kill(&self) {
        self.inner.kill()
    }

    async fn wait(&self) -> Result<(), EngineError> {
        self.inner.wait().await
    }
}

/// Manifold without inputs running a [`TerminationWorker`] on the process signals.
pub fn termination_manifold() -> Manifold {
    Manifold::new(|_ctx: Context| async { Ok(TerminationWorker::new()) })
}

fn shutdown_signal() -> BoxFuture<'static, ()> {
    async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = sigterm.recv() => {}
                        _ = ctrl_c() => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "Cannot listen for SIGTERM");
                    ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        ctrl_c().await;
    }
    .boxed()
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
