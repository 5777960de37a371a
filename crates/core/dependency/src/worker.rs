use crate::EngineError;
use async_trait::async_trait;
use eyre::eyre;
use std::any::Any;
use std::future::Future;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// A running instance of a manifold.
///
/// `kill` only requests termination and must be idempotent. `wait` resolves once the work has
/// concluded; it must be cancel-safe and may be called any number of times, every call returning
/// the same result.
#[async_trait]
pub trait Worker: Any + Send + Sync {
    fn kill(&self);

    async fn wait(&self) -> Result<(), EngineError>;
}

/// Worker backed by a tokio task that observes a cancellation token.
pub struct TaskWorker {
    name: String,
    token: CancellationToken,
    done_rx: watch::Receiver<Option<Result<(), EngineError>>>,
}

impl TaskWorker {
    /// Spawns `run` on the current runtime. The task receives the token that `kill` cancels and is
    /// expected to return promptly once it fires.
    pub fn spawn<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);

        let handle = tokio::spawn(run(token.clone()));
        let task_name = name.clone();
        tokio::spawn(async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    error!(name = %task_name, "Worker task panicked");
                    Err(EngineError::failed(eyre!("{task_name} worker panicked")))
                }
                Err(e) => Err(EngineError::failed(eyre!("{task_name} worker cancelled: {e}"))),
            };
            let _ = done_tx.send(Some(result));
        });

        Self { name, token, done_rx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Worker for TaskWorker {
    fn kill(&self) {
        self.token.cancel();
    }

    async fn wait(&self) -> Result<(), EngineError> {
        let mut done_rx = self.done_rx.clone();
        let result = done_rx.wait_for(|result| result.is_some()).await.map(|result| result.clone());
        match result {
            Ok(Some(result)) => result,
            _ => Err(EngineError::failed(eyre!("{} worker result lost", self.name))),
        }
    }
}
