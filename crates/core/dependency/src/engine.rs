use crate::control_loop::{ControlLoop, Request};
use crate::{EngineConfig, EngineError, Manifold, Manifolds, Report, Worker};
use async_trait::async_trait;
use eyre::eyre;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Handle to a running dependency engine.
///
/// The engine hosts every installed manifold: it starts workers once their inputs run, restarts them
/// when they fail or their inputs change, and stops all of them, dependents first, when killed or when
/// a worker reports a fatal error. Handles are cheap to clone; dropping the last one stops the engine.
#[derive(Clone)]
pub struct Engine {
    request_tx: mpsc::UnboundedSender<Request>,
    kill: CancellationToken,
    done_rx: watch::Receiver<Option<Result<(), EngineError>>>,
    report_rx: watch::Receiver<Report>,
}

impl Engine {
    /// Spawns the control loop on the current tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(None);
        let (report_tx, report_rx) = watch::channel(Report::default());
        let kill = CancellationToken::new();

        let control_loop = ControlLoop::new(config, request_rx, kill.clone(), report_tx);
        tokio::spawn(async move {
            let result = control_loop.run().await;
            let _ = done_tx.send(Some(result));
        });

        Ok(Self { request_tx, kill, done_rx, report_rx })
    }

    /// Adds a manifold. Its worker starts as soon as every input is running.
    pub async fn install(&self, name: impl Into<String>, manifold: Manifold) -> Result<(), EngineError> {
        let (reply, reply_rx) = oneshot::channel();
        self.request_tx.send(Request::Install { name: name.into(), manifold, reply }).map_err(|_| EngineError::Dying)?;
        reply_rx.await.map_err(|_| EngineError::Dying)?
    }

    /// Installs every manifold of the set, stopping at the first failure.
    pub async fn install_all(&self, manifolds: Manifolds) -> Result<(), EngineError> {
        for (name, manifold) in manifolds {
            self.install(name, manifold).await?;
        }
        Ok(())
    }

    /// Removes a manifold nothing depends on. Its worker, if any, is stopped first.
    pub async fn uninstall(&self, name: impl Into<String>) -> Result<(), EngineError> {
        let (reply, reply_rx) = oneshot::channel();
        self.request_tx.send(Request::Uninstall { name: name.into(), reply }).map_err(|_| EngineError::Dying)?;
        reply_rx.await.map_err(|_| EngineError::Dying)?
    }

    /// Latest snapshot of the engine.
    pub fn report(&self) -> Report {
        self.report_rx.borrow().clone()
    }

    pub fn subscribe_reports(&self) -> watch::Receiver<Report> {
        self.report_rx.clone()
    }
}

#[async_trait]
impl Worker for Engine {
    fn kill(&self) {
        self.kill.cancel();
    }

    async fn wait(&self) -> Result<(), EngineError> {
        let mut done_rx = self.done_rx.clone();
        let result = done_rx.wait_for(|result| result.is_some()).await.map(|result| result.clone());
        match result {
            Ok(Some(result)) => result,
            _ => Err(EngineError::failed(eyre!("dependency engine control loop terminated unexpectedly"))),
        }
    }
}
