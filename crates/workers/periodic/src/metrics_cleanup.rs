use crate::PeriodicWorker;
use agentd_core_dependency::{Context, Manifold};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const CLEANUP_PERIOD: Duration = Duration::from_secs(3600);

/// Metrics manager facade of the controller api.
#[async_trait]
pub trait MetricsManagerClient: Send + Sync {
    async fn cleanup_old_metrics(&self) -> eyre::Result<()>;
}

/// Runs a [`PeriodicWorker`] that asks the controller to drop old metrics.
///
/// `api_caller` must name a manifold whose output is an `Arc<dyn MetricsManagerClient>`.
pub fn cleanup_manifold(api_caller: impl Into<String>, period: Duration) -> Manifold {
    build_manifold(api_caller.into(), period, None)
}

/// Like [`cleanup_manifold`], sending on `notify` after every successful cleanup. A full channel drops the
/// notification.
pub fn cleanup_manifold_with_notify(api_caller: impl Into<String>, period: Duration, notify: mpsc::Sender<()>) -> Manifold {
    build_manifold(api_caller.into(), period, Some(notify))
}

fn build_manifold(api_caller: String, period: Duration, notify: Option<mpsc::Sender<()>>) -> Manifold {
    let input = api_caller.clone();
    Manifold::new(move |ctx: Context| {
        let api_caller = api_caller.clone();
        let notify = notify.clone();
        async move {
            let client: Arc<dyn MetricsManagerClient> = ctx.get(&api_caller)?;
            Ok(PeriodicWorker::spawn("metrics-cleanup", period, move || cleanup(client.clone(), notify.clone())))
        }
    })
    .with_input::<Arc<dyn MetricsManagerClient>>(input)
}

// Failures are retried on the next tick, the worker keeps running.
async fn cleanup(client: Arc<dyn MetricsManagerClient>, notify: Option<mpsc::Sender<()>>) -> eyre::Result<()> {
    if let Err(err) = client.cleanup_old_metrics().await {
        warn!(error = %err, "Failed to clean up old metrics, will retry later");
        return Ok(());
    }
    debug!("Old metrics cleaned up");
    if let Some(notify) = notify {
        let _ = notify.try_send(());
    }
    Ok(())
}
