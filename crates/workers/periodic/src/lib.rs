pub use metrics_cleanup::{CLEANUP_PERIOD, MetricsManagerClient, cleanup_manifold, cleanup_manifold_with_notify};
pub use periodic_worker::PeriodicWorker;

mod metrics_cleanup;
mod periodic_worker;
