use agentd::core::config::{AgentConfig, ReportSection};
use agentd::core::dependency::{Context, Engine, Manifold, Report, WorkerState};
use agentd::workers::periodic::{PeriodicWorker, cleanup_manifold};
use agentd::workers::termination::termination_manifold;
use tokio::sync::watch;
use tracing::{info, warn};

pub const TERMINATION: &str = "termination";
pub const METRICS_CLEANUP: &str = "metrics-cleanup";
pub const REPORT: &str = "report";

/// Creates the engine and installs the manifolds enabled in `config`.
pub async fn start_agent(config: &AgentConfig) -> eyre::Result<Engine> {
    let engine = Engine::new(config.engine.engine_config()?)?;
    let mut installed = Vec::new();

    if config.termination.enabled {
        engine.install(TERMINATION, termination_manifold()).await?;
        installed.push(TERMINATION);
    }
    if let Some(cleanup) = &config.metrics_cleanup {
        info!(api_caller = %cleanup.api_caller, period = ?cleanup.period(), "Metrics cleanup enabled");
        engine.install(METRICS_CLEANUP, cleanup_manifold(cleanup.api_caller.clone(), cleanup.period())).await?;
        installed.push(METRICS_CLEANUP);
    }
    if let Some(report) = &config.report {
        engine.install(REPORT, report_manifold(report, engine.subscribe_reports())).await?;
        installed.push(REPORT);
    }

    info!(manifolds = ?installed, "Agent started");
    Ok(engine)
}

// Holds only the report receiver so the engine can still stop once every handle is dropped.
fn report_manifold(section: &ReportSection, reports: watch::Receiver<Report>) -> Manifold {
    let period = section.period();
    Manifold::new(move |_ctx: Context| {
        let reports = reports.clone();
        async move {
            Ok(PeriodicWorker::spawn(REPORT, period, move || {
                let report = reports.borrow().clone();
                async move {
                    log_report(&report);
                    Ok(())
                }
            }))
        }
    })
}

fn log_report(report: &Report) {
    info!(state = %report.state, started = ?report.started(), "Engine report");
    for (name, manifold) in report.manifolds.iter().filter(|(_, manifold)| manifold.state != WorkerState::Started) {
        match &manifold.error {
            Some(error) => warn!(name = %name, state = %manifold.state, failures = manifold.failures, error = %error, "Worker not running"),
            None => info!(name = %name, state = %manifold.state, "Worker not running"),
        }
    }
}
