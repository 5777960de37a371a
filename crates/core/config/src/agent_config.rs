use crate::config_loader::{load_from_file, load_from_file_sync};
use agentd_core_dependency::EngineConfig;
use eyre::{Result, eyre};
use serde::Deserialize;
use std::time::Duration;

/// Restart and shutdown timings of the dependency engine
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSection {
    /// Delay before the first restart after a failure
    pub error_delay_ms: u64,
    /// Delay before restarting a worker that exited cleanly or asked to be bounced
    pub bounce_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_secs: u64,
    /// A worker that ran at least this long starts its backoff from scratch
    pub backoff_reset_secs: u64,
    pub stop_grace_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        let config = EngineConfig::default();
        EngineSection {
            error_delay_ms: config.error_delay.as_millis() as u64,
            bounce_delay_ms: config.bounce_delay.as_millis() as u64,
            backoff_factor: config.backoff_factor,
            max_delay_secs: config.max_delay.as_secs(),
            backoff_reset_secs: config.backoff_reset_time.as_secs(),
            stop_grace_secs: config.stop_grace_timeout.as_secs(),
        }
    }
}

impl EngineSection {
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let config = EngineConfig {
            error_delay: Duration::from_millis(self.error_delay_ms),
            bounce_delay: Duration::from_millis(self.bounce_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_secs(self.max_delay_secs),
            backoff_reset_time: Duration::from_secs(self.backoff_reset_secs),
            stop_grace_timeout: Duration::from_secs(self.stop_grace_secs),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Shutdown on SIGTERM / Ctrl-C
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminationSection {
    pub enabled: bool,
}

impl Default for TerminationSection {
    fn default() -> Self {
        TerminationSection { enabled: true }
    }
}

/// Periodic cleanup of old metrics through the api caller
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleanupSection {
    /// Name of the manifold providing the metrics client
    pub api_caller: String,
    pub period_secs: u64,
}

impl Default for CleanupSection {
    fn default() -> Self {
        CleanupSection { api_caller: "api-caller".to_string(), period_secs: 3600 }
    }
}

impl CleanupSection {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

/// Periodic logging of the engine report
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportSection {
    pub period_secs: u64,
}

impl Default for ReportSection {
    fn default() -> Self {
        ReportSection { period_secs: 60 }
    }
}

impl ReportSection {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

/// Main agent configuration
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub engine: EngineSection,

    pub termination: TerminationSection,

    /// Optional metrics cleanup worker
    pub metrics_cleanup: Option<CleanupSection>,

    /// Optional report logging
    pub report: Option<ReportSection>,
}

impl AgentConfig {
    /// Load configuration from file (sync version)
    pub fn load_from_file(file_name: String) -> Result<AgentConfig> {
        let config: AgentConfig = load_from_file_sync(file_name)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file (async version)
    pub async fn load_from_file_async(file_name: String) -> Result<AgentConfig> {
        let config: AgentConfig = load_from_file(file_name).await?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.engine_config()?;
        if let Some(cleanup) = &self.metrics_cleanup {
            if cleanup.period_secs == 0 {
                return Err(eyre!("metrics_cleanup.period_secs must be positive"));
            }
            if cleanup.api_caller.is_empty() {
                return Err(eyre!("metrics_cleanup.api_caller must name a manifold"));
            }
        }
        if self.report.as_ref().is_some_and(|report| report.period_secs == 0) {
            return Err(eyre!("report.period_secs must be positive"));
        }
        Ok(())
    }
}
