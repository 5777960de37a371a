use serde::Serialize;
use std::collections::BTreeMap;
use strum_macros::Display;

/// Lifecycle of the engine as a whole.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Started,
    Stopping,
    Stopped,
}

/// Lifecycle of one installed manifold's worker.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ManifoldReport {
    pub state: WorkerState,
    pub inputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Incremented on every successful start.
    pub version: u64,
    /// Consecutive retryable failures.
    pub failures: u32,
}

/// Read-only snapshot of the engine, published after every event the control loop handles.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Report {
    pub state: EngineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub manifolds: BTreeMap<String, ManifoldReport>,
}

impl Report {
    pub fn manifold(&self, name: &str) -> Option<&ManifoldReport> {
        self.manifolds.get(name)
    }

    pub fn worker_state(&self, name: &str) -> Option<WorkerState> {
        self.manifolds.get(name).map(|report| report.state)
    }

    /// Names of the manifolds whose workers are running.
    pub fn started(&self) -> Vec<&str> {
        self.manifolds.iter().filter(|(_, report)| report.state == WorkerState::Started).map(|(name, _)| name.as_str()).collect()
    }
}
