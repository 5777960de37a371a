use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use thiserror::Error;

/// Errors flowing through the dependency engine.
///
/// Workers report why they stopped with one of these, start functions fail with them, and the engine
/// returns them from the install surface and as its terminal result. The first four variants are sentinels
/// that the engine recognises after any filter has been applied.
#[derive(Clone, Debug, Error)]
pub enum EngineError {
    /// A declared input is not (or no longer) available.
    #[error("dependency not available")]
    Missing,
    /// The worker asks to be restarted.
    #[error("restart immediately")]
    Bounce,
    /// The manifold was removed while its worker was running, or the worker asks for its own removal.
    #[error("resource permanently unavailable")]
    Uninstalled,
    /// The whole agent must shut down.
    #[error("agent should be terminated")]
    TerminateAgent,

    #[error("engine is shutting down")]
    Dying,
    #[error("\"{0}\" manifold already installed")]
    AlreadyInstalled(String),
    #[error("\"{0}\" manifold not installed")]
    NotInstalled(String),
    #[error("\"{name}\" manifold still depended on by {dependents:?}")]
    StillDepended { name: String, dependents: Vec<String> },
    #[error("\"{0}\" manifold cannot depend on itself")]
    SelfDependency(String),
    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("\"{input}\" is not a declared input of \"{name}\"")]
    UndeclaredInput { name: String, input: String },
    #[error("\"{name}\" provides {actual}, requested {expected}")]
    TypeMismatch { name: String, expected: &'static str, actual: &'static str },

    #[error("\"{name}\" worker failed to stop within {timeout:?}")]
    StopTimeout { name: String, timeout: Duration },
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("{0:#}")]
    Failed(Arc<eyre::Report>),
}

/// How the engine reacts to an error, from least to most severe.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    /// Wait until the worker's inputs change before starting it again.
    Missing,
    /// Restart after the bounce delay.
    Bounce,
    /// Restart after a growing backoff delay.
    Retryable,
    /// Shut the engine down.
    Fatal,
}

impl EngineError {
    pub fn failed(err: impl Into<eyre::Report>) -> Self {
        EngineError::Failed(Arc::new(err.into()))
    }

    pub fn severity(&self) -> Severity {
        match self {
            EngineError::Missing | EngineError::Uninstalled | EngineError::UndeclaredInput { .. } => Severity::Missing,
            EngineError::Bounce => Severity::Bounce,
            EngineError::TerminateAgent
            | EngineError::StopTimeout { .. }
            | EngineError::CycleDetected(_)
            | EngineError::SelfDependency(_)
            | EngineError::AlreadyInstalled(_) => Severity::Fatal,
            _ => Severity::Retryable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_missing(&self) -> bool {
        self.severity() == Severity::Missing
    }
}

impl From<eyre::Report> for EngineError {
    fn from(err: eyre::Report) -> Self {
        EngineError::Failed(Arc::new(err))
    }
}

/// Returns the more severe of two errors; on a tie the first one wins.
pub fn worst_error(first: EngineError, second: EngineError) -> EngineError {
    if second.severity() > first.severity() { second } else { first }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::eyre;

    #[test]
    fn test_sentinel_severity() {
        assert_eq!(EngineError::Missing.severity(), Severity::Missing);
        assert_eq!(EngineError::Uninstalled.severity(), Severity::Missing);
        assert_eq!(EngineError::Bounce.severity(), Severity::Bounce);
        assert_eq!(EngineError::TerminateAgent.severity(), Severity::Fatal);
        assert_eq!(EngineError::failed(eyre!("boom")).severity(), Severity::Retryable);
    }

    #[test]
    fn test_undeclared_input_is_missing() {
        let err = EngineError::UndeclaredInput { name: "b".to_string(), input: "c".to_string() };
        assert!(err.is_missing());
        assert_eq!(err.to_string(), "\"c\" is not a declared input of \"b\"");
    }

    #[test]
    fn test_worst_error() {
        let worst = worst_error(EngineError::failed(eyre!("boom")), EngineError::TerminateAgent);
        assert!(matches!(worst, EngineError::TerminateAgent));

        let worst = worst_error(EngineError::TerminateAgent, EngineError::StopTimeout { name: "a".into(), timeout: Duration::ZERO });
        assert!(matches!(worst, EngineError::TerminateAgent));

        let worst = worst_error(EngineError::Bounce, EngineError::Missing);
        assert!(matches!(worst, EngineError::Bounce));
    }

    #[test]
    fn test_failed_display_keeps_context() {
        let err: EngineError = eyre!("connection refused").wrap_err("cannot reach api").into();
        assert_eq!(err.to_string(), "cannot reach api: connection refused");
        assert_eq!(Severity::Retryable.to_string(), "retryable");
    }

    #[test]
    fn test_cycle_display() {
        let err = EngineError::CycleDetected(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    }
}
