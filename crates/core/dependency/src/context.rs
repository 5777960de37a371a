use crate::manifold::Output;
use crate::EngineError;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// State of one input captured when its dependent was scheduled to start.
#[derive(Clone)]
pub(crate) struct InputSnapshot {
    pub version: u64,
    pub output: Option<Output>,
}

/// View handed to a start function.
///
/// Holds an immutable copy of the dependent's inputs, taken by the control loop, so reading it never
/// touches engine state. The abort token is cancelled when the engine wants the component stopped; the
/// worker created from this context must observe it.
#[derive(Clone)]
pub struct Context {
    name: String,
    inputs: Arc<HashMap<String, Option<InputSnapshot>>>,
    abort: CancellationToken,
}

impl Context {
    pub(crate) fn new(name: String, inputs: HashMap<String, Option<InputSnapshot>>, abort: CancellationToken) -> Self {
        Self { name, inputs: Arc::new(inputs), abort }
    }

    /// Context with no inputs, not bound to any engine. Useful to start a manifold by hand.
    pub fn detached(name: impl Into<String>) -> Self {
        Self::new(name.into(), HashMap::new(), CancellationToken::new())
    }

    /// Adds a running input exposing `value`.
    pub fn with_input_value<T: Any + Send + Sync>(self, input: impl Into<String>, value: T) -> Self {
        let mut inputs = (*self.inputs).clone();
        inputs.insert(input.into(), Some(InputSnapshot { version: 1, output: Some(Output::new(value)) }));
        Self { name: self.name, inputs: Arc::new(inputs), abort: self.abort }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copies the output of a declared input.
    pub fn get<T: Any + Clone>(&self, input: &str) -> Result<T, EngineError> {
        let snapshot = match self.inputs.get(input) {
            Some(Some(snapshot)) => snapshot,
            Some(None) => return Err(EngineError::Missing),
            None => {
                warn!(name = %self.name, input, "Requested undeclared input");
                return Err(EngineError::UndeclaredInput { name: self.name.clone(), input: input.to_string() });
            }
        };
        let output = snapshot.output.as_ref().ok_or(EngineError::Missing)?;
        output.downcast::<T>().ok_or_else(|| EngineError::TypeMismatch {
            name: input.to_string(),
            expected: type_name::<T>(),
            actual: output.kind().type_name(),
        })
    }

    /// Whether a declared input was running when this context was created.
    pub fn is_running(&self, input: &str) -> bool {
        matches!(self.inputs.get(input), Some(Some(_)))
    }

    /// Resource version of a running input.
    pub fn input_version(&self, input: &str) -> Option<u64> {
        self.inputs.get(input).and_then(|snapshot| snapshot.as_ref()).map(|snapshot| snapshot.version)
    }

    pub fn abort(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub async fn aborted(&self) {
        self.abort.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Context {
        let mut inputs = HashMap::new();
        inputs.insert("api".to_string(), Some(InputSnapshot { version: 3, output: Some(Output::new("conn".to_string())) }));
        inputs.insert("flag".to_string(), Some(InputSnapshot { version: 1, output: None }));
        inputs.insert("down".to_string(), None);
        Context::new("worker".to_string(), inputs, CancellationToken::new())
    }

    #[test]
    fn test_get_output() {
        let ctx = context();
        assert_eq!(ctx.get::<String>("api").unwrap(), "conn");
        assert_eq!(ctx.input_version("api"), Some(3));
    }

    #[test]
    fn test_get_type_mismatch() {
        let err = context().get::<u64>("api").unwrap_err();
        match err {
            EngineError::TypeMismatch { name, expected, actual } => {
                assert_eq!(name, "api");
                assert_eq!(expected, "u64");
                assert_eq!(actual, "alloc::string::String");
            }
            err => panic!("unexpected error {err}"),
        }
    }

    #[test]
    fn test_get_missing() {
        let ctx = context();
        assert!(matches!(ctx.get::<String>("flag"), Err(EngineError::Missing)));
        assert!(matches!(ctx.get::<String>("down"), Err(EngineError::Missing)));
        assert!(ctx.is_running("flag"));
        assert!(!ctx.is_running("down"));
        assert_eq!(ctx.input_version("down"), None);
    }

    #[test]
    fn test_get_undeclared() {
        let err = context().get::<String>("other").unwrap_err();
        assert!(matches!(err, EngineError::UndeclaredInput { .. }));
        assert!(err.is_missing());
    }

    #[test]
    fn test_detached_with_input_value() {
        let ctx = Context::detached("cleanup").with_input_value("api", 42u32);
        assert_eq!(ctx.name(), "cleanup");
        assert_eq!(ctx.get::<u32>("api").unwrap(), 42);
        assert!(!ctx.is_aborted());
        ctx.abort().cancel();
        assert!(ctx.is_aborted());
    }
}
