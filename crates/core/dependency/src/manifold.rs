use crate::{Context, EngineError, Worker};
use eyre::eyre;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::{type_name, Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub type StartFn = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Arc<dyn Worker>, EngineError>> + Send + Sync>;
pub type OutputFn = Arc<dyn Fn(&dyn Worker) -> Result<Output, EngineError> + Send + Sync>;
pub type FilterFn = Arc<dyn Fn(EngineError) -> EngineError + Send + Sync>;

/// Named set of manifolds, installed together with `Engine::install_all`.
pub type Manifolds = BTreeMap<String, Manifold>;

/// Type of the value a manifold exposes to its dependents.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OutputKind {
    type_id: TypeId,
    type_name: &'static str,
}

impl OutputKind {
    pub fn of<T: Any>() -> Self {
        Self { type_id: TypeId::of::<T>(), type_name: type_name::<T>() }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Value extracted from a running worker.
#[derive(Clone)]
pub struct Output {
    value: Arc<dyn Any + Send + Sync>,
    kind: OutputKind,
}

impl Output {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self { value: Arc::new(value), kind: OutputKind::of::<T>() }
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    pub(crate) fn downcast<T: Any + Clone>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }
}

/// A declared dependency. When `kind` is set the edge is typed and checked at install time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Input {
    pub name: String,
    pub kind: Option<OutputKind>,
}

/// Declaration of one node of the dependency graph.
#[derive(Clone)]
pub struct Manifold {
    inputs: Vec<Input>,
    start: StartFn,
    output: Option<(OutputKind, OutputFn)>,
    filter: Option<FilterFn>,
}

impl Manifold {
    pub fn new<F, Fut, W>(start: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<W, EngineError>> + Send + 'static,
        W: Worker,
    {
        let start: StartFn = Arc::new(move |ctx| start(ctx).map(|res| res.map(|worker| Arc::new(worker) as Arc<dyn Worker>)).boxed());
        Self { inputs: Vec::new(), start, output: None, filter: None }
    }

    /// Adds untyped inputs; the dependent can check `Context::is_running` or `Context::get` any type.
    pub fn with_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.push_input(Input { name: name.into(), kind: None });
        }
        self
    }

    /// Adds an input whose producer must expose a `T`.
    pub fn with_input<T: Any>(mut self, name: impl Into<String>) -> Self {
        self.push_input(Input { name: name.into(), kind: Some(OutputKind::of::<T>()) });
        self
    }

    /// Exposes a `T` extracted from the running worker, which must be a `W`.
    pub fn with_output<W, T, F>(mut self, output: F) -> Self
    where
        W: Worker,
        T: Any + Send + Sync,
        F: Fn(&W) -> T + Send + Sync + 'static,
    {
        let output: OutputFn = Arc::new(move |worker: &dyn Worker| {
            let any: &dyn Any = worker;
            match any.downcast_ref::<W>() {
                Some(worker) => Ok(Output::new(output(worker))),
                None => Err(EngineError::failed(eyre!("output function expects a {} worker", type_name::<W>()))),
            }
        });
        self.output = Some((OutputKind::of::<T>(), output));
        self
    }

    /// Remaps errors produced by the worker (or its start function) before the engine classifies them.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(EngineError) -> EngineError + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|input| input.name.as_str())
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.inputs.iter().any(|input| input.name == name)
    }

    pub fn output_kind(&self) -> Option<OutputKind> {
        self.output.as_ref().map(|(kind, _)| *kind)
    }

    pub(crate) fn start(&self, ctx: Context) -> BoxFuture<'static, Result<Arc<dyn Worker>, EngineError>> {
        (self.start)(ctx)
    }

    pub(crate) fn output(&self, worker: &dyn Worker) -> Option<Result<Output, EngineError>> {
        self.output.as_ref().map(|(_, output)| output(worker))
    }

    pub(crate) fn filter(&self, err: EngineError) -> EngineError {
        match &self.filter {
            Some(filter) => filter(err),
            None => err,
        }
    }

    fn push_input(&mut self, input: Input) {
        match self.inputs.iter_mut().find(|existing| existing.name == input.name) {
            Some(existing) => {
                if input.kind.is_some() {
                    existing.kind = input.kind;
                }
            }
            None => self.inputs.push(input),
        }
    }
}

impl fmt::Debug for Manifold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manifold")
            .field("inputs", &self.inputs)
            .field("output", &self.output_kind())
            .field("filter", &self.filter.is_some())
            .finish()
    }
}
