//! Dependency-driven lifecycle engine.
//!
//! Components are declared as [`Manifold`]s naming the other manifolds they depend on. The [`Engine`]
//! starts each one once its inputs are running, hands it a [`Context`] to read their outputs, restarts it
//! when it fails or an input changes, and tears the whole graph down in dependency order on shutdown.

pub use config::EngineConfig;
pub use context::Context;
pub use engine::Engine;
pub use error::{worst_error, EngineError, Severity};
pub use manifold::{FilterFn, Input, Manifold, Manifolds, Output, OutputFn, OutputKind, StartFn};
pub use report::{EngineState, ManifoldReport, Report, WorkerState};
pub use worker::{TaskWorker, Worker};

mod config;
mod context;
mod control_loop;
mod engine;
mod error;
mod graph;
mod manifold;
mod report;
mod worker;
