pub use termination_worker::{TerminationWorker, termination_manifold};

mod termination_worker;
#[cfg(test)]
mod termination_worker_test;
