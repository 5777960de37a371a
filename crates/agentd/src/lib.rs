//! Re-exports of the agentd crates, selected by feature.

#[cfg(feature = "core")]
pub mod core {
    #[cfg(feature = "core-config")]
    pub use agentd_core_config as config;
    #[cfg(feature = "core-dependency")]
    pub use agentd_core_dependency as dependency;
}

#[cfg(feature = "workers")]
pub mod workers {
    #[cfg(feature = "workers-periodic")]
    pub use agentd_worker_periodic as periodic;
    #[cfg(feature = "workers-termination")]
    pub use agentd_worker_termination as termination;
}
