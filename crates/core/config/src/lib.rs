pub use agent_config::{AgentConfig, CleanupSection, EngineSection, ReportSection, TerminationSection};
pub use config_loader::{LoadConfigError, load_from_file, load_from_file_sync};

mod agent_config;
mod config_loader;
