use crate::agent_runtime::start_agent;
use crate::arguments::{AppArgs, Command};
use agentd::core::config::AgentConfig;
use agentd::core::dependency::{EngineError, Worker};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

mod agent_runtime;
mod arguments;

fn main() -> eyre::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let fmt_layer = fmt::Layer::default().with_thread_ids(true).with_file(false).with_line_number(true).with_filter(env_filter);
    tracing_subscriber::registry().with(fmt_layer).init();

    let app_args = AppArgs::parse();
    match app_args.command {
        Command::CheckConfig(args) => {
            let config = AgentConfig::load_from_file(args.config.clone())?;
            let engine_config = config.engine.engine_config()?;
            info!(config = %args.config, engine = ?engine_config, "Configuration is valid");
            Ok(())
        }
        Command::Run(args) => {
            let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

            rt.block_on(async {
                info!("Loading config from {}", args.config);
                let config = AgentConfig::load_from_file_async(args.config.clone()).await?;
                let engine = start_agent(&config).await?;

                let result = engine.wait().await;
                info!(report = %serde_json::to_string(&engine.report())?, "Final engine report");
                match result {
                    Ok(()) => info!("Agent stopped"),
                    Err(EngineError::TerminateAgent) => info!("Agent terminated"),
                    Err(e) => {
                        error!(error = %e, "Agent stopped with error");
                        return Err(e.into());
                    }
                }
                Ok::<(), eyre::Error>(())
            })?;
            Ok(())
        }
    }
}
