use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "agentd", version, about = "Dependency-driven agent", long_about = None)]
pub struct AppArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the agent until it is terminated
    Run(AgentArgs),
    /// Load and validate the configuration, then exit
    CheckConfig(AgentArgs),
}

#[derive(Args, Debug)]
pub struct AgentArgs {
    /// Agent configuration file
    #[arg(long, short, default_value = "config.toml")]
    pub config: String,
}
