use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::NodeConfig;
use rollup_node_utils::{config::load_config, logging::setup_tracing};

mod commands;
mod config;

// CONSTANTS
// ================================================================================================

const NODE_CONFIG_FILE_PATH: &str = "rollup-node.toml";

const ENV_ENABLE_OTEL: &str = "ROLLUP_NODE_ENABLE_OTEL";

// COMMANDS
// ================================================================================================

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Starts the sequencer on top of a local development chain.
    ///
    /// Runs until interrupted with Ctrl-C, after which the synchronizer, the pipeline and the
    /// world state are shut down in order.
    Start {
        #[arg(short, long, value_name = "FILE", default_value = NODE_CONFIG_FILE_PATH)]
        config: PathBuf,

        /// Export spans to the OpenTelemetry collector configured through the standard `OTEL_`
        /// environment variables.
        #[arg(long = "enable-otel", default_value_t = false, env = ENV_ENABLE_OTEL)]
        enable_otel: bool,
    },

    /// Writes the default configuration to a new file.
    Init {
        #[arg(short, long, value_name = "FILE", default_value = NODE_CONFIG_FILE_PATH)]
        config_path: PathBuf,
    },

    /// Prints the effective configuration, environment overrides included.
    DumpConfig {
        #[arg(short, long, value_name = "FILE", default_value = NODE_CONFIG_FILE_PATH)]
        config: PathBuf,
    },
}

impl Command {
    fn open_telemetry(&self) -> bool {
        matches!(self, Command::Start { enable_otel: true, .. })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_tracing(cli.command.open_telemetry().into())?;

    match cli.command {
        Command::Start { config, .. } => {
            let config = load_node_config(&config)?;
            commands::start_node(config).await
        },
        Command::Init { config_path } => commands::init_config_file(&config_path),
        Command::DumpConfig { config } => {
            let config = load_node_config(&config)?;
            let config = toml::to_string(&config).context("serializing the configuration")?;
            println!("{config}");
            Ok(())
        },
    }
}

fn load_node_config(path: &Path) -> anyhow::Result<NodeConfig> {
    load_config(path)
        .with_context(|| format!("failed to load config file `{}`", path.display()))
}
