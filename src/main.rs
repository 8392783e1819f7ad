use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod backend;
mod bootstrap;
mod cache;
mod config;
mod dataset;
mod error;
mod gateway;
mod models;
mod output;
mod parse;
mod prompt;
mod runner;
mod sampler;
mod server;

use crate::config::Config;
use crate::gateway::Gateway;
use crate::output::OutputFormat;
use crate::runner::Runner;
use crate::server::ServerState;

/// Multiple-choice benchmark with self-consistency voting and bootstrap confidence intervals
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output - debug logging for every sample and cache access
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a question set and report accuracy with a confidence interval
    Run {
        /// Path to the TOML configuration file
        config: PathBuf,

        /// Output format: plain or json
        #[arg(short, long, default_value = "plain")]
        output: OutputFormat,
    },
    /// Serve the cached gateway as an OpenAI-style chat completion endpoint
    Serve {
        /// Path to the TOML configuration file
        config: PathBuf,

        /// Address to bind, overriding server.bind
        #[arg(short, long)]
        bind: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "mcq_eval=debug" } else { "mcq_eval=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Run { config, output } => {
            let config = Config::from_file(&config)?;
            let gateway = Arc::new(Gateway::from_config(&config));
            let runner = Runner::new(config, gateway);

            let summary = runner.run_from_config().await?;

            output::print_results(&summary, output);
        }
        Command::Serve { config, bind } => {
            let config = Config::from_file(&config)?;
            let gateway = Arc::new(Gateway::from_config(&config));
            // Load once before accepting traffic; a broken backend stops the process here
            let model = gateway.model_id().await?;
            info!("Backend model: {}", model);

            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let state = ServerState {
                gateway,
                stop: config.backend.stop.clone(),
            };
            server::serve(&bind, state).await?;
        }
    }

    Ok(())
}
