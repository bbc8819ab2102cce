//! Picoclaw CLI — entry point.
//!
//! # Commands
//!
//! - `picoclaw agent [-m MESSAGE] [-s SESSION] [--model MODEL] [--debug]`
//!   — chat with the agent (one-shot or interactive REPL)
//! - `picoclaw gateway [--debug] [--log-filter FILTER]`
//!   — run the long-running multi-channel gateway
//!
//! Exit codes: 0 on clean exit, 1 on config load failure or unrecoverable
//! startup error.

mod gateway;
mod helpers;
mod repl;
mod runtime;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use picoclaw_core::bus::MessageBus;
use picoclaw_core::config::load_config;
use picoclaw_core::media::MediaStore;

/// picoclaw — multi-channel LLM agent gateway
#[derive(Parser)]
#[command(name = "picoclaw", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent (one-shot or interactive REPL)
    Agent {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Session key to extend
        #[arg(short, long, default_value = "cli:default")]
        session: String,

        /// Model override for this run
        #[arg(long)]
        model: Option<String>,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        debug: bool,
    },

    /// Start the gateway (all channels + agent loop)
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        debug: bool,

        /// Component log filter (an env-filter directive string)
        #[arg(long)]
        log_filter: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Agent {
            message,
            session,
            model,
            debug,
        } => {
            init_logging(debug, None);
            run_agent(message, session, model).await
        }
        Commands::Gateway { debug, log_filter } => {
            init_logging(debug, log_filter.as_deref());
            run_gateway().await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            helpers::print_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run_agent(message: Option<String>, session: String, model: Option<String>) -> Result<()> {
    let config = load_config(None).context("failed to load config")?;

    let bus = Arc::new(MessageBus::new());
    let runtime = runtime::build_runtime(&config, bus, MediaStore::new(), None, Vec::new(), None)?;

    if let Some(model) = model {
        runtime.agents.default_agent().set_model(model);
    }

    match message {
        Some(msg) => {
            let response = runtime
                .agent_loop
                .process_direct(&msg, &session)
                .await
                .context("agent processing failed")?;
            helpers::print_response(&response);
            Ok(())
        }
        None => repl::run(runtime.agent_loop, &session).await,
    }
}

async fn run_gateway() -> Result<()> {
    let config = load_config(None).context("failed to load config")?;
    gateway::run(config).await
}

/// Initialize tracing. `--debug` raises the default level; `--log-filter`
/// installs a custom env-filter directive (e.g. `picoclaw_agent=trace`).
fn init_logging(debug: bool, log_filter: Option<&str>) {
    use tracing_subscriber::EnvFilter;

    let filter = match log_filter {
        Some(directives) => EnvFilter::new(directives),
        None if debug => EnvFilter::new("picoclaw=debug,picoclaw_core=debug,picoclaw_agent=debug,picoclaw_providers=debug,picoclaw_channels=debug,picoclaw_cron=debug,info"),
        None => EnvFilter::new("info"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
