//! Steward - streaming tool-calling orchestrator for SaaS admin assistants.
//!
//! Main entry point for the Steward server CLI.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use steward_agent::{AgentConfig, NoopMediaAnalyzer, ToolRegistry, Turn};
use steward_llm::{AnthropicConfig, AnthropicGateway, SharedGateway};
use steward_server::{AppState, Server, ServerConfig};
use steward_session::{MemoryAuditLog, MemorySessionStore};

/// Default model served by the orchestrator.
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Steward - streaming tool-calling orchestrator
#[derive(Parser)]
#[command(name = "steward")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Steward server
    Serve(ServeArgs),
}

/// Arguments for the serve command.
#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Model to serve requests with
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Maximum tokens per model response
    #[arg(long, default_value_t = 4096)]
    max_tokens: u32,

    /// Maximum loop iterations per request
    #[arg(long, default_value_t = steward_agent::DEFAULT_MAX_LOOPS)]
    max_loops: u32,

    /// API key for the model gateway (or set STEWARD_API_KEY)
    #[arg(long, env = "STEWARD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Custom base URL for the model gateway
    #[arg(long)]
    base_url: Option<String>,

    /// System prompt prepended to every request
    #[arg(long)]
    system_prompt: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing — console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "steward=debug,steward_agent=debug,steward_llm=debug,steward_server=debug,steward_session=debug,info"
    } else {
        "steward=info,steward_agent=info,steward_llm=info,steward_server=info,steward_session=info,warn"
    };

    let log_dir = dirs::state_dir()
        .map(|d| d.join("steward/logs"))
        .unwrap_or_else(|| std::path::PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "steward.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "steward=trace,steward_agent=trace,steward_llm=trace,steward_server=trace,steward_session=trace,info",
                )),
        )
        .init();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let gateway_config = match args.api_key {
        Some(api_key) => AnthropicConfig::new(api_key),
        None => AnthropicConfig::from_env()
            .context("no API key provided via --api-key, STEWARD_API_KEY, or ANTHROPIC_API_KEY")?,
    };
    let gateway_config = match args.base_url {
        Some(base_url) => gateway_config.with_base_url(base_url),
        None => gateway_config,
    };
    let gateway: SharedGateway = Arc::new(AnthropicGateway::new(gateway_config)?);

    let mut agent_config = AgentConfig::new(&args.model)
        .with_max_tokens(args.max_tokens)
        .with_max_loops(args.max_loops);
    if let Some(prompt) = args.system_prompt {
        agent_config = agent_config.with_system_prompt(prompt);
    }

    // Tools are host-supplied; the standalone binary starts with an empty
    // registry and hosts register via the library API.
    let registry = Arc::new(ToolRegistry::new());
    if registry.is_empty() {
        tracing::warn!("No tools registered; the model can only answer from context");
    }

    let turn = Arc::new(
        Turn::new(gateway.clone(), registry, agent_config)
            .with_media_analyzer(Arc::new(NoopMediaAnalyzer))
            .with_audit(Arc::new(MemoryAuditLog::new())),
    );

    let state = AppState::new(
        turn,
        gateway,
        Arc::new(MemorySessionStore::default()),
        ServerConfig::new().with_bind_address(args.bind),
    );

    tracing::info!(bind = %args.bind, model = %args.model, "Steward starting");
    Server::from_state(state).run().await?;

    Ok(())
}
