//! ensemble-gateway: supervisor-routed multi-agent chat gateway
//!
//! Main entry point. Loads the orchestration config, builds the graph
//! (failing fast on any configuration problem), and serves the HTTP API.
//!
//! Usage:
//!   ensemble-gateway                        - serve with ./orchestration.yaml
//!   ensemble-gateway --config path.yaml     - serve with a specific config
//!   ensemble-gateway --help                 - show help

use std::sync::Arc;

use ensemble_core::{Orchestrator, OrchestrationConfig, ToolRegistry};
use ensemble_tools::register_default_tools;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "orchestration.yaml";

/// Run mode
enum RunMode {
    /// Serve the HTTP API with the given config file
    Serve(String),
    /// Show help
    Help,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mode = parse_args();

    match mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("ensemble-gateway {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Serve(config_path) => {
            // Initialize logging
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
                .init();

            // Load .env file
            dotenvy::dotenv().ok();

            run_server(&config_path).await
        }
    }
}

/// Parse command line arguments
fn parse_args() -> RunMode {
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return RunMode::Help,
            "--version" | "-v" => return RunMode::Version,
            "--config" | "-c" => {
                if let Some(path) = iter.next() {
                    config_path = path.clone();
                }
            }
            _ => {}
        }
    }

    RunMode::Serve(config_path)
}

/// Print help message
fn print_help() {
    println!("ensemble-gateway - supervisor-routed multi-agent chat gateway");
    println!();
    println!("Usage:");
    println!("  ensemble-gateway                     Serve with ./orchestration.yaml");
    println!("  ensemble-gateway --config <path>     Serve with a specific config file (yaml or toml)");
    println!("  ensemble-gateway --help              Show this help message");
    println!("  ensemble-gateway --version           Show version");
    println!();
    println!("Environment Variables:");
    println!("  OPENAI_API_KEY       API key for openai-provider models");
    println!("  ANTHROPIC_API_KEY    API key for claude-provider models");
    println!("  TAVILY_API_KEY       API key for the web_search tool");
    println!("  RUST_LOG             Log filter (default: info)");
}

/// Build the orchestration graph and serve the HTTP API
async fn run_server(config_path: &str) -> anyhow::Result<()> {
    tracing::info!("Starting ensemble-gateway...");

    // Load configuration; a bad document means we refuse to serve
    let config = OrchestrationConfig::from_file(config_path)
        .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Supervisor model: {}", config.supervisor.model);

    // Register built-in tools
    let mut registry = ToolRegistry::new();
    register_default_tools(&mut registry);
    tracing::info!(
        "Registered {} built-in tools: {:?}",
        registry.len(),
        registry.tool_names()
    );

    // Construct the graph; invalid providers, unknown tool identifiers,
    // or duplicate workers abort startup here
    let orchestrator = Orchestrator::from_config(&config, Arc::new(registry))
        .map_err(|e| anyhow::anyhow!("Failed to build orchestration graph: {}", e))?;
    tracing::info!("Workers: {:?}", orchestrator.worker_names());

    // Start HTTP API server
    let port = config.server.port;
    let orchestrator = Arc::new(orchestrator);
    let server = tokio::spawn(async move {
        if let Err(e) = ensemble_api::start_server(port, orchestrator).await {
            tracing::error!("HTTP API error: {}", e);
        }
    });

    tracing::info!("ensemble-gateway initialized successfully");
    tracing::info!("Press Ctrl+C to exit");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    server.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}
