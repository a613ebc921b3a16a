// Gateway binary: serves MCP on stdio, logs to stderr

use anyhow::Result;
use clap::Parser;
use junction_core::directory::ServerDirectory;
use junction_core::session::SessionManager;
use junction_core::{CapabilityAggregator, DiscoveryMode};
use junction_mcp::client::DefaultTransportFactory;
use junction_mcp::config::{GatewayConfig, DEFAULT_CONFIG_FILE};
use junction_mcp::dispatcher::RequestDispatcher;
use junction_mcp::server::McpServer;
use junction_mcp::tools::static_tools;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "junction-mcp", version)]
#[command(about = "MCP gateway aggregating many downstream servers behind one stdio endpoint", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "JUNCTION_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory API key
    #[arg(long, env = "JUNCTION_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Directory API base URL
    #[arg(long, env = "JUNCTION_BASE_URL")]
    base_url: Option<String>,

    /// Where capabilities come from: directory or live
    #[arg(long, env = "JUNCTION_MODE")]
    mode: Option<DiscoveryMode>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Junction MCP gateway starting...");

    let mut config = GatewayConfig::load(&args.config)?;
    if let Some(api_key) = args.api_key {
        config.directory.api_key = Some(api_key);
    }
    if let Some(base_url) = args.base_url {
        config.directory.base_url = base_url;
    }
    if let Some(mode) = args.mode {
        config.discovery.mode = mode;
    }

    let client = config.directory_client()?;
    if !client.has_api_key() {
        tracing::warn!("No directory API key configured; only built-in tools will be available");
    }
    tracing::info!(
        directory = %config.directory.base_url,
        mode = ?config.discovery.mode,
        "configuration ready"
    );

    let factory = Arc::new(DefaultTransportFactory::new(config.call_timeout()));
    let sessions = Arc::new(SessionManager::with_connect_timeout(factory, config.connect_timeout()));
    let directory: Arc<dyn ServerDirectory> = Arc::new(client.clone());
    let aggregator = Arc::new(CapabilityAggregator::new(
        directory,
        sessions.clone(),
        config.aggregator_config(),
    ));

    let tools = Arc::new(static_tools(aggregator.clone(), client));
    tracing::info!("Registered {} built-in tools", tools.len());

    let dispatcher = Arc::new(RequestDispatcher::new(
        aggregator,
        sessions.clone(),
        tools,
        config.call_timeout(),
    ));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Interrupt received, shutting down");
                    shutdown.cancel();
                }
                Err(e) => tracing::warn!("Failed to listen for interrupts: {}", e),
            }
        });
    }

    let server = McpServer::new(dispatcher, sessions);
    server.start(shutdown).await?;

    Ok(())
}
