use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use conduit_engine::{
    CatalogService, EventLog, McpConnectorFactory, Orchestrator, OrchestratorConfig, SessionStore,
};
use conduit_llm::{ChatClient, ChatClientConfig, LlmDecider};
use conduit_server::{RelayConfig, ServerConfig};
use conduit_settings::ConduitSettings;
use conduit_store::Database;
use conduit_telemetry::{init_telemetry, parse_module_level, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(name = "conduit", about = "Tool-orchestration server with streamed progress")]
struct Args {
    /// Listen port (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Listen address (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Settings file. Defaults to ~/.conduit/settings.json.
    #[arg(long)]
    config: Option<PathBuf>,

    /// trace, debug, info, warn or error.
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Per-target level override, e.g. `--log-module rmcp=warn`. Repeatable.
    #[arg(long = "log-module", value_parser = parse_module_level)]
    log_modules: Vec<(String, Level)>,

    /// Human-readable logs instead of JSON lines.
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_telemetry(TelemetryConfig {
        log_level: args.log_level,
        module_levels: args.log_modules.clone(),
        json: !args.pretty,
    });

    let mut settings = match &args.config {
        Some(path) => conduit_settings::load_settings_from_path(path)?,
        None => conduit_settings::load_settings()?,
    };
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(host) = &args.host {
        settings.server.host = host.clone();
    }

    tracing::info!("starting conduit");

    let db = Database::open(&settings.storage.db_path)
        .with_context(|| format!("open database {}", settings.storage.db_path.display()))?;

    let orchestrator = build_orchestrator(&settings)?;

    let handle = conduit_server::start(server_config(&settings), orchestrator.clone(), db)
        .await
        .context("start server")?;
    tracing::info!(port = handle.port, "conduit ready");

    tokio::signal::ctrl_c()
        .await
        .context("listen for ctrl-c")?;

    tracing::info!(in_flight = orchestrator.in_flight(), "shutting down");
    handle.abort();
    orchestrator.shutdown().await;
    Ok(())
}

fn build_orchestrator(settings: &ConduitSettings) -> Result<Arc<Orchestrator>> {
    let llm = &settings.llm;
    let client = ChatClient::new(
        ChatClientConfig {
            base_url: llm.base_url.clone(),
            model: llm.model.clone(),
            temperature: llm.temperature,
            request_timeout: Duration::from_secs(llm.request_timeout_secs),
            stream_idle_timeout: Duration::from_secs(llm.stream_idle_timeout_secs),
            ..Default::default()
        }
        .with_key_from_env(&llm.api_key_env),
    )
    .context("build model client")?;
    if !client.has_api_key() {
        tracing::warn!(env = %llm.api_key_env, "no API key set, model calls will fail");
    }

    let catalog = CatalogService::new(Arc::new(McpConnectorFactory::default()));
    Ok(Orchestrator::new(
        Arc::new(SessionStore::new()),
        Arc::new(catalog),
        Arc::new(LlmDecider::new(client)),
        Arc::new(EventLog::new(settings.stream.max_len)),
        OrchestratorConfig {
            tail_messages: settings.history.tail_messages,
        },
    ))
}

fn server_config(settings: &ConduitSettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        allowed_origins: settings.server.allowed_origins.clone(),
        max_send_queue: settings.server.max_send_queue,
        relay: RelayConfig {
            block: Duration::from_millis(settings.stream.block_ms),
            consumer_group: settings.stream.consumer_group.clone(),
            ..Default::default()
        },
        terminal_retention: Duration::from_secs(settings.stream.terminal_retention_secs),
        default_identity: settings.history.default_identity.clone(),
    }
}
