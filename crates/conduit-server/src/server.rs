use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use conduit_core::ids::SessionId;
use conduit_core::mcp_config::McpConfig;
use conduit_core::tools::ToolCatalog;
use conduit_engine::{start_sweeper, Orchestrator};
use conduit_store::{ChatHistoryRepo, ConfigRepo, Database};

use crate::configs;
use crate::connection;
use crate::error::{require_str, ApiError};
use crate::history;
use crate::registry::ConnectionRegistry;
use crate::relay::RelayConfig;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Empty, or containing `*`, allows any origin.
    pub allowed_origins: Vec<String>,
    pub max_send_queue: usize,
    pub relay: RelayConfig,
    /// How long a finished channel stays readable.
    pub terminal_retention: Duration,
    pub default_identity: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8945,
            allowed_origins: Vec::new(),
            max_send_queue: 256,
            relay: RelayConfig::default(),
            terminal_retention: Duration::from_secs(300),
            default_identity: "default".to_string(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ConnectionRegistry>,
    pub history: Arc<ChatHistoryRepo>,
    pub configs: Arc<ConfigRepo>,
    pub db: Database,
    pub relay: RelayConfig,
    /// Owner of persisted chat histories and configs.
    pub identity: Arc<str>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/tool-summary/ws", get(ws_handler))
        .route("/tool-summary", post(tool_summary_handler))
        .route("/health", get(health_handler))
        .merge(history::routes())
        .merge(configs::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Bind the listener and serve. The event-log sweeper runs alongside.
pub async fn start(
    config: ServerConfig,
    orchestrator: Arc<Orchestrator>,
    db: Database,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));

    let sweeper = start_sweeper(
        orchestrator.log().clone(),
        config.terminal_retention,
        SWEEP_INTERVAL,
    );

    let state = AppState {
        orchestrator,
        registry,
        history: Arc::new(ChatHistoryRepo::new(db.clone())),
        configs: Arc::new(ConfigRepo::new(db.clone())),
        db,
        relay: config.relay.clone(),
        identity: Arc::from(config.default_identity.as_str()),
    };

    let router = build_router(state, &config.allowed_origins);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, "conduit server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
        sweeper,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections.
    pub fn abort(&self) {
        self.server.abort();
        self.sweeper.abort();
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_ws_connection(socket, state))
}

/// `{session_id, mcp_config}` in, `{server_name: [descriptor]}` out.
async fn tool_summary_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<ToolCatalog>, ApiError> {
    let session_id = SessionId::from_raw(require_str(&body, "session_id")?);
    let config = McpConfig::from_value(body.get("mcp_config"))?;
    let catalog = state
        .orchestrator
        .catalog()
        .refresh(&session_id, &config)
        .await?;
    info!(
        session_id = %session_id,
        servers = catalog.servers().len(),
        tools = catalog.tool_count(),
        "tool summary served"
    );
    Ok(Json(catalog))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let storage_ok = state.db.ping().is_ok();
    let status = if storage_ok { "healthy" } else { "unhealthy" };
    let http_status = if storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(json!({
            "status": status,
            "connections": state.registry.count(),
            "channels": state.orchestrator.log().channel_count(),
            "in_flight": state.orchestrator.in_flight(),
        })),
    )
}
