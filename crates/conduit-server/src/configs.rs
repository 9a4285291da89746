//! `/configs` routes: saved MCP server sets for the configured identity.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::info;

use conduit_core::mcp_config::McpConfig;
use conduit_store::McpConfigRecord;

use crate::error::{require_str, ApiError};
use crate::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/configs", get(list_configs).post(create_config))
        .route(
            "/configs/{id}",
            get(get_config).put(update_config).delete(delete_config),
        )
}

/// Name, optional description and validated connections from a request body.
fn parse_body(body: &Value) -> Result<(&str, Option<&str>, McpConfig), ApiError> {
    let name = require_str(body, "name")?;
    let description = body.get("description").and_then(Value::as_str);
    let config = McpConfig::from_value(Some(body))?;
    Ok((name, description, config))
}

async fn list_configs(
    State(state): State<AppState>,
) -> Result<Json<Vec<McpConfigRecord>>, ApiError> {
    Ok(Json(state.configs.list(&state.identity)?))
}

async fn create_config(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<McpConfigRecord>), ApiError> {
    let (name, description, config) = parse_body(&body)?;
    let record = state
        .configs
        .create(&state.identity, name, description, &config)?;
    info!(id = %record.id, name, servers = config.connections.len(), "config saved");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<McpConfigRecord>, ApiError> {
    Ok(Json(state.configs.get(&id, &state.identity)?))
}

async fn update_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<McpConfigRecord>, ApiError> {
    let (name, description, config) = parse_body(&body)?;
    let record = state
        .configs
        .update(&id, &state.identity, name, description, &config)?;
    info!(id = %id, servers = config.connections.len(), "config updated");
    Ok(Json(record))
}

async fn delete_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.configs.delete(&id, &state.identity)? {
        return Err(ApiError::not_found(format!("config '{id}' not found")));
    }
    Ok(Json(json!({ "deleted": true })))
}
