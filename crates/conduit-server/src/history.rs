//! `/chat/history` routes: save, list, fetch, delete and restore
//! conversations for the configured identity.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::info;

use conduit_core::ids::SessionId;
use conduit_store::{ChatHistoryRecord, ChatHistorySummary};

use crate::error::{require_str, ApiError};
use crate::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/chat/history", get(list_histories).post(save_history))
        .route(
            "/chat/history/{title}",
            get(get_history).delete(delete_history),
        )
        .route("/chat/history/{title}/restore", post(restore_history))
}

async fn list_histories(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChatHistorySummary>>, ApiError> {
    Ok(Json(state.history.list(&state.identity)?))
}

async fn save_history(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<ChatHistoryRecord>), ApiError> {
    let title = require_str(&body, "title")?;
    let session_id = SessionId::from_raw(require_str(&body, "session_id")?);

    let messages = state.orchestrator.sessions().history(&session_id);
    if messages.is_empty() {
        return Err(ApiError::bad_request(format!(
            "session {session_id} has no messages"
        )));
    }
    let record = state.history.save(title, &state.identity, &messages)?;
    info!(title, session_id = %session_id, count = messages.len(), "chat history saved");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_history(
    State(state): State<AppState>,
    Path(title): Path<String>,
) -> Result<Json<ChatHistoryRecord>, ApiError> {
    Ok(Json(state.history.get(&title, &state.identity)?))
}

async fn delete_history(
    State(state): State<AppState>,
    Path(title): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.history.delete(&title, &state.identity)? {
        return Err(ApiError::not_found(format!("chat history '{title}' not found")));
    }
    Ok(Json(json!({ "deleted": true })))
}

async fn restore_history(
    State(state): State<AppState>,
    Path(title): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let session_id = SessionId::from_raw(require_str(&body, "session_id")?);
    let record = state.history.get(&title, &state.identity)?;
    let restored = record.messages.len();
    state
        .orchestrator
        .sessions()
        .extend(&session_id, record.messages);
    info!(title = %title, session_id = %session_id, restored, "chat history restored");
    Ok(Json(json!({
        "session_id": session_id.as_str(),
        "restored": restored,
    })))
}
