use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use conduit_core::errors::OrchestrationError;
use conduit_store::StoreError;

/// JSON error body `{"error": "..."}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(e: OrchestrationError) -> Self {
        let status = match e {
            OrchestrationError::Validation(_) | OrchestrationError::Parse(_) => {
                StatusCode::BAD_REQUEST
            }
            OrchestrationError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestrationError::RemoteExecution(_) | OrchestrationError::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
        };
        Self::new(status, e.message())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        if let StoreError::NotFound(_) = e {
            return Self::not_found(e.to_string());
        }
        tracing::error!(error = %e, "storage failure");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

/// Required non-empty string member of a JSON body.
pub fn require_str<'a>(body: &'a serde_json::Value, key: &str) -> Result<&'a str, ApiError> {
    body.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{key} is required")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestration_errors_map_to_status() {
        let cases = [
            (OrchestrationError::Validation("v".into()), StatusCode::BAD_REQUEST),
            (OrchestrationError::NotFound("n".into()), StatusCode::NOT_FOUND),
            (OrchestrationError::Transport("t".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
        }
    }

    #[test]
    fn message_drops_classification_prefix() {
        let api = ApiError::from(OrchestrationError::Validation("Invalid MCP configuration".into()));
        assert_eq!(api.message, "Invalid MCP configuration");
    }

    #[test]
    fn require_str_rejects_blank() {
        let body = json!({"title": " ", "session_id": "s"});
        assert_eq!(require_str(&body, "session_id").unwrap(), "s");
        assert_eq!(
            require_str(&body, "title").unwrap_err().message,
            "title is required"
        );
        assert!(require_str(&body, "missing").is_err());
    }
}
