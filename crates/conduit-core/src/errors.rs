/// Error taxonomy shared by the engine, its collaborators and the server.
///
/// Validation, parse and remote-execution failures are recoverable: the
/// engine turns them into a fallback response. Not-found and transport
/// failures end the affected request or connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OrchestrationError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("remote execution failed: {0}")]
    RemoteExecution(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl OrchestrationError {
    /// Whether the engine should recover via a fallback turn.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Parse(_) | Self::RemoteExecution(_)
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::RemoteExecution(_) => "remote_execution",
            Self::Parse(_) => "parse",
            Self::Transport(_) => "transport",
        }
    }

    /// The inner message without the classification prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(m)
            | Self::NotFound(m)
            | Self::RemoteExecution(m)
            | Self::Parse(m)
            | Self::Transport(m) => m,
        }
    }

    pub fn tool_not_found(tool_name: &str) -> Self {
        Self::NotFound(format!("Tool '{tool_name}' not found"))
    }

    pub fn service_not_connected(session_id: &str) -> Self {
        Self::NotFound(format!("MCP service not connected for session {session_id}"))
    }
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
