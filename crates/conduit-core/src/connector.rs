use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::OrchestrationError;
use crate::ids::SessionId;
use crate::mcp_config::McpServerConfig;
use crate::tools::{JsonMap, ToolCatalog, ToolOutput};

/// Executes tools hosted on a session's MCP servers.
#[async_trait]
pub trait ToolConnector: Send + Sync {
    /// Connect any servers that are new or whose settings changed.
    async fn bind(&self, servers: &[McpServerConfig]) -> Result<(), OrchestrationError>;

    /// Tool descriptors for the named servers. Servers that fail or expose no
    /// tools are left out of the result.
    async fn discover(&self, server_names: &[String]) -> Result<ToolCatalog, OrchestrationError>;

    async fn invoke(
        &self,
        tool_name: &str,
        input: &JsonMap,
    ) -> Result<ToolOutput, OrchestrationError>;

    /// Close every server connection.
    async fn shutdown(&self) {}
}

/// Creates one connector per session.
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, session_id: &SessionId) -> Arc<dyn ToolConnector>;
}
