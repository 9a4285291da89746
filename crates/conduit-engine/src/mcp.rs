use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use rmcp::service::RunningService;
use rmcp::RoleClient;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use conduit_core::connector::{ConnectorFactory, ToolConnector};
use conduit_core::errors::OrchestrationError;
use conduit_core::ids::SessionId;
use conduit_core::mcp_config::{McpServerConfig, McpTransport};
use conduit_core::tools::{JsonMap, ToolCatalog, ToolDescriptor, ToolOutput};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type McpClient = RunningService<RoleClient, ()>;

struct BoundServer {
    fingerprint: String,
    client: McpClient,
}

/// Tool connector over the MCP servers of one session.
pub struct McpConnector {
    session_id: SessionId,
    http: reqwest::Client,
    servers: Mutex<HashMap<String, BoundServer>>,
    /// Tool name to the server that advertised it.
    tool_index: RwLock<HashMap<String, String>>,
}

impl McpConnector {
    pub fn new(session_id: SessionId, http: reqwest::Client) -> Self {
        Self {
            session_id,
            http,
            servers: Mutex::new(HashMap::new()),
            tool_index: RwLock::new(HashMap::new()),
        }
    }

    async fn connect(&self, server: &McpServerConfig) -> Result<McpClient, OrchestrationError> {
        use rmcp::transport::sse_client::SseClientConfig;
        use rmcp::transport::{
            ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport,
            TokioChildProcess,
        };
        use rmcp::ServiceExt;

        let failed = |stage: &str, e: &dyn std::fmt::Display| {
            OrchestrationError::Transport(format!("{stage} for MCP server '{}': {e}", server.name))
        };

        match &server.transport {
            McpTransport::StreamableHttp { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.as_str());
                ().serve(transport)
                    .await
                    .map_err(|e| failed("initialize streamable client", &e))
            }
            McpTransport::Sse { url } => {
                let config = SseClientConfig {
                    sse_endpoint: url.clone().into(),
                    ..Default::default()
                };
                let transport = SseClientTransport::start_with_client(self.http.clone(), config)
                    .await
                    .map_err(|e| failed("create SSE transport", &e))?;
                ().serve(transport)
                    .await
                    .map_err(|e| failed("initialize SSE client", &e))
            }
            McpTransport::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let transport = TokioChildProcess::new(
                    tokio::process::Command::new(command).configure(|cmd| {
                        cmd.args(args).envs(env.iter());
                        if let Some(dir) = cwd {
                            cmd.current_dir(dir);
                        }
                    }),
                )
                .map_err(|e| failed("spawn stdio server", &e))?;
                ().serve(transport)
                    .await
                    .map_err(|e| failed("initialize stdio client", &e))
            }
        }
    }
}

/// Descriptors for the tools one server lists.
fn describe_tools(server_name: &str, tools: &[Tool]) -> Vec<ToolDescriptor> {
    tools
        .iter()
        .map(|tool| {
            ToolDescriptor::from_input_schema(
                server_name,
                tool.name.to_string(),
                tool.description.as_deref().unwrap_or_default(),
                &tool.input_schema,
            )
        })
        .collect()
}

/// Structured content wins; otherwise the text parts, parsed as JSON when
/// they form an object.
fn output_from_result(result: CallToolResult) -> Result<ToolOutput, OrchestrationError> {
    let text = result
        .content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    if result.is_error.unwrap_or(false) {
        let detail = if text.is_empty() {
            "tool reported an error".to_string()
        } else {
            text
        };
        return Err(OrchestrationError::RemoteExecution(detail));
    }

    if let Some(structured) = result.structured_content {
        return Ok(ToolOutput::Structured(structured));
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Object(_)) => Ok(ToolOutput::Structured(value)),
        _ => Ok(ToolOutput::Text(text)),
    }
}

#[async_trait]
impl ToolConnector for McpConnector {
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    async fn bind(&self, servers: &[McpServerConfig]) -> Result<(), OrchestrationError> {
        let mut bound = self.servers.lock().await;
        for server in servers {
            let fingerprint = server.fingerprint();
            if bound
                .get(&server.name)
                .is_some_and(|b| b.fingerprint == fingerprint)
            {
                continue;
            }

            if let Some(old) = bound.remove(&server.name) {
                info!(server = %server.name, "MCP server settings changed, reconnecting");
                self.tool_index.write().retain(|_, owner| *owner != server.name);
                if let Err(e) = old.client.cancel().await {
                    debug!(server = %server.name, error = %e, "closing previous MCP client");
                }
            }

            match tokio::time::timeout(CONNECT_TIMEOUT, self.connect(server)).await {
                Ok(Ok(client)) => {
                    info!(server = %server.name, "MCP server connected");
                    bound.insert(
                        server.name.clone(),
                        BoundServer {
                            fingerprint,
                            client,
                        },
                    );
                }
                Ok(Err(e)) => warn!(server = %server.name, error = %e, "MCP server unavailable"),
                Err(_) => warn!(server = %server.name, "MCP server connection timed out"),
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(session_id = %self.session_id))]
    async fn discover(&self, server_names: &[String]) -> Result<ToolCatalog, OrchestrationError> {
        let peers: Vec<_> = {
            let bound = self.servers.lock().await;
            server_names
                .iter()
                .filter_map(|name| {
                    bound
                        .get(name)
                        .map(|b| (name.clone(), b.client.peer().clone()))
                })
                .collect()
        };

        let mut catalog = ToolCatalog::new();
        for (name, peer) in peers {
            match peer.list_all_tools().await {
                Ok(tools) if tools.is_empty() => {
                    debug!(server = %name, "MCP server lists no tools");
                }
                Ok(tools) => {
                    let descriptors = describe_tools(&name, &tools);
                    {
                        let mut index = self.tool_index.write();
                        for d in &descriptors {
                            index.insert(d.tool_name.clone(), name.clone());
                        }
                    }
                    info!(server = %name, tools = descriptors.len(), "MCP tools discovered");
                    catalog.insert_server(name, descriptors);
                }
                Err(e) => warn!(server = %name, error = %e, "listing MCP tools failed"),
            }
        }
        Ok(catalog)
    }

    #[instrument(skip(self, input), fields(session_id = %self.session_id))]
    async fn invoke(
        &self,
        tool_name: &str,
        input: &JsonMap,
    ) -> Result<ToolOutput, OrchestrationError> {
        let server = self
            .tool_index
            .read()
            .get(tool_name)
            .cloned()
            .ok_or_else(|| OrchestrationError::tool_not_found(tool_name))?;
        let peer = {
            let bound = self.servers.lock().await;
            bound
                .get(&server)
                .map(|b| b.client.peer().clone())
                .ok_or_else(|| OrchestrationError::tool_not_found(tool_name))?
        };

        let result = peer
            .call_tool(CallToolRequestParam {
                name: tool_name.to_string().into(),
                arguments: Some(input.clone()),
            })
            .await
            .map_err(|e| OrchestrationError::RemoteExecution(e.to_string()))?;
        output_from_result(result)
    }

    async fn shutdown(&self) {
        let drained: Vec<_> = self.servers.lock().await.drain().collect();
        for (name, server) in drained {
            if let Err(e) = server.client.cancel().await {
                debug!(server = %name, error = %e, "closing MCP client");
            }
        }
        self.tool_index.write().clear();
    }
}

/// Builds one MCP connector per session, sharing an HTTP client.
#[derive(Clone, Default)]
pub struct McpConnectorFactory {
    http: reqwest::Client,
}

impl McpConnectorFactory {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl ConnectorFactory for McpConnectorFactory {
    fn create(&self, session_id: &SessionId) -> Arc<dyn ToolConnector> {
        Arc::new(McpConnector::new(session_id.clone(), self.http.clone()))
    }
}
