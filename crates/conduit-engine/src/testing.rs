//! Scripted collaborators shared by the engine's unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use conduit_core::connector::{ConnectorFactory, ToolConnector};
use conduit_core::errors::OrchestrationError;
use conduit_core::ids::SessionId;
use conduit_core::mcp_config::{McpConfig, McpServerConfig, McpTransport};
use conduit_core::tools::{JsonMap, ToolCatalog, ToolDescriptor, ToolOutput};

/// Connector whose servers, tools and outputs are fixed up front.
#[derive(Default)]
pub struct MockConnector {
    servers: HashMap<String, Vec<String>>,
    outputs: HashMap<String, Result<ToolOutput, OrchestrationError>>,
    pub discover_calls: Mutex<Vec<Vec<String>>>,
    pub invoke_calls: Mutex<Vec<(String, JsonMap)>>,
    pub bind_calls: Mutex<usize>,
    /// Server name to the fingerprint it was last bound with.
    bound: Mutex<HashMap<String, String>>,
    /// Tool name to owning server, filled by discovery.
    tool_index: Mutex<HashMap<String, String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, server: &str, tools: &[&str]) -> Self {
        self.servers.insert(
            server.to_string(),
            tools.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_output(mut self, tool: &str, output: ToolOutput) -> Self {
        self.outputs.insert(tool.to_string(), Ok(output));
        self
    }

    pub fn with_failure(mut self, tool: &str, err: OrchestrationError) -> Self {
        self.outputs.insert(tool.to_string(), Err(err));
        self
    }

    pub fn invoked_tools(&self) -> Vec<String> {
        self.invoke_calls
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl ToolConnector for MockConnector {
    async fn bind(&self, servers: &[McpServerConfig]) -> Result<(), OrchestrationError> {
        *self.bind_calls.lock() += 1;
        let mut bound = self.bound.lock();
        for server in servers {
            let fingerprint = server.fingerprint();
            let previous = bound.insert(server.name.clone(), fingerprint.clone());
            if previous.is_some_and(|fp| fp != fingerprint) {
                self.tool_index
                    .lock()
                    .retain(|_, owner| *owner != server.name);
            }
        }
        Ok(())
    }

    async fn discover(&self, server_names: &[String]) -> Result<ToolCatalog, OrchestrationError> {
        self.discover_calls.lock().push(server_names.to_vec());
        Ok(server_names
            .iter()
            .filter_map(|name| {
                let tools = self.servers.get(name)?;
                let descriptors = tools
                    .iter()
                    .map(|t| ToolDescriptor {
                        server_name: name.clone(),
                        tool_name: t.clone(),
                        description: format!("{t} tool"),
                        parameters: vec![],
                    })
                    .collect();
                let mut index = self.tool_index.lock();
                for t in tools {
                    index.insert(t.clone(), name.clone());
                }
                Some((name.clone(), descriptors))
            })
            .collect())
    }

    async fn invoke(
        &self,
        tool_name: &str,
        input: &JsonMap,
    ) -> Result<ToolOutput, OrchestrationError> {
        self.invoke_calls
            .lock()
            .push((tool_name.to_string(), input.clone()));
        match self.outputs.get(tool_name) {
            Some(result) => result.clone(),
            None if self.tool_index.lock().contains_key(tool_name) => {
                Ok(ToolOutput::Text(format!("{tool_name} done")))
            }
            None => Err(OrchestrationError::tool_not_found(tool_name)),
        }
    }
}

/// Hands the same connector to every session.
pub struct SharedFactory(pub Arc<MockConnector>);

impl ConnectorFactory for SharedFactory {
    fn create(&self, _session_id: &SessionId) -> Arc<dyn ToolConnector> {
        self.0.clone()
    }
}

pub fn http_server(name: &str) -> McpServerConfig {
    McpServerConfig {
        name: name.to_string(),
        description: None,
        transport: McpTransport::StreamableHttp {
            url: format!("http://localhost/{name}/mcp"),
        },
    }
}

pub fn config_for(names: &[&str]) -> McpConfig {
    McpConfig {
        connections: names.iter().map(|n| http_server(n)).collect(),
    }
}
