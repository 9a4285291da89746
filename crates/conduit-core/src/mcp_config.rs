use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::OrchestrationError;

/// The set of MCP servers a client wants available for its requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub connections: Vec<McpServerConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub transport: McpTransport,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum McpTransport {
    StreamableHttp {
        url: String,
    },
    Sse {
        url: String,
    },
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
}

impl McpServerConfig {
    /// Stable digest of the connection settings. A change means the bound
    /// server must be reconnected.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(&self.transport).unwrap_or_default();
        format!("{:x}", Sha256::digest(bytes))
    }

    fn validate(&self) -> Result<(), OrchestrationError> {
        if self.name.trim().is_empty() {
            return Err(invalid_format("connection name must not be empty"));
        }
        match &self.transport {
            McpTransport::StreamableHttp { url } | McpTransport::Sse { url } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(invalid_format(&format!(
                        "server '{}' url must be http(s), got '{url}'",
                        self.name
                    )));
                }
            }
            McpTransport::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(invalid_format(&format!(
                        "server '{}' has an empty command",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl McpConfig {
    /// Parse and validate the `mcp_config` member of an inbound request.
    pub fn from_value(value: Option<&Value>) -> Result<Self, OrchestrationError> {
        let value = match value {
            Some(v) if v.as_object().is_some_and(|o| !o.is_empty()) => v,
            _ => {
                return Err(OrchestrationError::Validation(
                    "Invalid MCP configuration".into(),
                ))
            }
        };
        let config: McpConfig =
            serde_json::from_value(value.clone()).map_err(|e| invalid_format(&e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), OrchestrationError> {
        let mut seen = HashSet::new();
        for server in &self.connections {
            server.validate()?;
            if !seen.insert(server.name.as_str()) {
                return Err(invalid_format(&format!(
                    "duplicate server name '{}'",
                    server.name
                )));
            }
        }
        Ok(())
    }

    pub fn server_names(&self) -> Vec<String> {
        self.connections.iter().map(|c| c.name.clone()).collect()
    }

    pub fn server(&self, name: &str) -> Option<&McpServerConfig> {
        self.connections.iter().find(|c| c.name == name)
    }
}

fn invalid_format(detail: &str) -> OrchestrationError {
    OrchestrationError::Validation(format!("Invalid MCP config format: {detail}"))
}
