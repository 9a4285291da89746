//! In-process state for the server's unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use conduit_core::connector::{ConnectorFactory, ToolConnector};
use conduit_core::errors::OrchestrationError;
use conduit_core::ids::SessionId;
use conduit_core::mcp_config::McpServerConfig;
use conduit_core::tools::{JsonMap, ToolCatalog, ToolDescriptor, ToolOutput};
use conduit_engine::{CatalogService, EventLog, Orchestrator, OrchestratorConfig, SessionStore};
use conduit_llm::ScriptedDecider;
use conduit_store::{ChatHistoryRepo, ConfigRepo, Database};

use crate::registry::ConnectionRegistry;
use crate::relay::RelayConfig;
use crate::server::AppState;

/// Every server it is asked about exposes a single `lookup` tool.
pub struct EchoConnector;

#[async_trait]
impl ToolConnector for EchoConnector {
    async fn bind(&self, _servers: &[McpServerConfig]) -> Result<(), OrchestrationError> {
        Ok(())
    }

    async fn discover(&self, server_names: &[String]) -> Result<ToolCatalog, OrchestrationError> {
        Ok(server_names
            .iter()
            .map(|name| {
                let tool = ToolDescriptor {
                    server_name: name.clone(),
                    tool_name: "lookup".into(),
                    description: "Look something up".into(),
                    parameters: vec![],
                };
                (name.clone(), vec![tool])
            })
            .collect())
    }

    async fn invoke(
        &self,
        tool_name: &str,
        _input: &JsonMap,
    ) -> Result<ToolOutput, OrchestrationError> {
        Ok(ToolOutput::Text(format!("{tool_name} done")))
    }
}

pub struct EchoFactory;

impl ConnectorFactory for EchoFactory {
    fn create(&self, _session_id: &SessionId) -> Arc<dyn ToolConnector> {
        Arc::new(EchoConnector)
    }
}

pub fn orchestrator(decider: ScriptedDecider) -> Arc<Orchestrator> {
    Orchestrator::new(
        Arc::new(SessionStore::new()),
        Arc::new(CatalogService::new(Arc::new(EchoFactory))),
        Arc::new(decider),
        Arc::new(EventLog::default()),
        OrchestratorConfig::default(),
    )
}

pub fn test_state() -> AppState {
    let db = Database::in_memory().unwrap();
    AppState {
        orchestrator: orchestrator(ScriptedDecider::new()),
        registry: Arc::new(ConnectionRegistry::new(64)),
        history: Arc::new(ChatHistoryRepo::new(db.clone())),
        configs: Arc::new(ConfigRepo::new(db.clone())),
        db,
        relay: RelayConfig {
            block: Duration::from_millis(50),
            ..Default::default()
        },
        identity: Arc::from("default"),
    }
}
