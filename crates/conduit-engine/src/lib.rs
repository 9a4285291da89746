pub mod broker;
pub mod catalog;
pub mod mcp;
pub mod responder;
pub mod session;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use broker::{start_sweeper, BrokerError, EventLog, TailBatch};
pub use catalog::{CatalogService, ToolCatalogCache};
pub use mcp::{McpConnector, McpConnectorFactory};
pub use session::SessionStore;
pub use workflow::{Orchestrator, OrchestratorConfig, Outcome, Submission, SubmitRequest};
