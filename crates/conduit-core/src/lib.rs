pub mod connector;
pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod mcp_config;
pub mod messages;
pub mod prompt;
pub mod tools;

pub use errors::OrchestrationError;
