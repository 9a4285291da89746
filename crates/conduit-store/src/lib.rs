pub mod chat_history;
pub mod configs;
pub mod database;
pub mod error;
pub mod schema;

pub use chat_history::{ChatHistoryRecord, ChatHistoryRepo, ChatHistorySummary};
pub use configs::{ConfigRepo, McpConfigRecord};
pub use database::Database;
pub use error::StoreError;
