pub mod client;
pub mod decider;
pub mod error;
pub mod prompts;
pub mod sse;

pub mod mock;

pub use client::{ChatClient, ChatClientConfig, RetryPolicy};
pub use decider::LlmDecider;
pub use error::LlmError;
pub use mock::{MockReply, RefineStep, ScriptedDecider};
