use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestrationError;
use crate::messages::{history_to_text, ChatMessage};
use crate::prompt::RenderedPrompt;
use crate::tools::{ToolInvocation, ToolInvocationPlan, ToolInvocationResult};

/// Streamed response text. Each item is one chunk.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, OrchestrationError>> + Send>>;

/// What a decision sees about the current request.
#[derive(Clone, Debug, Default)]
pub struct DecisionContext {
    pub input: String,
    pub history: Vec<ChatMessage>,
    pub catalog_text: String,
}

impl DecisionContext {
    pub fn history_text(&self) -> String {
        history_to_text(&self.history)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub use_tools: bool,
}

/// Opaque decision capability backing the workflow.
///
/// Implementations return `OrchestrationError::Parse` when a model response
/// does not match the expected shape.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn route(&self, ctx: &DecisionContext) -> Result<RouteDecision, OrchestrationError>;

    async fn plan(&self, ctx: &DecisionContext) -> Result<ToolInvocationPlan, OrchestrationError>;

    /// Adjust one invocation's input given what earlier steps produced.
    async fn refine(
        &self,
        ctx: &DecisionContext,
        invocation: &ToolInvocation,
        previous: &[ToolInvocationResult],
    ) -> Result<ToolInvocation, OrchestrationError>;

    async fn respond(&self, prompt: &RenderedPrompt) -> Result<TextStream, OrchestrationError>;
}
