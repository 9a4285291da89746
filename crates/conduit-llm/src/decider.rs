use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use conduit_core::decision::{DecisionContext, DecisionProvider, RouteDecision, TextStream};
use conduit_core::errors::OrchestrationError;
use conduit_core::prompt::RenderedPrompt;
use conduit_core::tools::{ToolInvocation, ToolInvocationPlan, ToolInvocationResult};

use crate::client::ChatClient;
use crate::error::LlmError;
use crate::prompts;

/// Decisions backed by a chat-completions model.
pub struct LlmDecider {
    client: ChatClient,
}

impl LlmDecider {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    async fn ask(&self, (system, user): (String, String)) -> Result<Value, OrchestrationError> {
        Ok(self.client.complete_json(&system, &user).await?)
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, OrchestrationError> {
    serde_json::from_value(value).map_err(|e| {
        LlmError::MalformedResponse(format!("{what} does not match the expected shape: {e}")).into()
    })
}

#[async_trait]
impl DecisionProvider for LlmDecider {
    #[instrument(skip_all)]
    async fn route(&self, ctx: &DecisionContext) -> Result<RouteDecision, OrchestrationError> {
        let value = self.ask(prompts::route(ctx)).await?;
        let decision: RouteDecision = decode(value, "route decision")?;
        debug!(use_tools = decision.use_tools, "routed");
        Ok(decision)
    }

    #[instrument(skip_all)]
    async fn plan(&self, ctx: &DecisionContext) -> Result<ToolInvocationPlan, OrchestrationError> {
        let value = self.ask(prompts::plan(ctx)).await?;
        // No `tools` key reads as an empty plan.
        let plan: ToolInvocationPlan = decode(value, "tool plan")?;
        debug!(tools = plan.tools.len(), "planned");
        Ok(plan)
    }

    #[instrument(skip_all, fields(tool = %invocation.tool_name))]
    async fn refine(
        &self,
        ctx: &DecisionContext,
        invocation: &ToolInvocation,
        previous: &[ToolInvocationResult],
    ) -> Result<ToolInvocation, OrchestrationError> {
        let value = self
            .ask(prompts::refine(ctx, invocation, previous))
            .await?;
        // An empty answer means "keep as planned".
        if value.as_object().is_some_and(|o| o.is_empty()) {
            return Ok(invocation.clone());
        }
        decode(value, "refined invocation")
    }

    async fn respond(&self, prompt: &RenderedPrompt) -> Result<TextStream, OrchestrationError> {
        let stream = self.client.stream_text(&prompt.system, &prompt.user).await?;
        Ok(Box::pin(stream.map(|chunk| chunk.map_err(OrchestrationError::from))))
    }
}
