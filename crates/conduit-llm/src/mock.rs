use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use conduit_core::decision::{DecisionContext, DecisionProvider, RouteDecision, TextStream};
use conduit_core::errors::OrchestrationError;
use conduit_core::prompt::RenderedPrompt;
use conduit_core::tools::{ToolInvocation, ToolInvocationPlan, ToolInvocationResult};

/// What `refine` does for one call.
#[derive(Clone, Debug)]
pub enum RefineStep {
    /// Return the invocation unchanged.
    Echo,
    Replace(ToolInvocation),
    Fail(OrchestrationError),
}

/// What `respond` does for one call.
#[derive(Clone, Debug)]
pub enum MockReply {
    Chunks(Vec<String>),
    /// Yield the chunks, then a stream error.
    ChunksThenError(Vec<String>, OrchestrationError),
    /// Fail before any chunk.
    Fail(OrchestrationError),
}

impl MockReply {
    pub fn text(chunks: &[&str]) -> Self {
        Self::Chunks(chunks.iter().map(|c| c.to_string()).collect())
    }
}

/// Decision provider with pre-programmed answers, consumed in order.
///
/// When a queue runs dry: route says "no tools", plan is empty, refine
/// echoes and respond yields `"ok"`.
#[derive(Default)]
pub struct ScriptedDecider {
    routes: Mutex<VecDeque<Result<RouteDecision, OrchestrationError>>>,
    plans: Mutex<VecDeque<Result<ToolInvocationPlan, OrchestrationError>>>,
    refines: Mutex<VecDeque<RefineStep>>,
    replies: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<RenderedPrompt>>,
    refine_calls: Mutex<Vec<(ToolInvocation, usize)>>,
    route_calls: AtomicUsize,
    plan_calls: AtomicUsize,
}

impl ScriptedDecider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(self, use_tools: bool) -> Self {
        self.routes.lock().push_back(Ok(RouteDecision { use_tools }));
        self
    }

    pub fn with_route_error(self, err: OrchestrationError) -> Self {
        self.routes.lock().push_back(Err(err));
        self
    }

    pub fn with_plan(self, tools: Vec<ToolInvocation>) -> Self {
        self.plans.lock().push_back(Ok(ToolInvocationPlan { tools }));
        self
    }

    pub fn with_plan_error(self, err: OrchestrationError) -> Self {
        self.plans.lock().push_back(Err(err));
        self
    }

    pub fn with_refine(self, step: RefineStep) -> Self {
        self.refines.lock().push_back(step);
        self
    }

    pub fn with_reply(self, reply: MockReply) -> Self {
        self.replies.lock().push_back(reply);
        self
    }

    /// Prompts passed to `respond`, oldest first.
    pub fn prompts(&self) -> Vec<RenderedPrompt> {
        self.prompts.lock().clone()
    }

    /// Each refine call: the invocation as planned and how many earlier
    /// results it saw.
    pub fn refine_calls(&self) -> Vec<(ToolInvocation, usize)> {
        self.refine_calls.lock().clone()
    }

    pub fn route_calls(&self) -> usize {
        self.route_calls.load(Ordering::Relaxed)
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DecisionProvider for ScriptedDecider {
    async fn route(&self, _ctx: &DecisionContext) -> Result<RouteDecision, OrchestrationError> {
        self.route_calls.fetch_add(1, Ordering::Relaxed);
        self.routes
            .lock()
            .pop_front()
            .unwrap_or(Ok(RouteDecision { use_tools: false }))
    }

    async fn plan(&self, _ctx: &DecisionContext) -> Result<ToolInvocationPlan, OrchestrationError> {
        self.plan_calls.fetch_add(1, Ordering::Relaxed);
        self.plans
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(ToolInvocationPlan::default()))
    }

    async fn refine(
        &self,
        _ctx: &DecisionContext,
        invocation: &ToolInvocation,
        previous: &[ToolInvocationResult],
    ) -> Result<ToolInvocation, OrchestrationError> {
        self.refine_calls
            .lock()
            .push((invocation.clone(), previous.len()));
        let step = self.refines.lock().pop_front().unwrap_or(RefineStep::Echo);
        match step {
            RefineStep::Echo => Ok(invocation.clone()),
            RefineStep::Replace(next) => Ok(next),
            RefineStep::Fail(err) => Err(err),
        }
    }

    async fn respond(&self, prompt: &RenderedPrompt) -> Result<TextStream, OrchestrationError> {
        self.prompts.lock().push(prompt.clone());
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| MockReply::text(&["ok"]));

        let items: Vec<Result<String, OrchestrationError>> = match reply {
            MockReply::Chunks(chunks) => chunks.into_iter().map(Ok).collect(),
            MockReply::ChunksThenError(chunks, err) => chunks
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(err)))
                .collect(),
            MockReply::Fail(err) => return Err(err),
        };
        Ok(Box::pin(stream::iter(items)))
    }
}
