use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{info, instrument, warn};

use conduit_core::connector::ToolConnector;
use conduit_core::decision::{DecisionContext, DecisionProvider};
use conduit_core::errors::OrchestrationError;
use conduit_core::events::{EventKind, PROGRESS_AGENT};
use conduit_core::ids::{ChannelName, ChannelPurpose, SessionId};
use conduit_core::mcp_config::McpConfig;
use conduit_core::messages::{history_to_text, ChatMessage};
use conduit_core::prompt::{fallback_diagnostic, ResponseContext, ResponseKind};
use conduit_core::tools::{format_summary, ToolInvocation, ToolInvocationResult};

use crate::broker::EventLog;
use crate::catalog::CatalogService;
use crate::responder::{ChannelWriter, Responder};
use crate::session::SessionStore;

const NO_TOOL_MATCHED: &str = "no tool matched the request";

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Messages of recent history given to each decision.
    pub tail_messages: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { tail_messages: 10 }
    }
}

#[derive(Clone, Debug)]
pub struct SubmitRequest {
    pub session_id: SessionId,
    pub user_input: String,
    pub mcp_config: McpConfig,
}

/// The channel a submitted request reports on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub channel: ChannelName,
}

/// How a workflow ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Responded,
    Summarized,
    FallbackResponded,
    Failed,
}

/// Everything one workflow run needs, owned so it can move into a task.
struct Run {
    writer: ChannelWriter,
    session_id: SessionId,
    input: String,
    catalog_text: String,
}

/// Routes requests, executes ranked tool plans and streams responses.
///
/// `submit` routes synchronously and returns the request's channel. The rest
/// of the workflow runs on a tracked background task and reports on that
/// channel, ending with exactly one terminal event.
pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    catalog: Arc<CatalogService>,
    decider: Arc<dyn DecisionProvider>,
    log: Arc<EventLog>,
    responder: Arc<Responder>,
    tracker: TaskTracker,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        catalog: Arc<CatalogService>,
        decider: Arc<dyn DecisionProvider>,
        log: Arc<EventLog>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let responder = Arc::new(Responder::new(decider.clone(), sessions.clone()));
        Arc::new(Self {
            sessions,
            catalog,
            decider,
            log,
            responder,
            tracker: TaskTracker::new(),
            config,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn catalog(&self) -> &Arc<CatalogService> {
        &self.catalog
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Workflows still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait for running workflows.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn decision_context(
        &self,
        session_id: &SessionId,
        input: &str,
        catalog_text: &str,
    ) -> DecisionContext {
        DecisionContext {
            input: input.to_string(),
            history: self.sessions.tail(session_id, self.config.tail_messages),
            catalog_text: catalog_text.to_string(),
        }
    }

    fn response_context(&self, run: &Run) -> ResponseContext {
        ResponseContext {
            input: run.input.clone(),
            history_text: history_to_text(
                &self.sessions.tail(&run.session_id, self.config.tail_messages),
            ),
            catalog_text: run.catalog_text.clone(),
            diagnostic: None,
            final_result: None,
        }
    }

    fn open_run(
        &self,
        session_id: &SessionId,
        purpose: ChannelPurpose,
        input: &str,
        catalog_text: String,
    ) -> Run {
        let channel = ChannelName::allocate(purpose, session_id);
        Run {
            writer: ChannelWriter::new(self.log.clone(), session_id.clone(), channel),
            session_id: session_id.clone(),
            input: input.to_string(),
            catalog_text,
        }
    }

    /// Validate, refresh the catalog and route. The chosen path runs in the
    /// background; the returned channel carries its events.
    #[instrument(skip_all, fields(session_id = %request.session_id))]
    pub async fn submit(
        self: &Arc<Self>,
        request: SubmitRequest,
    ) -> Result<Submission, OrchestrationError> {
        if request.user_input.trim().is_empty() {
            return Err(OrchestrationError::Validation("User input is missing".into()));
        }
        request.mcp_config.validate()?;
        let session_id = request.session_id;
        self.sessions.get_or_create(&session_id);

        let refreshed = self
            .catalog
            .refresh_missing(&session_id, &request.mcp_config)
            .await;
        let catalog = match refreshed {
            Ok(catalog) => catalog,
            Err(e) if e.is_recoverable() => {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    "catalog refresh failed, using cached tools"
                );
                self.catalog.cache().get(&session_id)
            }
            Err(e) => {
                let run = self.open_run(
                    &session_id,
                    ChannelPurpose::ChatResponse,
                    &request.user_input,
                    String::new(),
                );
                warn!(
                    session_id = %session_id,
                    channel = %run.writer.channel(),
                    error = %e,
                    "catalog refresh failed"
                );
                run.writer.error(PROGRESS_AGENT, &e);
                return Ok(Submission {
                    channel: run.writer.channel().clone(),
                });
            }
        };
        let catalog_text = catalog.render();

        let route = self
            .decider
            .route(&self.decision_context(&session_id, &request.user_input, &catalog_text))
            .await;

        let purpose = match &route {
            Ok(decision) if decision.use_tools => ChannelPurpose::ToolOrchestration,
            _ => ChannelPurpose::ChatResponse,
        };
        let run = self.open_run(&session_id, purpose, &request.user_input, catalog_text);
        let submission = Submission {
            channel: run.writer.channel().clone(),
        };
        info!(
            session_id = %session_id,
            channel = %submission.channel,
            route = purpose.as_str(),
            "request accepted"
        );

        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            let outcome = match route {
                Ok(decision) if decision.use_tools => this.run_tools(&run).await,
                Ok(_) => this.respond_directly(&run).await,
                Err(e) => this.recover_or_fail(&run, e).await,
            };
            info!(
                session_id = %run.session_id,
                channel = %run.writer.channel(),
                ?outcome,
                "workflow finished"
            );
        });

        Ok(submission)
    }

    async fn respond_directly(&self, run: &Run) -> Outcome {
        let ctx = self.response_context(run);
        match self
            .responder
            .respond(&run.writer, ResponseKind::Conversational, &ctx)
            .await
        {
            Ok(_) => Outcome::Responded,
            Err(_) => Outcome::Failed,
        }
    }

    async fn fallback(&self, run: &Run, error: Option<String>) -> Outcome {
        let mut ctx = self.response_context(run);
        ctx.diagnostic = Some(fallback_diagnostic(&run.input, error.as_deref()));
        match self
            .responder
            .respond(&run.writer, ResponseKind::Conversational, &ctx)
            .await
        {
            Ok(_) => Outcome::FallbackResponded,
            Err(_) => Outcome::Failed,
        }
    }

    async fn run_tools(&self, run: &Run) -> Outcome {
        let connector = match self.catalog.connector(&run.session_id) {
            Ok(c) => c,
            Err(e) => {
                warn!(session_id = %run.session_id, error = %e, "no connector for session");
                run.writer.error(PROGRESS_AGENT, &e);
                return Outcome::Failed;
            }
        };

        let ctx = self.decision_context(&run.session_id, &run.input, &run.catalog_text);
        let planned = self
            .decider
            .plan(&ctx)
            .await
            .and_then(|plan| plan.into_ordered());
        let ordered = match planned {
            Ok(tools) if tools.is_empty() => {
                info!(channel = %run.writer.channel(), "empty plan");
                return self.fallback(run, Some(NO_TOOL_MATCHED.into())).await;
            }
            Ok(tools) => tools,
            Err(e) => return self.recover_or_fail(run, e).await,
        };

        // Any failed step, whatever its class, ends in the fallback reply.
        match self.execute(run, &ctx, connector.as_ref(), ordered).await {
            Ok(results) => self.summarize(run, &results).await,
            Err(e) => self.fallback(run, Some(e.message().to_string())).await,
        }
    }

    /// Run each invocation in rank order, stopping at the first failure.
    async fn execute(
        &self,
        run: &Run,
        ctx: &DecisionContext,
        connector: &dyn ToolConnector,
        ordered: Vec<ToolInvocation>,
    ) -> Result<Vec<ToolInvocationResult>, OrchestrationError> {
        let total = ordered.len() as u32;
        run.writer.emit(
            PROGRESS_AGENT,
            EventKind::ProgressUpdate {
                tool_name: "workflow_start".into(),
                step: 0,
                total,
                message: format!("Starting workflow with {total} tool invocations..."),
            },
        );

        let mut results: Vec<ToolInvocationResult> = Vec::with_capacity(ordered.len());
        for (idx, planned) in ordered.into_iter().enumerate() {
            let step = idx as u32 + 1;
            run.writer.emit(
                PROGRESS_AGENT,
                EventKind::ProgressUpdate {
                    tool_name: planned.tool_name.clone(),
                    step,
                    total,
                    message: format!("Executing {}...", planned.tool_name),
                },
            );

            let tool_failed = |e: OrchestrationError| {
                warn!(
                    channel = %run.writer.channel(),
                    tool_name = %planned.tool_name,
                    step,
                    error = %e,
                    "tool step failed"
                );
                with_tool_context(&planned.tool_name, e)
            };

            let mut refined = self
                .decider
                .refine(ctx, &planned, &results)
                .await
                .map_err(tool_failed)?;
            refined.tool_name = planned.tool_name.clone();
            refined.rank = planned.rank;

            let output = connector
                .invoke(&refined.tool_name, &refined.input_data)
                .await
                .map_err(tool_failed)?;

            self.sessions.extend(
                &run.session_id,
                [
                    ChatMessage::user(&run.input),
                    ChatMessage::assistant(output.to_json_string()),
                ],
            );
            results.push(ToolInvocationResult {
                tool_name: refined.tool_name,
                input_data: refined.input_data,
                output,
                error: None,
            });
        }
        Ok(results)
    }

    async fn summarize(&self, run: &Run, results: &[ToolInvocationResult]) -> Outcome {
        let mut ctx = self.response_context(run);
        ctx.final_result = Some(format_summary(results));
        match self
            .responder
            .respond(&run.writer, ResponseKind::Summarizing, &ctx)
            .await
        {
            Ok(_) => Outcome::Summarized,
            Err(_) => Outcome::Failed,
        }
    }

    async fn recover_or_fail(&self, run: &Run, err: OrchestrationError) -> Outcome {
        if err.is_recoverable() {
            return self.fallback(run, Some(err.message().to_string())).await;
        }
        warn!(channel = %run.writer.channel(), error = %err, "workflow failed");
        run.writer.error(PROGRESS_AGENT, &err);
        Outcome::Failed
    }
}

/// Prefix an error with the failing tool, keeping its classification.
fn with_tool_context(tool_name: &str, err: OrchestrationError) -> OrchestrationError {
    let message = format!("Tool '{tool_name}' failed: {}", err.message());
    match err {
        OrchestrationError::Validation(_) => OrchestrationError::Validation(message),
        OrchestrationError::NotFound(_) => OrchestrationError::NotFound(message),
        OrchestrationError::RemoteExecution(_) => OrchestrationError::RemoteExecution(message),
        OrchestrationError::Parse(_) => OrchestrationError::Parse(message),
        OrchestrationError::Transport(_) => OrchestrationError::Transport(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use conduit_core::events::StreamEvent;
    use conduit_core::ids::EntryId;
    use conduit_core::tools::{JsonMap, ToolOutput};
    use conduit_llm::mock::{MockReply, RefineStep, ScriptedDecider};
    use serde_json::json;

    use crate::testing::{config_for, MockConnector, SharedFactory};

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        decider: Arc<ScriptedDecider>,
        connector: Arc<MockConnector>,
        session: SessionId,
    }

    fn harness(decider: ScriptedDecider, connector: MockConnector) -> Harness {
        let decider = Arc::new(decider);
        let connector = Arc::new(connector);
        let orchestrator = Orchestrator::new(
            Arc::new(SessionStore::new()),
            Arc::new(CatalogService::new(Arc::new(SharedFactory(connector.clone())))),
            decider.clone(),
            Arc::new(EventLog::default()),
            OrchestratorConfig::default(),
        );
        Harness {
            orchestrator,
            decider,
            connector,
            session: SessionId::from_raw("s1"),
        }
    }

    fn tools_connector() -> MockConnector {
        MockConnector::new().with_server("srv", &["A", "B", "C"])
    }

    fn inv(tool: &str, rank: u32) -> ToolInvocation {
        ToolInvocation {
            tool_name: tool.into(),
            input_data: JsonMap::new(),
            rank,
        }
    }

    impl Harness {
        /// Submit, wait for the workflow, return the channel's events.
        async fn run(&self, input: &str) -> (ChannelName, Vec<StreamEvent>) {
            let submission = self
                .orchestrator
                .submit(SubmitRequest {
                    session_id: self.session.clone(),
                    user_input: input.into(),
                    mcp_config: config_for(&["srv"]),
                })
                .await
                .unwrap();
            self.orchestrator.shutdown().await;
            let batch = self
                .orchestrator
                .log()
                .tail(&submission.channel, EntryId::ZERO, 1000, Duration::ZERO)
                .await;
            (
                submission.channel,
                batch.entries.into_iter().map(|(_, e)| e).collect(),
            )
        }

        fn history_len(&self) -> usize {
            self.orchestrator.sessions().len(&self.session)
        }
    }

    fn labels(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind.label()).collect()
    }

    fn terminal_count(events: &[StreamEvent]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    #[tokio::test]
    async fn no_tools_streams_a_conversational_reply() {
        let h = harness(
            ScriptedDecider::new()
                .with_route(false)
                .with_reply(MockReply::text(&["Why did", " the crab..."])),
            tools_connector(),
        );

        let (channel, events) = h.run("tell me a joke").await;
        assert_eq!(channel.purpose(), Some(ChannelPurpose::ChatResponse));
        assert_eq!(
            labels(&events),
            vec!["started", "streaming", "streaming", "complete"]
        );
        assert!(events.iter().all(|e| e.agent_name == "chat_agent"));
        assert_eq!(h.history_len(), 2);
        assert_eq!(h.decider.plan_calls(), 0);
        assert!(h.connector.invoked_tools().is_empty());
    }

    #[tokio::test]
    async fn tools_run_in_rank_order_then_summarize() {
        let h = harness(
            ScriptedDecider::new()
                .with_route(true)
                .with_plan(vec![inv("C", 3), inv("A", 1), inv("B", 2)])
                .with_reply(MockReply::text(&["summary"])),
            tools_connector().with_output("B", ToolOutput::Structured(json!({"result": "bee"}))),
        );

        let (channel, events) = h.run("do all three").await;
        assert_eq!(channel.purpose(), Some(ChannelPurpose::ToolOrchestration));
        assert_eq!(h.connector.invoked_tools(), vec!["A", "B", "C"]);

        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::ProgressUpdate {
                    tool_name, step, total, ..
                } => Some((tool_name.as_str(), *step, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(
            progress,
            vec![("workflow_start", 0, 3), ("A", 1, 3), ("B", 2, 3), ("C", 3, 3)]
        );
        assert_eq!(labels(&events).last(), Some(&"complete"));
        assert_eq!(events.last().unwrap().agent_name, "summary_agent");
        assert_eq!(terminal_count(&events), 1);

        // Each earlier result is visible to the next refinement.
        let seen: Vec<usize> = h.decider.refine_calls().iter().map(|(_, n)| *n).collect();
        assert_eq!(seen, vec![0, 1, 2]);

        let prompt = h.decider.prompts().pop().unwrap();
        assert!(prompt
            .user
            .contains("Tool 'A' executed: A done\nTool 'B' executed: bee\nTool 'C' executed: C done"));
        // Three tool turns plus the summary turn.
        assert_eq!(h.history_len(), 8);
    }

    #[tokio::test]
    async fn refine_cannot_rename_or_rerank() {
        let mut replaced = inv("somethingElse", 7);
        replaced.input_data.insert("q".into(), json!("refined"));
        let h = harness(
            ScriptedDecider::new()
                .with_route(true)
                .with_plan(vec![inv("A", 1)])
                .with_refine(RefineStep::Replace(replaced)),
            tools_connector(),
        );

        h.run("go").await;
        let calls = h.connector.invoke_calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "A");
        assert_eq!(calls[0].1["q"], "refined");
    }

    #[tokio::test]
    async fn failed_invoke_stops_later_ranks_and_falls_back() {
        let h = harness(
            ScriptedDecider::new()
                .with_route(true)
                .with_plan(vec![inv("A", 1), inv("B", 2)])
                .with_reply(MockReply::text(&["Sorry, A broke."])),
            tools_connector().with_failure(
                "A",
                OrchestrationError::RemoteExecution("upstream 500".into()),
            ),
        );

        let (_, events) = h.run("A then B").await;
        assert_eq!(h.connector.invoked_tools(), vec!["A"]);
        assert_eq!(terminal_count(&events), 1);
        let last = events.last().unwrap();
        assert_eq!(last.kind.label(), "complete");
        assert_eq!(last.agent_name, "chat_agent");

        let prompt = h.decider.prompts().pop().unwrap();
        assert!(prompt.user.contains("Error details: Tool 'A' failed: upstream 500"));
        assert_eq!(h.history_len(), 2);
    }

    #[tokio::test]
    async fn refine_parse_error_falls_back_without_invoking() {
        let h = harness(
            ScriptedDecider::new()
                .with_route(true)
                .with_plan(vec![inv("A", 1)])
                .with_refine(RefineStep::Fail(OrchestrationError::Parse("not json".into()))),
            tools_connector(),
        );

        let (_, events) = h.run("go").await;
        assert!(h.connector.invoked_tools().is_empty());
        assert_eq!(labels(&events).last(), Some(&"complete"));
    }

    #[tokio::test]
    async fn empty_plan_falls_back_with_no_match_context() {
        let h = harness(
            ScriptedDecider::new().with_route(true).with_plan(vec![]),
            tools_connector(),
        );

        let (_, events) = h.run("something odd").await;
        assert!(h.connector.invoked_tools().is_empty());
        assert_eq!(labels(&events), vec!["started", "streaming", "complete"]);
        let prompt = h.decider.prompts().pop().unwrap();
        assert!(prompt.user.contains("no tool matched the request"));
    }

    #[tokio::test]
    async fn rank_zero_plan_falls_back() {
        let h = harness(
            ScriptedDecider::new()
                .with_route(true)
                .with_plan(vec![inv("A", 0)]),
            tools_connector(),
        );
        let (_, events) = h.run("go").await;
        assert!(h.connector.invoked_tools().is_empty());
        assert_eq!(labels(&events).last(), Some(&"complete"));
    }

    #[tokio::test]
    async fn unknown_tool_falls_back_with_apology() {
        let h = harness(
            ScriptedDecider::new()
                .with_route(true)
                .with_plan(vec![inv("ghost", 1)])
                .with_reply(MockReply::text(&["No such tool, sorry."])),
            tools_connector(),
        );

        let (_, events) = h.run("call ghost").await;
        let last = events.last().unwrap();
        assert_eq!(terminal_count(&events), 1);
        assert_eq!(last.kind.label(), "complete");
        assert_eq!(last.agent_name, "chat_agent");
        assert!(!events.iter().any(|e| matches!(e.kind, EventKind::Error { .. })));

        let prompt = h.decider.prompts().pop().unwrap();
        assert!(prompt
            .user
            .contains("Error details: Tool 'ghost' failed: Tool 'ghost' not found"));
        assert_eq!(h.history_len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_mid_plan_falls_back() {
        let h = harness(
            ScriptedDecider::new()
                .with_route(true)
                .with_plan(vec![inv("A", 1), inv("B", 2)]),
            tools_connector()
                .with_failure("B", OrchestrationError::Transport("connection reset".into())),
        );

        let (_, events) = h.run("A then B").await;
        assert_eq!(h.connector.invoked_tools(), vec!["A", "B"]);
        assert_eq!(terminal_count(&events), 1);
        assert_eq!(labels(&events).last(), Some(&"complete"));
        // The A turn plus the fallback turn.
        assert_eq!(h.history_len(), 4);
    }

    #[tokio::test]
    async fn route_parse_error_falls_back() {
        let h = harness(
            ScriptedDecider::new()
                .with_route_error(OrchestrationError::Parse("missing use_tools".into())),
            tools_connector(),
        );
        let (channel, events) = h.run("hi").await;
        assert_eq!(channel.purpose(), Some(ChannelPurpose::ChatResponse));
        assert_eq!(labels(&events).last(), Some(&"complete"));
        let prompt = h.decider.prompts().pop().unwrap();
        assert!(prompt.user.contains("Error details: missing use_tools"));
    }

    #[tokio::test]
    async fn blank_input_is_rejected_before_any_work() {
        let h = harness(ScriptedDecider::new(), tools_connector());
        let err = h
            .orchestrator
            .submit(SubmitRequest {
                session_id: h.session.clone(),
                user_input: "   ".into(),
                mcp_config: config_for(&["srv"]),
            })
            .await
            .unwrap_err();
        assert_eq!(err, OrchestrationError::Validation("User input is missing".into()));
        assert_eq!(h.decider.route_calls(), 0);
        assert_eq!(h.orchestrator.log().channel_count(), 0);
    }
}
