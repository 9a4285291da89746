use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tracing::{debug, warn};

use conduit_core::decision::DecisionProvider;
use conduit_core::errors::OrchestrationError;
use conduit_core::events::{EventKind, StreamEvent};
use conduit_core::ids::{ChannelName, EntryId, SessionId};
use conduit_core::messages::ChatMessage;
use conduit_core::prompt::{ResponseContext, ResponseKind};

use crate::broker::EventLog;
use crate::session::SessionStore;

/// Publishes typed events for one request channel.
#[derive(Clone)]
pub struct ChannelWriter {
    log: Arc<EventLog>,
    session_id: SessionId,
    channel: ChannelName,
}

impl ChannelWriter {
    pub fn new(log: Arc<EventLog>, session_id: SessionId, channel: ChannelName) -> Self {
        Self {
            log,
            session_id,
            channel,
        }
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    /// Publish an event. Rejections are logged, never propagated: the
    /// workflow keeps its own course and the channel keeps its first terminal.
    pub fn emit(&self, agent_name: &str, kind: EventKind) -> Option<EntryId> {
        let event = StreamEvent::new(
            self.session_id.clone(),
            self.channel.clone(),
            agent_name,
            kind,
        );
        match self.log.publish(event) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(channel = %self.channel, error = %e, "event dropped");
                None
            }
        }
    }

    pub fn error(&self, agent_name: &str, err: &OrchestrationError) {
        self.emit(
            agent_name,
            EventKind::Error {
                message: err.to_string(),
            },
        );
    }
}

/// Streams a model response onto a channel and records the turn.
pub struct Responder {
    decider: Arc<dyn DecisionProvider>,
    sessions: Arc<SessionStore>,
}

impl Responder {
    pub fn new(decider: Arc<dyn DecisionProvider>, sessions: Arc<SessionStore>) -> Self {
        Self { decider, sessions }
    }

    /// Emit `started`, one `streaming` per non-blank chunk, then `complete`
    /// with the full text. Any failure emits `error` instead of `complete`
    /// and leaves the session untouched.
    pub async fn respond(
        &self,
        writer: &ChannelWriter,
        kind: ResponseKind,
        ctx: &ResponseContext,
    ) -> Result<String, OrchestrationError> {
        let agent = kind.agent_name();
        writer.emit(agent, EventKind::Started);

        let full = match self.stream_into(writer, kind, ctx).await {
            Ok(full) => full,
            Err(e) => {
                warn!(channel = %writer.channel(), agent, error = %e, "response failed");
                writer.error(agent, &e);
                return Err(e);
            }
        };

        writer.emit(
            agent,
            EventKind::Complete {
                result: json!({ "response": full }),
            },
        );
        self.sessions.extend(
            &writer.session_id,
            [ChatMessage::user(&ctx.input), ChatMessage::assistant(&full)],
        );
        debug!(channel = %writer.channel(), agent, len = full.len(), "response complete");
        Ok(full)
    }

    async fn stream_into(
        &self,
        writer: &ChannelWriter,
        kind: ResponseKind,
        ctx: &ResponseContext,
    ) -> Result<String, OrchestrationError> {
        let prompt = kind.render(ctx)?;
        let mut stream = self.decider.respond(&prompt).await?;

        let mut full = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.trim().is_empty() {
                continue;
            }
            full.push_str(&chunk);
            writer.emit(kind.agent_name(), EventKind::Streaming { chunk });
        }
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::ids::ChannelPurpose;
    use conduit_llm::mock::{MockReply, ScriptedDecider};
    use std::time::Duration;

    struct Fixture {
        log: Arc<EventLog>,
        sessions: Arc<SessionStore>,
        writer: ChannelWriter,
        session: SessionId,
    }

    fn fixture() -> Fixture {
        let log = Arc::new(EventLog::default());
        let sessions = Arc::new(SessionStore::new());
        let session = SessionId::from_raw("s1");
        let channel = ChannelName::allocate(ChannelPurpose::ChatResponse, &session);
        let writer = ChannelWriter::new(log.clone(), session.clone(), channel);
        Fixture {
            log,
            sessions,
            writer,
            session,
        }
    }

    async fn labels(f: &Fixture) -> Vec<&'static str> {
        f.log
            .tail(f.writer.channel(), EntryId::ZERO, 100, Duration::ZERO)
            .await
            .entries
            .iter()
            .map(|(_, e)| e.kind.label())
            .collect()
    }

    fn ctx() -> ResponseContext {
        ResponseContext {
            input: "hello".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn streams_and_records_turn() {
        let f = fixture();
        let decider = Arc::new(ScriptedDecider::new().with_reply(MockReply::text(&["Hi", " ", "there"])));
        let responder = Responder::new(decider, f.sessions.clone());

        let full = responder
            .respond(&f.writer, ResponseKind::Conversational, &ctx())
            .await
            .unwrap();
        assert_eq!(full, "Hithere");
        assert_eq!(
            labels(&f).await,
            vec!["started", "streaming", "streaming", "complete"]
        );
        let history = f.sessions.history(&f.session);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].content, "Hithere");
    }

    #[tokio::test]
    async fn empty_response_still_completes() {
        let f = fixture();
        let decider = Arc::new(ScriptedDecider::new().with_reply(MockReply::Chunks(vec![])));
        let responder = Responder::new(decider, f.sessions.clone());

        responder
            .respond(&f.writer, ResponseKind::Conversational, &ctx())
            .await
            .unwrap();
        assert_eq!(labels(&f).await, vec!["started", "complete"]);
    }

    #[tokio::test]
    async fn stream_error_is_terminal() {
        let f = fixture();
        let decider = Arc::new(ScriptedDecider::new().with_reply(MockReply::ChunksThenError(
            vec!["partial".into()],
            OrchestrationError::Transport("connection reset".into()),
        )));
        let responder = Responder::new(decider, f.sessions.clone());

        let err = responder
            .respond(&f.writer, ResponseKind::Conversational, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Transport(_)));
        assert_eq!(labels(&f).await, vec!["started", "streaming", "error"]);
        assert!(f.sessions.history(&f.session).is_empty());
    }

    #[tokio::test]
    async fn summarizing_without_results_fails() {
        let f = fixture();
        let responder = Responder::new(Arc::new(ScriptedDecider::new()), f.sessions.clone());
        let err = responder
            .respond(&f.writer, ResponseKind::Summarizing, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));
        assert_eq!(labels(&f).await, vec!["started", "error"]);
    }
}
