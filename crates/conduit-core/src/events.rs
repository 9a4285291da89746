use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ChannelName, EntryId, SessionId};

/// Agent name carried by workflow progress events.
pub const PROGRESS_AGENT: &str = "tool_orchestrator";

/// Payload of one channel entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "progress", rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Streaming {
        chunk: String,
    },
    ProgressUpdate {
        tool_name: String,
        step: u32,
        total: u32,
        message: String,
    },
    Complete {
        result: Value,
    },
    Error {
        message: String,
    },
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Streaming { .. } => "streaming",
            Self::ProgressUpdate { .. } => "progress_update",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// A progress or result event for one request channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub session_id: SessionId,
    pub channel: ChannelName,
    pub agent_name: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl StreamEvent {
    pub fn new(
        session_id: SessionId,
        channel: ChannelName,
        agent_name: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            session_id,
            channel,
            agent_name: agent_name.into(),
            kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Flat string fields, as stored in a channel entry and sent to clients.
    ///
    /// `result` appears only on `complete` and holds a JSON string.
    pub fn to_fields(&self) -> BTreeMap<&'static str, String> {
        let mut fields = BTreeMap::new();
        fields.insert("agent_name", self.agent_name.clone());
        fields.insert("progress", self.kind.label().to_string());
        fields.insert("session_id", self.session_id.to_string());

        let chunk = match &self.kind {
            EventKind::Started => String::new(),
            EventKind::Streaming { chunk } => chunk.clone(),
            EventKind::ProgressUpdate {
                tool_name,
                step,
                total,
                message,
            } => {
                fields.insert("tool_name", tool_name.clone());
                fields.insert("progress_step", step.to_string());
                fields.insert("tool_len", total.to_string());
                fields.insert("message", message.clone());
                message.clone()
            }
            EventKind::Complete { result } => {
                fields.insert("result", result.to_string());
                String::new()
            }
            EventKind::Error { message } => message.clone(),
        };
        fields.insert("chunk", chunk);
        fields
    }

    /// Client-facing JSON for a stored entry.
    pub fn to_wire(&self, entry_id: EntryId) -> Value {
        let mut map: serde_json::Map<String, Value> = self
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::String(v)))
            .collect();
        map.insert("stream_id".into(), Value::String(entry_id.to_string()));
        map.insert(
            "result_channel".into(),
            Value::String(self.channel.to_string()),
        );
        Value::Object(map)
    }
}
