use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(SessionId, "sess");
branded_id!(ConnectionId, "conn");

/// What a channel carries. Part of the channel name on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPurpose {
    ToolOrchestration,
    ChatResponse,
}

impl ChannelPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolOrchestration => "tool_orchestration",
            Self::ChatResponse => "chat_response",
        }
    }
}

/// Per-request channel name: `{purpose}_{session_id}_{nonce}`.
///
/// The nonce is a fresh UUID, so two requests in the same session never share
/// a channel.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn allocate(purpose: ChannelPurpose, session_id: &SessionId) -> Self {
        Self(format!(
            "{}_{}_{}",
            purpose.as_str(),
            session_id,
            Uuid::new_v4().simple()
        ))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn purpose(&self) -> Option<ChannelPurpose> {
        [ChannelPurpose::ToolOrchestration, ChannelPurpose::ChatResponse]
            .into_iter()
            .find(|p| {
                self.0
                    .strip_prefix(p.as_str())
                    .is_some_and(|rest| rest.starts_with('_'))
            })
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of an entry inside a channel, rendered as `{millis}-{seq}`.
///
/// Ids are strictly increasing within one channel. `0-0` sorts before every
/// real entry and is the cursor for "from the beginning".
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct EntryId {
    pub millis: u64,
    pub seq: u64,
}

impl EntryId {
    pub const ZERO: EntryId = EntryId { millis: 0, seq: 0 };

    /// Next id after `last`, using wall-clock millis when they move forward.
    pub fn next_after(last: EntryId, now_millis: u64) -> Self {
        if now_millis > last.millis {
            Self { millis: now_millis, seq: 0 }
        } else {
            Self { millis: last.millis, seq: last.seq + 1 }
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid entry id: {0}")]
pub struct InvalidEntryId(pub String);

impl FromStr for EntryId {
    type Err = InvalidEntryId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidEntryId(s.to_owned());
        let (millis, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for EntryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_prefix() {
        let id = SessionId::new();
        assert!(id.as_str().starts_with("sess_"), "got: {id}");
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn channel_name_layout() {
        let session = SessionId::from_raw("s1");
        let channel = ChannelName::allocate(ChannelPurpose::ToolOrchestration, &session);
        let rest = channel
            .as_str()
            .strip_prefix("tool_orchestration_s1_")
            .expect("prefix");
        assert_eq!(rest.len(), 32);
        assert!(rest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(channel.purpose(), Some(ChannelPurpose::ToolOrchestration));
    }

    #[test]
    fn channel_names_never_collide_within_a_session() {
        let session = SessionId::new();
        let a = ChannelName::allocate(ChannelPurpose::ChatResponse, &session);
        let b = ChannelName::allocate(ChannelPurpose::ChatResponse, &session);
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_purpose_prefix() {
        assert_eq!(ChannelName::from_raw("other_s1_abc").purpose(), None);
    }

    #[test]
    fn entry_id_ordering_and_successor() {
        let first = EntryId::next_after(EntryId::ZERO, 1_000);
        assert_eq!(first, EntryId { millis: 1_000, seq: 0 });

        // Clock did not move (or went backwards): bump the sequence.
        let second = EntryId::next_after(first, 999);
        assert_eq!(second, EntryId { millis: 1_000, seq: 1 });
        assert!(second > first);
        assert!(EntryId::ZERO < first);
    }

    #[test]
    fn entry_id_text_form() {
        let id: EntryId = "1700000000000-7".parse().unwrap();
        assert_eq!(id.millis, 1_700_000_000_000);
        assert_eq!(id.seq, 7);
        assert_eq!(id.to_string(), "1700000000000-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"1700000000000-7\"");

        assert!("garbage".parse::<EntryId>().is_err());
        assert!("12-x".parse::<EntryId>().is_err());
    }
}
