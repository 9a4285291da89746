use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use conduit_core::events::StreamEvent;
use conduit_core::ids::{ChannelName, EntryId};

pub const DEFAULT_MAX_LEN: usize = 1000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("channel {0} already has a terminal entry")]
    ChannelClosed(String),
    #[error("unknown entry {entry_id} on channel {channel}")]
    UnknownEntry { channel: String, entry_id: String },
}

/// Entries returned by one tail call plus the cursor to resume from.
#[derive(Debug, Default)]
pub struct TailBatch {
    pub entries: Vec<(EntryId, StreamEvent)>,
    pub cursor: EntryId,
}

impl TailBatch {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
struct ChannelState {
    entries: VecDeque<(EntryId, StreamEvent)>,
    last_id: EntryId,
    terminal_at: Option<Instant>,
    /// Consumer group to the ids it has acknowledged.
    acked: HashMap<String, BTreeSet<EntryId>>,
}

impl ChannelState {
    fn read_after(&self, cursor: EntryId, count: usize) -> TailBatch {
        let entries: Vec<_> = self
            .entries
            .iter()
            .filter(|(id, _)| *id > cursor)
            .take(count)
            .cloned()
            .collect();
        let cursor = entries.last().map(|(id, _)| *id).unwrap_or(cursor);
        TailBatch { entries, cursor }
    }

    fn contains(&self, entry_id: EntryId) -> bool {
        self.entries.iter().any(|(id, _)| *id == entry_id)
    }
}

#[derive(Default)]
struct ChannelLog {
    state: Mutex<ChannelState>,
    notify: Notify,
}

/// Append-only per-request event channels with cursor tailing and
/// consumer-group acknowledgment.
///
/// Each channel keeps its newest `max_len` entries. Exactly one terminal
/// entry may be published per channel.
pub struct EventLog {
    channels: DashMap<ChannelName, Arc<ChannelLog>>,
    max_len: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEN)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl EventLog {
    pub fn new(max_len: usize) -> Self {
        Self {
            channels: DashMap::new(),
            max_len: max_len.max(1),
        }
    }

    fn channel(&self, channel: &ChannelName) -> Arc<ChannelLog> {
        self.channels.entry(channel.clone()).or_default().clone()
    }

    pub fn publish(&self, event: StreamEvent) -> Result<EntryId, BrokerError> {
        let log = self.channel(&event.channel);
        let id = {
            let mut state = log.state.lock();
            if state.terminal_at.is_some() {
                warn!(
                    channel = %event.channel,
                    progress = event.kind.label(),
                    "publish after terminal entry rejected"
                );
                return Err(BrokerError::ChannelClosed(event.channel.to_string()));
            }

            let id = EntryId::next_after(state.last_id, now_millis());
            state.last_id = id;
            if event.is_terminal() {
                state.terminal_at = Some(Instant::now());
            }
            debug!(channel = %event.channel, entry_id = %id, progress = event.kind.label(), "published");
            state.entries.push_back((id, event));
            while state.entries.len() > self.max_len {
                if let Some((trimmed, _)) = state.entries.pop_front() {
                    for acked in state.acked.values_mut() {
                        acked.remove(&trimmed);
                    }
                }
            }
            id
        };
        log.notify.notify_waiters();
        Ok(id)
    }

    /// Up to `count` entries after `cursor`. When none are available, waits
    /// up to `block` for a publish before answering.
    pub async fn tail(
        &self,
        channel: &ChannelName,
        cursor: EntryId,
        count: usize,
        block: Duration,
    ) -> TailBatch {
        let log = self.channel(channel);

        let notified = log.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let batch = log.state.lock().read_after(cursor, count);
        if !batch.is_empty() || block.is_zero() {
            return batch;
        }

        let _ = tokio::time::timeout(block, notified).await;
        let batch = log.state.lock().read_after(cursor, count);
        batch
    }

    /// Acknowledge one entry for a consumer group. Returns false if the
    /// group had already acknowledged it.
    pub fn ack(
        &self,
        channel: &ChannelName,
        entry_id: EntryId,
        group: &str,
    ) -> Result<bool, BrokerError> {
        let unknown = || BrokerError::UnknownEntry {
            channel: channel.to_string(),
            entry_id: entry_id.to_string(),
        };
        let log = self.channels.get(channel).map(|l| l.clone()).ok_or_else(unknown)?;
        let mut state = log.state.lock();
        if !state.contains(entry_id) {
            return Err(unknown());
        }
        Ok(state
            .acked
            .entry(group.to_string())
            .or_default()
            .insert(entry_id))
    }

    /// Retained entries the group has not acknowledged, oldest first.
    pub fn pending(&self, channel: &ChannelName, group: &str) -> Vec<EntryId> {
        let Some(log) = self.channels.get(channel).map(|l| l.clone()) else {
            return Vec::new();
        };
        let state = log.state.lock();
        let acked = state.acked.get(group);
        state
            .entries
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| acked.map_or(true, |set| !set.contains(id)))
            .collect()
    }

    pub fn len(&self, channel: &ChannelName) -> usize {
        self.channels
            .get(channel)
            .map(|l| l.state.lock().entries.len())
            .unwrap_or(0)
    }

    pub fn is_closed(&self, channel: &ChannelName) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|l| l.state.lock().terminal_at.is_some())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Drop channels whose terminal entry is older than `retention`.
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, log| {
            log.state
                .lock()
                .terminal_at
                .map_or(true, |at| at.elapsed() < retention)
        });
        before.saturating_sub(self.channels.len())
    }
}

/// Periodically drop closed channels past their retention window.
pub fn start_sweeper(
    log: Arc<EventLog>,
    retention: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = log.sweep_expired(retention);
            if removed > 0 {
                info!(removed, "expired channels swept");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::events::EventKind;
    use conduit_core::ids::SessionId;
    use serde_json::json;

    fn channel() -> ChannelName {
        ChannelName::from_raw("chat_response_s1_n1")
    }

    fn event(kind: EventKind) -> StreamEvent {
        StreamEvent::new(SessionId::from_raw("s1"), channel(), "chat_agent", kind)
    }

    fn chunk(i: usize) -> StreamEvent {
        event(EventKind::Streaming {
            chunk: i.to_string(),
        })
    }

    #[tokio::test]
    async fn ids_increase_and_tail_resumes() {
        let log = EventLog::default();
        let a = log.publish(event(EventKind::Started)).unwrap();
        let b = log.publish(chunk(1)).unwrap();
        assert!(b > a);

        let first = log.tail(&channel(), EntryId::ZERO, 1, Duration::ZERO).await;
        assert_eq!(first.entries.len(), 1);
        assert_eq!(first.cursor, a);

        let rest = log.tail(&channel(), first.cursor, 10, Duration::ZERO).await;
        assert_eq!(rest.entries.len(), 1);
        assert_eq!(rest.cursor, b);
    }

    #[tokio::test]
    async fn retention_keeps_newest_entries() {
        let log = EventLog::new(1000);
        for i in 0..1001 {
            log.publish(chunk(i)).unwrap();
        }
        let batch = log.tail(&channel(), EntryId::ZERO, 5000, Duration::ZERO).await;
        assert_eq!(batch.entries.len(), 1000);
        let first = &batch.entries[0].1;
        assert_eq!(first.kind, EventKind::Streaming { chunk: "1".into() });
    }

    #[tokio::test]
    async fn trimming_forgets_acks_of_dropped_entries() {
        let log = EventLog::new(3);
        let ids: Vec<EntryId> = (0..3).map(|i| log.publish(chunk(i)).unwrap()).collect();
        for id in &ids {
            log.ack(&channel(), *id, "g").unwrap();
        }
        for i in 3..5 {
            log.publish(chunk(i)).unwrap();
        }

        let log_state = log.channel(&channel());
        let state = log_state.state.lock();
        let acked = &state.acked["g"];
        assert_eq!(acked.len(), 1);
        assert!(acked.contains(&ids[2]));
        drop(state);
        assert_eq!(log.pending(&channel(), "g").len(), 2);
    }

    #[tokio::test]
    async fn second_terminal_is_rejected() {
        let log = EventLog::default();
        log.publish(event(EventKind::Complete { result: json!({}) }))
            .unwrap();
        assert!(log.is_closed(&channel()));

        let err = log
            .publish(event(EventKind::Error {
                message: "late".into(),
            }))
            .unwrap_err();
        assert!(matches!(err, BrokerError::ChannelClosed(_)));
        assert!(log.publish(chunk(0)).is_err());
        assert_eq!(log.len(&channel()), 1);
    }

    #[tokio::test]
    async fn tail_wakes_on_publish() {
        let log = Arc::new(EventLog::default());
        let reader = {
            let log = log.clone();
            tokio::spawn(async move {
                log.tail(&channel(), EntryId::ZERO, 10, Duration::from_secs(5))
                    .await
            })
        };
        tokio::task::yield_now().await;
        log.publish(event(EventKind::Started)).unwrap();

        let batch = reader.await.unwrap();
        assert_eq!(batch.entries.len(), 1);
    }

    #[tokio::test]
    async fn tail_times_out_empty() {
        tokio::time::pause();
        let log = EventLog::default();
        let batch = log
            .tail(&channel(), EntryId::ZERO, 10, Duration::from_millis(500))
            .await;
        assert!(batch.is_empty());
        assert_eq!(batch.cursor, EntryId::ZERO);
    }

    #[tokio::test]
    async fn ack_tracks_groups() {
        let log = EventLog::default();
        let a = log.publish(event(EventKind::Started)).unwrap();
        let b = log.publish(chunk(1)).unwrap();

        assert!(log.ack(&channel(), a, "g").unwrap());
        assert!(!log.ack(&channel(), a, "g").unwrap());
        assert_eq!(log.pending(&channel(), "g"), vec![b]);
        assert_eq!(log.pending(&channel(), "other").len(), 2);

        let missing = EntryId { millis: 1, seq: 0 };
        assert!(matches!(
            log.ack(&channel(), missing, "g"),
            Err(BrokerError::UnknownEntry { .. })
        ));
        assert!(log
            .ack(&ChannelName::from_raw("nope"), a, "g")
            .is_err());
    }

    #[tokio::test]
    async fn sweep_drops_only_expired_closed_channels() {
        tokio::time::pause();
        let log = EventLog::default();
        log.publish(event(EventKind::Complete { result: json!({}) }))
            .unwrap();
        let open = ChannelName::from_raw("chat_response_s1_open");
        log.publish(StreamEvent::new(
            SessionId::from_raw("s1"),
            open.clone(),
            "chat_agent",
            EventKind::Started,
        ))
        .unwrap();

        assert_eq!(log.sweep_expired(Duration::from_secs(60)), 0);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(log.sweep_expired(Duration::from_secs(60)), 1);
        assert_eq!(log.channel_count(), 1);
        assert_eq!(log.len(&open), 1);
    }
}
