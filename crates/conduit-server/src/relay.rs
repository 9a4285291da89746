use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use conduit_core::ids::{ChannelName, EntryId, SessionId};
use conduit_engine::EventLog;

use crate::registry::{ConnectionRegistry, SendOutcome};

/// How a relay reads its channel.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Longest a single read waits for new entries.
    pub block: Duration,
    /// Entries per read.
    pub batch: usize,
    pub consumer_group: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            block: Duration::from_millis(5000),
            batch: 100,
            consumer_group: "websocket-consumer-group".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayExit {
    /// A terminal entry was read.
    Terminal,
    /// The session's connection stopped accepting frames.
    SocketClosed,
}

/// Spawn a relay that forwards `channel` to the session's connection.
pub fn spawn_relay(
    log: Arc<EventLog>,
    registry: Arc<ConnectionRegistry>,
    session_id: SessionId,
    channel: ChannelName,
    config: RelayConfig,
) -> JoinHandle<RelayExit> {
    tokio::spawn(async move { run_relay(&log, &registry, &session_id, &channel, &config).await })
}

/// Forward entries in order until one is terminal or the socket is gone.
/// A full send queue holds the relay back; nothing is skipped. With no
/// connection registered, entries are dropped and reading goes on.
pub async fn run_relay(
    log: &EventLog,
    registry: &ConnectionRegistry,
    session_id: &SessionId,
    channel: &ChannelName,
    config: &RelayConfig,
) -> RelayExit {
    debug!(session_id = %session_id, channel = %channel, "relay started");
    let mut cursor = EntryId::ZERO;

    loop {
        let batch = log.tail(channel, cursor, config.batch, config.block).await;
        cursor = batch.cursor;

        for (entry_id, event) in batch.entries {
            let frame = event.to_wire(entry_id).to_string();
            match registry.deliver(session_id, frame).await {
                SendOutcome::Sent => {
                    if let Err(e) = log.ack(channel, entry_id, &config.consumer_group) {
                        debug!(channel = %channel, error = %e, "ack after forward failed");
                    }
                }
                SendOutcome::NoConnection | SendOutcome::QueueFull => {
                    debug!(channel = %channel, entry_id = %entry_id, "no connection, entry dropped");
                }
                SendOutcome::Closed(connection_id) => {
                    warn!(
                        session_id = %session_id,
                        channel = %channel,
                        "socket closed, relay stopping"
                    );
                    registry.unregister_if(session_id, &connection_id);
                    return RelayExit::SocketClosed;
                }
            }

            if event.is_terminal() {
                info!(channel = %channel, progress = event.kind.label(), "relay finished");
                return RelayExit::Terminal;
            }
        }
    }
}
