use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use conduit_core::ids::SessionId;
use conduit_engine::SubmitRequest;

use crate::protocol::{self, Inbound};
use crate::registry::Outbound;
use crate::relay::spawn_relay;
use crate::server::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Serve one client socket under a fresh session.
pub async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let session_id = SessionId::new();
    let (connection_id, mut rx) = state.registry.register(&session_id);
    info!(session_id = %session_id, connection = %connection_id, "client connected");
    state
        .registry
        .send(&session_id, protocol::session_established(&session_id));

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_sid = session_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(Outbound::Text(text)) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Close { code, reason }) => {
                            let frame = CloseFrame { code, reason: reason.into() };
                            let _ = ws_tx.send(WsMessage::Close(Some(frame))).await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                    tracing::trace!(session_id = %writer_sid, "sent ping");
                }
            }
        }
    });

    let reader_state = state.clone();
    let reader_sid = session_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => handle_text(&reader_state, &reader_sid, text.as_str()).await,
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    if state.registry.unregister_if(&session_id, &connection_id) {
        info!(session_id = %session_id, "client disconnected");
    } else {
        debug!(session_id = %session_id, connection = %connection_id, "superseded connection closed");
    }
}

async fn handle_text(state: &AppState, session_id: &SessionId, text: &str) {
    let inbound = match protocol::parse_inbound(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            debug!(session_id = %session_id, error = %e, "rejected inbound message");
            state.registry.send(session_id, protocol::error(&e));
            return;
        }
    };

    match inbound {
        Inbound::Ack {
            stream_id,
            result_channel,
        } => {
            let log = state.orchestrator.log();
            if let Err(e) = log.ack(&result_channel, stream_id, &state.relay.consumer_group) {
                debug!(session_id = %session_id, error = %e, "client ack ignored");
            }
        }
        Inbound::Request {
            user_input,
            mcp_config,
        } => {
            let request = SubmitRequest {
                session_id: session_id.clone(),
                user_input,
                mcp_config,
            };
            match state.orchestrator.submit(request).await {
                Ok(submission) => {
                    state
                        .registry
                        .send(session_id, protocol::processing(&submission.channel));
                    spawn_relay(
                        state.orchestrator.log().clone(),
                        state.registry.clone(),
                        session_id.clone(),
                        submission.channel,
                        state.relay.clone(),
                    );
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "request rejected");
                    state.registry.send(session_id, protocol::error(&e));
                }
            }
        }
    }
}
