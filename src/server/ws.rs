use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::api::{ApiError, SharedState};
use crate::session::{Event, Subscription};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket handler ────────────────────────────────────────────────

/// Stream a session's events as JSON text frames until its next Done.
///
/// The subscription is taken before the upgrade so an unknown session is a
/// plain 404 rather than a socket that closes immediately.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state.orchestrator.subscribe(&session_id)?;
    debug!(session_id = %session_id, "websocket subscriber attached");
    Ok(ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = socket.split();
        run_socket_loop(sender, receiver, subscription).await;
        debug!(session_id = %session_id, "websocket subscriber detached");
    }))
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards subscription events, watches client frames, and pings on an
/// interval. The loop ends after the Done event is sent, when the session is
/// torn down, when the client goes away, or when no Pong arrives within
/// [`PONG_TIMEOUT`] of a Ping.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: Subscription,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Event forwarding ────────────────────────────────────
            next = subscription.next() => {
                let Some(event) = next else { break };
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
                if event.is_done() {
                    break;
                }
            }

            // ── Client messages (pong, close, etc.) ─────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &Event,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(session_id = %event.session_id, error = %e, "failed to serialize event");
            Ok(())
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
