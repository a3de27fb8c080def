use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::hub::{ConsumerId, SubscriptionRequest};
use crate::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ─── GET /ws ─────────────────────────────────────────────────────
/// Every WebSocket connection is one consumer. Inbound text frames are
/// subscription requests; outbound frames are acks and metrics updates.

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (id, mut outbound) = state.hub.connect();
    let mut shutdown = state.shutdown.subscribe();
    let (mut sink, mut stream) = socket.split();

    // ── Writer: hub buffer → socket, plus keep-alive pings ──────
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        loop {
            tokio::select! {
                slot = outbound.recv() => {
                    // None: the hub dropped this consumer.
                    let Some(slot) = slot else { break };
                    for frame in slot.into_frames() {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            return;
                        }
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        return;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    // ── Reader: socket → subscription requests ──────────────────
    let writer_done = loop {
        tokio::select! {
            _ = &mut writer => break true,
            _ = shutdown.recv() => break false,
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !handle_text(&state, id, &text) {
                        break false;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break false,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(consumer = %id, "websocket read error: {}", err);
                    break false;
                }
            }
        }
    };

    // Dropping the consumer closes its buffer, which lets the writer
    // flush what is queued and close the socket.
    state.hub.disconnect(id);
    if !writer_done && tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Returns false when the consumer should be dropped.
fn handle_text(state: &AppState, id: ConsumerId, text: &str) -> bool {
    let request: SubscriptionRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(consumer = %id, "malformed subscription request: {}", err);
            return false;
        }
    };
    state.hub.handle_request(id, &request).is_ok()
}
