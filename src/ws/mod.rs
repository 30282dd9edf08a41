/// Unwrap a lobby operation or return its error as the sole reply
macro_rules! reply_on_err {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Rejected: {}", e);
                return vec![crate::protocol::Message::from(&e)];
            }
        }
    };
}

pub mod handlers;
mod player;
mod presenter;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::protocol::{encode_message, Message};
use crate::state::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = ulid::Ulid::new().to_string();
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before taking the snapshot so nothing published in between is missed
    let mut relay_rx = state.relay.subscribe();
    tracing::info!(
        "WebSocket connected: {} ({} open)",
        conn_id,
        state.relay.connection_count()
    );

    let snapshot = state.snapshot_all().await;
    if !send_messages(&mut sender, &snapshot).await {
        tracing::warn!("Failed to send snapshot to {}", conn_id);
        return;
    }

    loop {
        tokio::select! {
            outbound = relay_rx.recv() => {
                match outbound {
                    Ok(out) => {
                        if !out.is_for(&conn_id) {
                            continue;
                        }
                        let frame = WsMessage::Text(out.text.to_string().into());
                        if sender.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        let snapshot = catch_up(&state, &conn_id, skipped).await;
                        if !send_messages(&mut sender, &snapshot).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        tracing::debug!("Received from {}: {}", conn_id, text.as_str());
                        let replies = handlers::handle_text(text.as_str(), &conn_id, &state).await;
                        if !send_messages(&mut sender, &replies).await {
                            tracing::error!("Failed to send reply to {}", conn_id);
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error on {}: {}", conn_id, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!("WebSocket connection closed: {}", conn_id);
}

/// Messages owed to a connection whose hub receiver fell behind. Skipped
/// frames are gone, so the peer gets every lobby's snapshot instead and
/// merges it idempotently.
async fn catch_up(state: &AppState, conn_id: &str, skipped: u64) -> Vec<Message> {
    tracing::warn!(
        "Connection {} lagged, skipped {} frames; resending snapshot",
        conn_id,
        skipped
    );
    state.snapshot_all().await
}

/// Send messages in order; false once the socket is gone
async fn send_messages(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    messages: &[Message],
) -> bool {
    for message in messages {
        let json = match encode_message(message) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to encode {}: {}", message.kind(), e);
                continue;
            }
        };
        if sender.send(WsMessage::Text(json.into())).await.is_err() {
            return false;
        }
    }
    true
}
