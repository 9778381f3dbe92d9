//! Display-node control channel.
//!
//! One WebSocket per display node. Events are handled one at a time per
//! session; separate sessions run on independent tasks. Config pushes are
//! queued on a per-session channel and forwarded by a writer task so the
//! registry lock is never held across socket I/O.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{ClientEvent, ConfigUpdate, ServerEvent};

use super::http::AppState;
use super::sse::notify_screens_updated;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Cannot encode server event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut registered = false;

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("Control channel error on {}: {}", session_id, e);
                break;
            }
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::RegisterScreen(announce)) => {
                    let node = {
                        let mut registry = state.registry.write().await;
                        registry.register(session_id, announce, tx.clone())
                    };
                    registered = true;
                    info!("Screen registered: {} ({})", node.name, node.ip);

                    // Initial configuration for the fresh session.
                    let _ = tx.send(ServerEvent::ConfigUpdate(ConfigUpdate::plain(
                        node.layout,
                        node.cameras,
                    )));
                    broadcast_screens(&state).await;
                }
                Ok(ClientEvent::Heartbeat) => {
                    state.registry.write().await.heartbeat(session_id);
                }
                Err(e) => {
                    warn!("Unrecognized control event: {}", e);
                }
            },
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            _ => {}
        }
    }

    if registered {
        let removed = state.registry.write().await.unregister(session_id);
        if let Some(node) = removed {
            info!("Screen disconnected: {}", node.name);
            broadcast_screens(&state).await;
        }
    }

    writer.abort();
}

async fn broadcast_screens(state: &AppState) {
    let screens = state.registry.read().await.nodes();
    notify_screens_updated(screens);
}
