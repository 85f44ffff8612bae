//! WebSocket handlers: device presence and per-service channels

use adbridge_core::{bridge, DeviceId, Subscription};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures_util::{future, SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// `/devices` upgrade handler
pub async fn presence_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| observe_presence(socket, state))
}

async fn observe_presence(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let Subscription { id, mut updates } = state.presence.subscribe().await;

    info!(observer = ?id, "Presence observer connected");

    // Current list first, then every change
    let snapshot = updates.borrow_and_update().clone();
    if sender.send(Message::Text(snapshot.to_string().into())).await.is_ok() {
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = updates.borrow_and_update().clone();
                    if sender.send(Message::Text(snapshot.to_string().into())).await.is_err() {
                        break;
                    }
                }

                msg = receiver.next() => {
                    match msg {
                        Some(Ok(Message::Ping(data))) => {
                            if sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(error = %e, "Presence socket error");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    state.presence.unsubscribe(id).await;
    info!(observer = ?id, "Presence observer disconnected");
}

/// `/device/{serial}/{service}` upgrade handler
pub async fn channel_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path((serial, service)): Path<(String, String)>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| bridge_channel(socket, state, DeviceId::new(serial), service))
}

async fn bridge_channel(
    mut socket: WebSocket,
    state: Arc<AppState>,
    serial: DeviceId,
    service: String,
) {
    // Channels only ride on sessions an info request already established
    let Some(session) = state.registry.get(&serial).await else {
        warn!(serial = %serial, service = %service, "No session for channel, closing");
        let _ = socket.close().await;
        return;
    };

    let channel = match session.transport.connect(&service).await {
        Ok(channel) => channel,
        Err(e) => {
            warn!(serial = %serial, service = %service, error = %e, "Channel open failed, closing");
            let _ = socket.close().await;
            return;
        }
    };
    info!(serial = %serial, service = %service, "Channel opened");

    let (sender, receiver) = socket.split();
    let outbound = sender.with(|chunk: Bytes| {
        future::ready(Ok::<_, axum::Error>(Message::Binary(chunk)))
    });
    let inbound = receiver
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Binary(data)) => Some(Ok(data)),
                Ok(Message::Text(text)) => {
                    Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes())))
                }
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        });

    let stats = bridge::run(channel, inbound, outbound, state.config.bridge.options()).await;
    debug!(
        serial = %serial,
        service = %service,
        chunks_to_remote = stats.chunks_to_remote,
        messages_to_device = stats.messages_to_device,
        "Channel closed"
    );
}
