//! Websocket push of printer views to dashboard clients.

use std::collections::BTreeMap;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::web::api::AppState;
use crate::web::models::PrinterUpdated;

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(registry): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay(socket, registry))
}

fn frame(update: &PrinterUpdated) -> Option<Message> {
    match serde_json::to_string(update) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!("Failed to encode printer update: {}", e);
            None
        }
    }
}

/// One frame per printer with its current view.
fn initial_frames(registry: &AppState) -> Vec<Message> {
    registry
        .snapshots()
        .into_iter()
        .filter_map(|(key, view)| frame(&PrinterUpdated::new(BTreeMap::from([(key, view)]))))
        .collect()
}

async fn relay(socket: WebSocket, registry: AppState) {
    let mut updates = registry.subscribe();
    let (mut sender, mut receiver) = socket.split();

    for message in initial_frames(&registry) {
        if sender.send(message).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => {
                let messages = match update {
                    Ok(update) => frame(&PrinterUpdated::new(BTreeMap::from([(update.key, update.view)])))
                        .into_iter()
                        .collect(),
                    // Fell behind; resynchronise with full state.
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Websocket client lagged by {} updates", skipped);
                        initial_frames(&registry)
                    }
                    Err(RecvError::Closed) => break,
                };
                for message in messages {
                    if sender.send(message).await.is_err() {
                        return;
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    tracing::debug!("Websocket client disconnected");
}
