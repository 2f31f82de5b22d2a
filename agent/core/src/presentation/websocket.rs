// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! `GET /events` upgrades to a push channel. Queued notifications are flushed on
//! connect, then every live message is forwarded as a JSON text frame. Frames from the
//! client are ignored apart from close.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use super::api::AppState;

pub async fn events_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (channel_id, mut messages) = match state.notifications.connect().await {
        Ok(connected) => connected,
        Err(e) => {
            warn!(error = %e, "Could not open push channel");
            return;
        }
    };
    debug!(channel_id = %channel_id, "Push channel opened");

    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Could not encode push message");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = receiver.next().await {
        if let Message::Close(_) = frame {
            break;
        }
    }

    send_task.abort();
    state.notifications.disconnect(channel_id);
    debug!(channel_id = %channel_id, "Push channel closed");
}
