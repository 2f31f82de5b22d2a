// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Live Channel Registry
//!
//! Concurrent map of connected UI push channels. Owned by the notification service and
//! shared with the WebSocket handler; membership is not assumed accurate, closed channels
//! are pruned periodically.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** connect / disconnect / broadcast / prune for push channels

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::notification::PushMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct LiveChannel {
    sender: mpsc::UnboundedSender<PushMessage>,
    connected_at: DateTime<Utc>,
}

impl LiveChannel {
    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, LiveChannel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new channel; the receiver is the session's outbound stream.
    pub fn connect(&self) -> (ChannelId, mpsc::UnboundedReceiver<PushMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ChannelId::new();
        self.channels.insert(
            id,
            LiveChannel {
                sender,
                connected_at: Utc::now(),
            },
        );
        debug!(channel_id = %id, "Push channel connected");
        (id, receiver)
    }

    pub fn disconnect(&self, id: ChannelId) -> bool {
        let removed = self.channels.remove(&id).is_some();
        if removed {
            debug!(channel_id = %id, "Push channel disconnected");
        }
        removed
    }

    /// At least one registered channel is still open.
    pub fn has_live(&self) -> bool {
        self.channels.iter().any(|entry| entry.value().is_open())
    }

    /// Deliver to every open channel. Returns how many accepted the message.
    pub fn broadcast(&self, message: &PushMessage) -> usize {
        let mut delivered = 0;
        for entry in self.channels.iter() {
            match entry.value().sender.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => debug!(channel_id = %entry.key(), "Push channel closed, skipping"),
            }
        }
        delivered
    }

    pub fn send_to(&self, id: ChannelId, message: PushMessage) -> bool {
        self.channels
            .get(&id)
            .map(|channel| channel.sender.send(message).is_ok())
            .unwrap_or(false)
    }

    /// Remove registrations whose session is gone. Returns how many were removed.
    pub fn prune_closed(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|id, channel| {
            let open = channel.is_open();
            if !open {
                debug!(
                    channel_id = %id,
                    connected_at = %channel.connected_at,
                    "Pruning closed push channel"
                );
            }
            open
        });
        before - self.channels.len()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::PushMessageType;
    use serde_json::json;

    fn message() -> PushMessage {
        PushMessage::new(PushMessageType::TaskAdded, Some("a-1".into()), json!({}))
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_open_channel() {
        let registry = ChannelRegistry::new();
        let (_, mut rx1) = registry.connect();
        let (_, mut rx2) = registry.connect();

        assert_eq!(registry.broadcast(&message()), 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_prune_removes_dropped_sessions() {
        let registry = ChannelRegistry::new();
        let (_, rx_open) = registry.connect();
        let (_, rx_closed) = registry.connect();
        drop(rx_closed);

        assert_eq!(registry.prune_closed(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.has_live());
        drop(rx_open);
        assert!(!registry.has_live());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let registry = ChannelRegistry::new();
        let (id, _rx) = registry.connect();
        assert!(registry.disconnect(id));
        assert!(!registry.disconnect(id));
        assert!(registry.is_empty());
    }
}
