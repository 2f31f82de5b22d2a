// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Push messages for connected UI sessions and the durable queue that holds them while
//! no session is connected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushMessageType {
    OnMessageReceived,
    OnCredentialAdded,
    OnCredentialOffered,
    OnCredentialProblem,
    OnCredentialRevoked,
    OnPartnerRequestCompleted,
    OnPartnerRequestReceived,
    OnPartnerAdded,
    OnPartnerAccepted,
    OnPartnerRemoved,
    OnPresentationVerified,
    OnPresentationProved,
    OnPresentationRequestDeclined,
    OnPresentationRequestDeleted,
    OnPresentationRequestReceived,
    OnPresentationRequestSent,
    TaskAdded,
    TaskCompleted,
}

/// Server → client envelope on the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub message_type: PushMessageType,
    /// Id of the aggregate the message is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<Value>,
}

impl PushMessage {
    pub fn new(message_type: PushMessageType, id: Option<String>, payload: Value) -> Self {
        Self {
            message_type,
            id,
            payload,
            partner: None,
        }
    }

    pub fn with_partner(mut self, partner: Value) -> Self {
        self.partner = Some(partner);
        self
    }
}

/// A push message waiting for the next session to connect. The queue is a single shared
/// mailbox; drained in `sequence` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedNotification {
    pub id: Uuid,
    pub sequence: i64,
    pub message: PushMessage,
    pub queued_at: DateTime<Utc>,
}
