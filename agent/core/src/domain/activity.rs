// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Activity Ledger
//!
//! Derived read model of "things needing attention" (pending tasks) and "things that
//! happened" (completed activities). Rows are keyed by (link id, type, role) and can be
//! rebuilt from the exchange aggregates at any time.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Task/activity read model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::partner::PartnerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub Uuid);

impl ActivityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActivityId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    ConnectionRequest,
    PresentationExchange,
    CredentialExchange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityRole {
    ConnectionRequestRecipient,
    ConnectionRequestSender,
    PresentationExchangeProver,
    PresentationExchangeVerifier,
    CredentialExchangeHolder,
    CredentialExchangeIssuer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    ConnectionRequestReceived,
    ConnectionRequestSent,
    ConnectionRequestAccepted,
    PresentationExchangeSent,
    PresentationExchangeReceived,
    PresentationExchangeAccepted,
    PresentationExchangeDeclined,
    CredentialExchangeReceived,
    CredentialExchangeAccepted,
    CredentialExchangeDeclined,
}

/// Natural key of an activity row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActivityKey {
    pub link_id: String,
    pub activity_type: ActivityType,
    pub role: ActivityRole,
}

impl ActivityKey {
    pub fn new(link_id: impl Into<String>, activity_type: ActivityType, role: ActivityRole) -> Self {
        Self {
            link_id: link_id.into(),
            activity_type,
            role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    /// Id of the partner or exchange the activity is about.
    pub link_id: String,
    pub partner_id: Option<PartnerId>,
    pub activity_type: ActivityType,
    pub role: ActivityRole,
    pub state: ActivityState,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        key: ActivityKey,
        partner_id: Option<PartnerId>,
        state: ActivityState,
        completed: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ActivityId::new(),
            link_id: key.link_id,
            partner_id,
            activity_type: key.activity_type,
            role: key.role,
            state,
            completed,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> ActivityKey {
        ActivityKey::new(self.link_id.clone(), self.activity_type, self.role)
    }

    pub fn matches(&self, key: &ActivityKey) -> bool {
        self.link_id == key.link_id && self.activity_type == key.activity_type && self.role == key.role
    }

    /// Returns whether anything changed.
    pub fn transition(&mut self, state: ActivityState, completed: bool) -> bool {
        if self.state == state && self.completed == completed {
            return false;
        }
        self.state = state;
        self.completed = completed;
        self.updated_at = Utc::now();
        true
    }
}

/// Listing filter. `completed: Some(false)` lists open tasks, `Some(true)` the activity log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityFilter {
    pub completed: Option<bool>,
    pub activity_type: Option<ActivityType>,
}

impl ActivityFilter {
    pub fn tasks() -> Self {
        Self {
            completed: Some(false),
            activity_type: None,
        }
    }

    pub fn activities() -> Self {
        Self {
            completed: Some(true),
            activity_type: None,
        }
    }

    pub fn of_type(mut self, activity_type: ActivityType) -> Self {
        self.activity_type = Some(activity_type);
        self
    }

    pub fn accepts(&self, activity: &Activity) -> bool {
        self.completed.map_or(true, |c| c == activity.completed)
            && self.activity_type.map_or(true, |t| t == activity.activity_type)
    }
}
