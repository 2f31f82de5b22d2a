// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Partner Aggregate
//!
//! A partner is the local record of a connection with a peer agent. A row may exist keyed
//! only by the invitation message id before the agent assigns a connection id; the
//! connection reconciler backfills it later.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Connection aggregate and its state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

use super::exchange::{ProtocolState, StateHistory, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartnerId(pub Uuid);

impl PartnerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for PartnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PartnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection state as reported by the external agent.
///
/// Happy path is `invitation → request → response → active`; `inactive` is entered from
/// `active` when the liveness probe gets no answer and left again on the next answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Invitation,
    Request,
    Response,
    Active,
    Completed,
    Inactive,
    Abandoned,
    Error,
}

impl ProtocolState for ConnectionState {
    fn rank(&self) -> u8 {
        match self {
            ConnectionState::Invitation => 0,
            ConnectionState::Request => 1,
            ConnectionState::Response => 2,
            ConnectionState::Active
            | ConnectionState::Completed
            | ConnectionState::Inactive
            | ConnectionState::Abandoned
            | ConnectionState::Error => 3,
        }
    }
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Invitation => "invitation",
            ConnectionState::Request => "request",
            ConnectionState::Response => "response",
            ConnectionState::Active => "active",
            ConnectionState::Completed => "completed",
            ConnectionState::Inactive => "inactive",
            ConnectionState::Abandoned => "abandoned",
            ConnectionState::Error => "error",
        }
    }

    /// The connection can carry credential and proof exchanges.
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            ConnectionState::Active | ConnectionState::Completed | ConnectionState::Inactive
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = String;

    /// Accepts both the legacy connection states and the RFC 0023 DID-exchange states.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invitation" | "start" | "invitation-sent" | "invitation-received" => {
                Ok(ConnectionState::Invitation)
            }
            "request" | "request-sent" | "request-received" => Ok(ConnectionState::Request),
            "response" | "response-sent" | "response-received" => Ok(ConnectionState::Response),
            "active" => Ok(ConnectionState::Active),
            "completed" => Ok(ConnectionState::Completed),
            "inactive" | "ping_no_response" => Ok(ConnectionState::Inactive),
            "abandoned" => Ok(ConnectionState::Abandoned),
            "error" => Ok(ConnectionState::Error),
            other => Err(format!("unknown connection state '{}'", other)),
        }
    }
}

/// Connection aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    pub id: PartnerId,
    pub connection_id: Option<String>,
    pub invitation_msg_id: Option<String>,
    pub did: Option<String>,
    pub label: Option<String>,
    pub alias: Option<String>,
    pub state: ConnectionState,
    pub state_history: StateHistory<ConnectionState>,
    /// The peer reached out to us rather than the other way round.
    pub incoming: bool,
    /// Include in the liveness probe.
    pub trust_ping: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
    /// Credential definition ids this partner is known to issue.
    pub supported_credential_types: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Partner {
    fn with_state(state: ConnectionState) -> Self {
        let now = Utc::now();
        Self {
            id: PartnerId::new(),
            connection_id: None,
            invitation_msg_id: None,
            did: None,
            label: None,
            alias: None,
            state,
            state_history: StateHistory::starting_at(state, now),
            incoming: false,
            trust_ping: true,
            last_seen: None,
            tags: BTreeSet::new(),
            supported_credential_types: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Row created when we send or receive an invitation; the connection id is not known yet.
    pub fn from_invitation(invitation_msg_id: impl Into<String>, alias: Option<String>) -> Self {
        let mut partner = Self::with_state(ConnectionState::Invitation);
        partner.invitation_msg_id = Some(invitation_msg_id.into());
        partner.alias = alias;
        partner
    }

    /// Row created for a connection the peer initiated without a local invitation.
    pub fn unsolicited(connection_id: impl Into<String>, state: ConnectionState) -> Self {
        let mut partner = Self::with_state(state);
        partner.connection_id = Some(connection_id.into());
        partner.incoming = true;
        partner
    }

    /// Row created when we connect to a known DID.
    pub fn outgoing(connection_id: impl Into<String>, did: Option<String>, alias: Option<String>) -> Self {
        let mut partner = Self::with_state(ConnectionState::Request);
        partner.connection_id = Some(connection_id.into());
        partner.did = did;
        partner.alias = alias;
        partner
    }

    pub fn push_state(&mut self, state: ConnectionState, at: DateTime<Utc>) -> Transition<ConnectionState> {
        let outcome = self.state_history.apply(&mut self.state, state, at);
        if !matches!(outcome, Transition::Duplicate) {
            self.updated_at = Utc::now();
        }
        outcome
    }

    /// Fill identity fields that are still empty. Never overwrites a resolved value.
    /// A DID ending in `unknown` counts as empty. Returns whether anything changed.
    pub fn backfill(
        &mut self,
        connection_id: Option<&str>,
        did: Option<&str>,
        label: Option<&str>,
    ) -> bool {
        let mut changed = false;
        if let Some(connection_id) = connection_id.filter(|v| !v.is_empty()) {
            if self.connection_id.as_deref().map_or(true, str::is_empty) {
                self.connection_id = Some(connection_id.to_string());
                changed = true;
            }
        }
        if let Some(did) = did.filter(|v| !v.is_empty()) {
            let unresolved = self
                .did
                .as_deref()
                .map_or(true, |d| d.is_empty() || d.ends_with("unknown"));
            if unresolved && self.did.as_deref() != Some(did) {
                self.did = Some(did.to_string());
                changed = true;
            }
        }
        if let Some(label) = label.filter(|v| !v.is_empty()) {
            if self.label.as_deref().map_or(true, str::is_empty) {
                self.label = Some(label.to_string());
                changed = true;
            }
        }
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// Liveness answer from the peer.
    pub fn mark_seen(&mut self, at: DateTime<Utc>) {
        self.push_state(ConnectionState::Active, at);
        self.last_seen = Some(at);
    }

    pub fn mark_unresponsive(&mut self, at: DateTime<Utc>) {
        self.push_state(ConnectionState::Inactive, at);
    }

    /// Alias if the user gave one, else the peer's own label.
    pub fn display_name(&self) -> Option<&str> {
        self.alias.as_deref().or(self.label.as_deref())
    }
}
