// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Credential Exchange Aggregate
//!
//! Holder and issuer variants share one aggregate distinguished by [`ExchangeRole`].
//! Exactly one row exists per external exchange id.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Credential issuance state machine, payloads and revocation fields

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use super::exchange::{ExchangeVersion, ProtocolState, StateHistory, Transition};
use super::partner::PartnerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialExchangeId(pub Uuid);

impl CredentialExchangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for CredentialExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CredentialExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeRole {
    Holder,
    Issuer,
}

impl FromStr for ExchangeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "holder" => Ok(ExchangeRole::Holder),
            "issuer" => Ok(ExchangeRole::Issuer),
            other => Err(format!("unknown credential exchange role '{}'", other)),
        }
    }
}

/// Credential family; decides how schemas are resolved and which protocol version is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    #[default]
    Indy,
    JsonLd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialExchangeState {
    ProposalSent,
    ProposalReceived,
    OfferSent,
    OfferReceived,
    RequestSent,
    RequestReceived,
    CredentialIssued,
    CredentialReceived,
    CredentialAcked,
    Done,
    Declined,
    Problem,
    CredentialRevoked,
}

impl ProtocolState for CredentialExchangeState {
    fn rank(&self) -> u8 {
        use CredentialExchangeState::*;
        match self {
            ProposalSent | ProposalReceived => 0,
            OfferSent | OfferReceived => 1,
            RequestSent | RequestReceived => 2,
            CredentialIssued | CredentialReceived => 3,
            CredentialAcked | Done => 4,
            CredentialRevoked => 5,
            Declined | Problem => 6,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            CredentialExchangeState::Declined
                | CredentialExchangeState::Problem
                | CredentialExchangeState::CredentialRevoked
        )
    }
}

impl CredentialExchangeState {
    pub fn is_acknowledged(&self) -> bool {
        matches!(
            self,
            CredentialExchangeState::CredentialAcked | CredentialExchangeState::Done
        )
    }

    /// Parse a state name from either protocol version. V2 names are hyphenated and
    /// `abandoned` has no local counterpart other than `problem`.
    pub fn from_external(s: &str) -> Option<Self> {
        use CredentialExchangeState::*;
        let state = match s {
            "proposal_sent" | "proposal-sent" => ProposalSent,
            "proposal_received" | "proposal-received" => ProposalReceived,
            "offer_sent" | "offer-sent" => OfferSent,
            "offer_received" | "offer-received" => OfferReceived,
            "request_sent" | "request-sent" => RequestSent,
            "request_received" | "request-received" => RequestReceived,
            "credential_issued" | "credential-issued" => CredentialIssued,
            "credential_received" | "credential-received" => CredentialReceived,
            "credential_acked" => CredentialAcked,
            "done" => Done,
            "declined" => Declined,
            "credential_revoked" | "credential-revoked" => CredentialRevoked,
            "abandoned" | "problem" => Problem,
            _ => return None,
        };
        Some(state)
    }
}

/// Proposal, offer or credential body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum CredentialPayload {
    Indy { attributes: BTreeMap<String, String> },
    JsonLd { document: Value },
}

impl CredentialPayload {
    pub fn indy<K: Into<String>, V: Into<String>>(attributes: impl IntoIterator<Item = (K, V)>) -> Self {
        CredentialPayload::Indy {
            attributes: attributes.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// SHA-256 over the canonical JSON form. Map keys are sorted, so attribute order
    /// does not affect the hash.
    pub fn hash(&self) -> String {
        let canonical = match self {
            CredentialPayload::Indy { attributes } => serde_json::to_vec(attributes),
            CredentialPayload::JsonLd { document } => serde_json::to_vec(document),
        }
        .unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationInfo {
    pub rev_reg_id: Option<String>,
    pub cred_rev_id: Option<String>,
    pub revoked: bool,
}

/// Credential exchange aggregate, both roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialExchange {
    pub id: CredentialExchangeId,
    pub partner_id: Option<PartnerId>,
    pub role: ExchangeRole,
    pub version: ExchangeVersion,
    pub credential_type: CredentialType,
    pub exchange_id: String,
    pub thread_id: Option<String>,
    pub state: CredentialExchangeState,
    pub state_history: StateHistory<CredentialExchangeState>,
    pub schema_id: Option<String>,
    pub cred_def_id: Option<String>,
    pub label: Option<String>,
    pub proposal: Option<CredentialPayload>,
    pub offer: Option<CredentialPayload>,
    pub credential: Option<CredentialPayload>,
    /// Wallet referent of the stored credential (holder only).
    pub referent: Option<String>,
    pub revocation: RevocationInfo,
    pub public: bool,
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialExchange {
    pub fn new(
        role: ExchangeRole,
        version: ExchangeVersion,
        credential_type: CredentialType,
        exchange_id: impl Into<String>,
        state: CredentialExchangeState,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: CredentialExchangeId::new(),
            partner_id: None,
            role,
            version,
            credential_type,
            exchange_id: exchange_id.into(),
            thread_id: None,
            state,
            state_history: StateHistory::starting_at(state, now),
            schema_id: None,
            cred_def_id: None,
            label: None,
            proposal: None,
            offer: None,
            credential: None,
            referent: None,
            revocation: RevocationInfo::default(),
            public: false,
            error_msg: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_state(
        &mut self,
        state: CredentialExchangeState,
        at: DateTime<Utc>,
    ) -> Transition<CredentialExchangeState> {
        let outcome = self.state_history.apply(&mut self.state, state, at);
        if !matches!(outcome, Transition::Duplicate) {
            self.updated_at = Utc::now();
        }
        outcome
    }

    pub fn is_holder(&self) -> bool {
        self.role == ExchangeRole::Holder
    }

    pub fn is_declined(&self) -> bool {
        self.state == CredentialExchangeState::Declined
    }

    /// The offer repeats the proposal we sent, so the request can be sent without asking.
    pub fn offer_matches_proposal(&self, offer: &CredentialPayload) -> bool {
        self.proposal
            .as_ref()
            .map(|proposal| proposal.hash() == offer.hash())
            .unwrap_or(false)
    }

    /// The credential lives in a revocation registry and can be checked for revocation.
    pub fn is_revocation_capable(&self) -> bool {
        self.revocation.rev_reg_id.is_some() && self.revocation.cred_rev_id.is_some()
    }

    /// Revocation is only reachable from an acknowledged (or, for the issuer, issued) credential.
    pub fn can_be_revoked(&self) -> bool {
        !self.revocation.revoked
            && (self.state.is_acknowledged()
                || (self.role == ExchangeRole::Issuer
                    && self.state == CredentialExchangeState::CredentialIssued))
    }

    pub fn mark_revoked(&mut self, at: DateTime<Utc>) -> Transition<CredentialExchangeState> {
        self.revocation.revoked = true;
        self.push_state(CredentialExchangeState::CredentialRevoked, at)
    }

    pub fn set_revocation_ids(&mut self, rev_reg_id: Option<String>, cred_rev_id: Option<String>) {
        if rev_reg_id.is_some() {
            self.revocation.rev_reg_id = rev_reg_id;
        }
        if cred_rev_id.is_some() {
            self.revocation.cred_rev_id = cred_rev_id;
        }
    }
}
