// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Proof Exchange Aggregate
//!
//! One row per external presentation exchange id. The acknowledgement path is the only
//! place revealed attributes are written.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Presentation state machine and revealed-attribute extraction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use super::exchange::{ExchangeVersion, ProtocolState, StateHistory, Transition};
use super::partner::PartnerId;

/// Stored problem descriptions are cut to this many characters.
pub const MAX_PROBLEM_LENGTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProofExchangeId(pub Uuid);

impl ProofExchangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ProofExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProofExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofRole {
    Prover,
    Verifier,
}

impl FromStr for ProofRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prover" => Ok(ProofRole::Prover),
            "verifier" => Ok(ProofRole::Verifier),
            other => Err(format!("unknown presentation role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentationExchangeState {
    ProposalSent,
    ProposalReceived,
    RequestSent,
    RequestReceived,
    PresentationSent,
    PresentationReceived,
    Verified,
    PresentationAcked,
    Done,
    Declined,
    Problem,
}

impl ProtocolState for PresentationExchangeState {
    fn rank(&self) -> u8 {
        use PresentationExchangeState::*;
        match self {
            ProposalSent | ProposalReceived => 0,
            RequestSent | RequestReceived => 1,
            PresentationSent | PresentationReceived => 2,
            Verified | PresentationAcked | Done => 3,
            Declined | Problem => 4,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            PresentationExchangeState::Declined | PresentationExchangeState::Problem
        )
    }
}

impl PresentationExchangeState {
    pub fn from_external(s: &str) -> Option<Self> {
        use PresentationExchangeState::*;
        let state = match s {
            "proposal_sent" | "proposal-sent" => ProposalSent,
            "proposal_received" | "proposal-received" => ProposalReceived,
            "request_sent" | "request-sent" => RequestSent,
            "request_received" | "request-received" => RequestReceived,
            "presentation_sent" | "presentation-sent" => PresentationSent,
            "presentation_received" | "presentation-received" => PresentationReceived,
            "verified" => Verified,
            "presentation_acked" => PresentationAcked,
            "done" => Done,
            "declined" => Declined,
            "abandoned" | "problem" => Problem,
            _ => return None,
        };
        Some(state)
    }
}

/// Revealed attributes per referent group: `group → attribute → raw value`.
/// Ungrouped attributes land under their own referent name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevealedAttributes(pub BTreeMap<String, BTreeMap<String, String>>);

impl RevealedAttributes {
    /// Extract from an indy presentation's `requested_proof` section. Accepts either the
    /// presentation itself or the whole record that embeds it.
    pub fn from_presentation(presentation: &Value) -> Self {
        let requested_proof = presentation
            .get("requested_proof")
            .or_else(|| presentation.pointer("/presentation/requested_proof"))
            .or_else(|| presentation.pointer("/by_format/pres/indy/requested_proof"));
        let Some(requested_proof) = requested_proof else {
            return Self::default();
        };

        let mut groups = BTreeMap::new();
        if let Some(attr_groups) = requested_proof.get("revealed_attr_groups").and_then(Value::as_object) {
            for (group, body) in attr_groups {
                let mut values = BTreeMap::new();
                if let Some(attrs) = body.get("values").and_then(Value::as_object) {
                    for (name, value) in attrs {
                        if let Some(raw) = value.get("raw").and_then(Value::as_str) {
                            values.insert(name.clone(), raw.to_string());
                        }
                    }
                }
                groups.insert(group.clone(), values);
            }
        }
        if let Some(attrs) = requested_proof.get("revealed_attrs").and_then(Value::as_object) {
            for (referent, value) in attrs {
                if let Some(raw) = value.get("raw").and_then(Value::as_str) {
                    groups
                        .entry(referent.clone())
                        .or_insert_with(BTreeMap::new)
                        .insert(referent.clone(), raw.to_string());
                }
            }
        }
        Self(groups)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Proof exchange aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofExchange {
    pub id: ProofExchangeId,
    pub partner_id: Option<PartnerId>,
    pub role: ProofRole,
    pub version: ExchangeVersion,
    pub exchange_id: String,
    pub thread_id: Option<String>,
    pub state: PresentationExchangeState,
    pub state_history: StateHistory<PresentationExchangeState>,
    pub verified: bool,
    pub revealed: Option<RevealedAttributes>,
    pub presentation_request: Option<Value>,
    /// Proof material chosen when we proposed a presentation; replayed on auto-present.
    pub proposal_material: Option<Value>,
    pub template_id: Option<Uuid>,
    /// The exchange was started from this side.
    pub self_initiated: bool,
    pub problem: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProofExchange {
    pub fn new(
        role: ProofRole,
        version: ExchangeVersion,
        exchange_id: impl Into<String>,
        state: PresentationExchangeState,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ProofExchangeId::new(),
            partner_id: None,
            role,
            version,
            exchange_id: exchange_id.into(),
            thread_id: None,
            state,
            state_history: StateHistory::starting_at(state, now),
            verified: false,
            revealed: None,
            presentation_request: None,
            proposal_material: None,
            template_id: None,
            self_initiated: false,
            problem: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_state(
        &mut self,
        state: PresentationExchangeState,
        at: DateTime<Utc>,
    ) -> Transition<PresentationExchangeState> {
        let outcome = self.state_history.apply(&mut self.state, state, at);
        if !matches!(outcome, Transition::Duplicate) {
            self.updated_at = Utc::now();
        }
        outcome
    }

    /// Store a problem description, shortened to [`MAX_PROBLEM_LENGTH`] characters and
    /// with the agent's terse abandonment text replaced.
    pub fn set_problem(&mut self, message: &str) {
        let message = if message.trim() == "abandoned: abandoned" {
            "The presentation request was declined by the partner"
        } else {
            message
        };
        self.problem = Some(message.chars().take(MAX_PROBLEM_LENGTH).collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_revealed_attribute_groups_are_extracted() {
        let presentation = json!({
            "requested_proof": {
                "revealed_attr_groups": {
                    "identity": {
                        "sub_proof_index": 0,
                        "values": {
                            "name": { "raw": "Alice", "encoded": "1" },
                            "city": { "raw": "Berlin", "encoded": "2" }
                        }
                    }
                },
                "revealed_attrs": {
                    "email": { "sub_proof_index": 0, "raw": "a@example.org", "encoded": "3" }
                }
            }
        });

        let revealed = RevealedAttributes::from_presentation(&presentation);

        assert_eq!(revealed.0["identity"]["name"], "Alice");
        assert_eq!(revealed.0["identity"]["city"], "Berlin");
        assert_eq!(revealed.0["email"]["email"], "a@example.org");
    }

    #[test]
    fn test_missing_requested_proof_yields_empty() {
        assert!(RevealedAttributes::from_presentation(&json!({})).is_empty());
    }

    #[test]
    fn test_problem_is_truncated_and_rewritten() {
        let mut exchange = ProofExchange::new(
            ProofRole::Verifier,
            ExchangeVersion::V1,
            "px-1",
            PresentationExchangeState::RequestSent,
        );

        exchange.set_problem(&"x".repeat(400));
        assert_eq!(exchange.problem.as_ref().map(|p| p.len()), Some(MAX_PROBLEM_LENGTH));

        exchange.set_problem("abandoned: abandoned");
        assert!(exchange.problem.as_deref().is_some_and(|p| p.contains("declined")));
    }
}
