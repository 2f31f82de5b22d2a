// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Inbound Agent Events
//!
//! Anti-corruption layer between the external agent's webhook payloads and the
//! reconcilers. Record shapes are owned by the agent and versioned (v1 and v2 protocol
//! records differ in field names and nesting); everything past this module only sees the
//! typed events below.
//!
//! Decoding is tolerant: unknown fields are ignored and optional fields may be missing. A
//! payload is rejected only when the fields a reconciler needs to find its aggregate
//! (the exchange or connection id, the role) are absent.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Typed inbound events, decoded from raw agent records

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::credential::{CredentialExchangeState, CredentialPayload, CredentialType, ExchangeRole};
use crate::domain::exchange::ExchangeVersion;
use crate::domain::partner::ConnectionState;
use crate::domain::proof::{PresentationExchangeState, ProofRole};

/// The agent writes `2021-05-04 12:34:56.123456Z`; RFC 3339 with a `T` is accepted too.
pub fn parse_agent_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let normalized = raw.trim().replacen(' ', "T", 1);
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn timestamp_or_now(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(parse_agent_timestamp).unwrap_or_else(Utc::now)
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn owned_at(value: &Value, pointer: &str) -> Option<String> {
    str_at(value, pointer).map(str::to_string)
}

/// `verified` arrives as a string in v1 records and as a bool elsewhere.
fn flag_at(value: &Value, pointer: &str) -> Option<bool> {
    match value.pointer(pointer)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Credential preview attributes: `[{ "name": .., "value": .. }]`.
fn preview_attributes(value: &Value, pointer: &str) -> Option<CredentialPayload> {
    let attributes = value.pointer(pointer)?.as_array()?;
    let mut map = BTreeMap::new();
    for attribute in attributes {
        if let (Some(name), Some(value)) = (
            attribute.get("name").and_then(Value::as_str),
            attribute.get("value").and_then(Value::as_str),
        ) {
            map.insert(name.to_string(), value.to_string());
        }
    }
    Some(CredentialPayload::Indy { attributes: map })
}

/// Stored indy credential: either `attrs: {name: value}` or `values: {name: {raw}}`.
fn indy_credential(value: &Value) -> Option<CredentialPayload> {
    if let Some(attrs) = value.pointer("/credential/attrs").and_then(Value::as_object) {
        let attributes = attrs
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect();
        return Some(CredentialPayload::Indy { attributes });
    }
    let values = value
        .pointer("/raw_credential/values")
        .or_else(|| value.pointer("/credential/values"))?
        .as_object()?;
    let attributes = values
        .iter()
        .filter_map(|(k, v)| v.get("raw").and_then(Value::as_str).map(|raw| (k.clone(), raw.to_string())))
        .collect();
    Some(CredentialPayload::Indy { attributes })
}

/// Schema key of a JSON-LD credential: its most specific `type`, else its last context.
pub fn json_ld_schema_key(document: &Value) -> Option<String> {
    let most_specific_type = document
        .get("type")
        .and_then(Value::as_array)
        .and_then(|types| {
            types
                .iter()
                .filter_map(Value::as_str)
                .rfind(|t| *t != "VerifiableCredential")
        });
    most_specific_type
        .or_else(|| {
            document
                .get("@context")
                .and_then(Value::as_array)
                .and_then(|ctx| ctx.iter().filter_map(Value::as_str).last())
        })
        .map(str::to_string)
}

// ============================================================================
// Connections
// ============================================================================

/// Role the peer plays in the connection, as reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TheirRole {
    /// The peer used our invitation.
    Invitee,
    /// The peer contacted our public DID without an invitation.
    Requester,
    Inviter,
    Responder,
    Unknown,
}

impl TheirRole {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("invitee") => TheirRole::Invitee,
            Some("requester") => TheirRole::Requester,
            Some("inviter") => TheirRole::Inviter,
            Some("responder") => TheirRole::Responder,
            _ => TheirRole::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub connection_id: String,
    pub invitation_msg_id: Option<String>,
    pub their_did: Option<String>,
    pub their_public_did: Option<String>,
    pub their_label: Option<String>,
    pub state: ConnectionState,
    pub their_role: TheirRole,
    pub did_exchange: bool,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionEvent {
    pub fn decode(record: &Value) -> Result<Self, String> {
        let connection_id = owned_at(record, "/connection_id").ok_or("missing connection_id")?;
        let raw_state = str_at(record, "/state")
            .or_else(|| str_at(record, "/rfc23_state"))
            .ok_or("missing state")?;
        let state = raw_state.parse::<ConnectionState>()?;
        Ok(Self {
            connection_id,
            invitation_msg_id: owned_at(record, "/invitation_msg_id"),
            their_did: owned_at(record, "/their_did"),
            their_public_did: owned_at(record, "/their_public_did"),
            their_label: owned_at(record, "/their_label"),
            state,
            their_role: TheirRole::parse(str_at(record, "/their_role")),
            did_exchange: str_at(record, "/connection_protocol")
                .map_or(false, |p| p.starts_with("didexchange")),
            updated_at: timestamp_or_now(str_at(record, "/updated_at")),
        })
    }

    /// The peer initiated the connection (through our invitation or our public DID).
    pub fn is_incoming(&self) -> bool {
        matches!(self.their_role, TheirRole::Invitee | TheirRole::Requester)
    }

    /// The peer answered an invitation this agent created.
    pub fn is_invitation_response(&self) -> bool {
        self.their_role == TheirRole::Invitee
    }

    pub fn is_invitation(&self) -> bool {
        self.state == ConnectionState::Invitation
    }

    /// Key serializing every event of one connection, stable from the invitation onwards.
    pub fn lock_key(&self) -> &str {
        self.invitation_msg_id.as_deref().unwrap_or(&self.connection_id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PingEvent {
    pub connection_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub responded: bool,
    #[serde(default)]
    pub state: Option<String>,
}

impl PingEvent {
    /// Our ping was answered.
    pub fn is_response(&self) -> bool {
        self.responded || self.state.as_deref() == Some("response_received")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BasicMessageEvent {
    pub connection_id: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub content: String,
}

// ============================================================================
// Credentials
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CredentialEvent {
    pub version: ExchangeVersion,
    pub exchange_id: String,
    pub connection_id: Option<String>,
    pub thread_id: Option<String>,
    pub role: ExchangeRole,
    /// `None` when the agent sent a state this agent does not track.
    pub state: Option<CredentialExchangeState>,
    pub credential_type: CredentialType,
    pub schema_id: Option<String>,
    pub cred_def_id: Option<String>,
    pub proposal: Option<CredentialPayload>,
    pub offer: Option<CredentialPayload>,
    pub credential: Option<CredentialPayload>,
    pub referent: Option<String>,
    pub rev_reg_id: Option<String>,
    pub cred_rev_id: Option<String>,
    pub error_msg: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialEvent {
    /// `issue_credential` topic.
    pub fn decode_v1(record: &Value) -> Result<Self, String> {
        let exchange_id = owned_at(record, "/credential_exchange_id").ok_or("missing credential_exchange_id")?;
        let role: ExchangeRole = str_at(record, "/role").ok_or("missing role")?.parse()?;
        let credential = indy_credential(record);
        Ok(Self {
            version: ExchangeVersion::V1,
            exchange_id,
            connection_id: owned_at(record, "/connection_id"),
            thread_id: owned_at(record, "/thread_id"),
            role,
            state: str_at(record, "/state").and_then(CredentialExchangeState::from_external),
            credential_type: CredentialType::Indy,
            schema_id: owned_at(record, "/schema_id"),
            cred_def_id: owned_at(record, "/credential_definition_id"),
            proposal: preview_attributes(record, "/credential_proposal_dict/credential_proposal/attributes"),
            offer: preview_attributes(record, "/credential_offer_dict/credential_preview/attributes"),
            credential,
            referent: owned_at(record, "/credential_id"),
            rev_reg_id: owned_at(record, "/revoc_reg_id"),
            cred_rev_id: owned_at(record, "/revocation_id"),
            error_msg: owned_at(record, "/error_msg"),
            updated_at: timestamp_or_now(str_at(record, "/updated_at")),
        })
    }

    /// `issue_credential_v2_0` topic. Accepts the bare record or one wrapped in `cred_ex_record`.
    pub fn decode_v2(payload: &Value) -> Result<Self, String> {
        let record = payload.get("cred_ex_record").unwrap_or(payload);
        let exchange_id = owned_at(record, "/cred_ex_id").ok_or("missing cred_ex_id")?;
        let role: ExchangeRole = str_at(record, "/role").ok_or("missing role")?.parse()?;

        let ld_document = record
            .pointer("/by_format/cred_issue/ld_proof")
            .or_else(|| record.pointer("/by_format/cred_offer/ld_proof/credential"))
            .or_else(|| record.pointer("/by_format/cred_proposal/ld_proof/credential"));
        let credential_type = if ld_document.is_some() {
            CredentialType::JsonLd
        } else {
            CredentialType::Indy
        };

        let (proposal, offer, credential, schema_id) = match (credential_type, ld_document) {
            (CredentialType::JsonLd, Some(document)) => {
                let payload = CredentialPayload::JsonLd {
                    document: document.clone(),
                };
                let issued = record.pointer("/by_format/cred_issue/ld_proof").is_some();
                let offered = record.pointer("/by_format/cred_offer/ld_proof").is_some();
                (
                    (!offered && !issued).then(|| payload.clone()),
                    (offered && !issued).then(|| payload.clone()),
                    issued.then(|| payload.clone()),
                    json_ld_schema_key(document),
                )
            }
            _ => (
                preview_attributes(record, "/cred_proposal/credential_preview/attributes"),
                preview_attributes(record, "/cred_offer/credential_preview/attributes"),
                preview_attributes(record, "/cred_preview/attributes").or_else(|| indy_credential(record)),
                owned_at(record, "/by_format/cred_offer/indy/schema_id")
                    .or_else(|| owned_at(record, "/by_format/cred_proposal/indy/schema_id")),
            ),
        };

        Ok(Self {
            version: ExchangeVersion::V2,
            exchange_id,
            connection_id: owned_at(record, "/connection_id"),
            thread_id: owned_at(record, "/thread_id"),
            role,
            state: str_at(record, "/state").and_then(CredentialExchangeState::from_external),
            credential_type,
            schema_id,
            cred_def_id: owned_at(record, "/by_format/cred_offer/indy/cred_def_id")
                .or_else(|| owned_at(record, "/by_format/cred_proposal/indy/cred_def_id")),
            proposal,
            offer,
            credential,
            referent: owned_at(payload, "/indy/cred_id_stored").or_else(|| owned_at(payload, "/ld_proof/cred_id_stored")),
            rev_reg_id: owned_at(payload, "/indy/rev_reg_id"),
            cred_rev_id: owned_at(payload, "/indy/cred_rev_id"),
            error_msg: owned_at(record, "/error_msg"),
            updated_at: timestamp_or_now(str_at(record, "/updated_at")),
        })
    }

    /// Payload of the proposal, offer or credential, whichever is furthest along.
    pub fn latest_payload(&self) -> Option<&CredentialPayload> {
        self.credential
            .as_ref()
            .or(self.offer.as_ref())
            .or(self.proposal.as_ref())
    }
}

/// `issue_credential_v2_0_indy` topic: revocation details of an issued or stored credential.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RevocationInfoEvent {
    pub cred_ex_id: String,
    #[serde(default)]
    pub rev_reg_id: Option<String>,
    #[serde(default)]
    pub cred_rev_id: Option<String>,
    #[serde(default)]
    pub cred_id_stored: Option<String>,
}

/// `revocation_notification` topic. The thread id encodes `indy::<registry>::<index>`.
#[derive(Debug, Clone, PartialEq)]
pub struct RevocationNotice {
    pub rev_reg_id: String,
    pub cred_rev_id: String,
    pub comment: Option<String>,
}

impl RevocationNotice {
    pub fn decode(payload: &Value) -> Result<Self, String> {
        let thread_id = str_at(payload, "/thread_id").ok_or("missing thread_id")?;
        let mut parts = thread_id.split("::");
        match (parts.next(), parts.next(), parts.next()) {
            (Some("indy"), Some(rev_reg_id), Some(cred_rev_id)) if !rev_reg_id.is_empty() && !cred_rev_id.is_empty() => {
                Ok(Self {
                    rev_reg_id: rev_reg_id.to_string(),
                    cred_rev_id: cred_rev_id.to_string(),
                    comment: owned_at(payload, "/comment"),
                })
            }
            _ => Err(format!("unexpected revocation thread id '{}'", thread_id)),
        }
    }
}

// ============================================================================
// Presentations
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PresentationEvent {
    pub version: ExchangeVersion,
    pub exchange_id: String,
    pub connection_id: Option<String>,
    pub thread_id: Option<String>,
    pub role: ProofRole,
    pub state: Option<PresentationExchangeState>,
    pub verified: Option<bool>,
    pub auto_present: bool,
    pub presentation_request: Option<Value>,
    pub error_msg: Option<String>,
    /// The full record; revealed attributes are read from it on acknowledgement.
    pub record: Value,
    pub updated_at: DateTime<Utc>,
}

impl PresentationEvent {
    /// `present_proof` topic.
    pub fn decode_v1(record: &Value) -> Result<Self, String> {
        Self::decode(record, ExchangeVersion::V1, "/presentation_exchange_id", "/presentation_request")
    }

    /// `present_proof_v2_0` topic.
    pub fn decode_v2(record: &Value) -> Result<Self, String> {
        Self::decode(record, ExchangeVersion::V2, "/pres_ex_id", "/by_format/pres_request/indy")
    }

    fn decode(
        record: &Value,
        version: ExchangeVersion,
        id_pointer: &str,
        request_pointer: &str,
    ) -> Result<Self, String> {
        let exchange_id = owned_at(record, id_pointer).ok_or_else(|| format!("missing {}", &id_pointer[1..]))?;
        let role: ProofRole = str_at(record, "/role").ok_or("missing role")?.parse()?;
        Ok(Self {
            version,
            exchange_id,
            connection_id: owned_at(record, "/connection_id"),
            thread_id: owned_at(record, "/thread_id"),
            role,
            state: str_at(record, "/state").and_then(PresentationExchangeState::from_external),
            verified: flag_at(record, "/verified"),
            auto_present: flag_at(record, "/auto_present").unwrap_or(false),
            presentation_request: record.pointer(request_pointer).cloned(),
            error_msg: owned_at(record, "/error_msg"),
            record: record.clone(),
            updated_at: timestamp_or_now(str_at(record, "/updated_at")),
        })
    }

    /// Verifier saw a verified presentation, or prover saw the acknowledgement.
    pub fn is_acknowledgement(&self) -> bool {
        use PresentationExchangeState::*;
        match (self.role, self.state) {
            (ProofRole::Verifier, Some(Verified)) => true,
            (ProofRole::Verifier, Some(Done)) => self.verified.is_some(),
            (ProofRole::Prover, Some(PresentationAcked | Done)) => true,
            _ => false,
        }
    }
}
