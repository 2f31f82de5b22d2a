// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! External Agent Gateway
//!
//! The only path to perform protocol actions and to re-fetch authoritative record state
//! from the external identity agent. Every call is fallible: the agent may be unreachable,
//! slow (bounded by the client timeout) or may no longer know the record.
//!
//! The contract is split by exchange family so reconcilers and jobs depend only on what
//! they call:
//!
//! | Trait | Used by |
//! |-------|---------|
//! | `ConnectionGateway` | connection reconciler, liveness probe, stale-connection prune |
//! | `CredentialGateway` | holder/issuer reconcilers, revocation poll, credential-type index |
//! | `ProofGateway` | proof reconciler |
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Anti-corruption boundary towards the external agent

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::credential::{CredentialPayload, CredentialType};
use super::exchange::ExchangeVersion;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Transport failure or timeout. Retryable.
    #[error("agent unavailable: {0}")]
    Unavailable(String),

    /// The agent does not know the record.
    #[error("not found at agent: {0}")]
    NotFound(String),

    #[error("agent rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected agent response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

/// Invitation created at the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationRecord {
    pub invitation_msg_id: String,
    pub invitation_url: String,
    pub invitation: Value,
}

/// Connection record returned when accepting an invitation or connecting to a DID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHandle {
    pub connection_id: String,
    pub invitation_msg_id: Option<String>,
    pub state: Option<String>,
}

/// Ids of an exchange the agent just started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeHandle {
    pub exchange_id: String,
    pub thread_id: Option<String>,
}

/// Proposal or offer sent to a partner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialTerms {
    pub version: ExchangeVersion,
    pub connection_id: String,
    pub credential_type: CredentialType,
    pub schema_id: Option<String>,
    pub cred_def_id: Option<String>,
    pub payload: CredentialPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RevocationIds {
    pub rev_reg_id: Option<String>,
    pub cred_rev_id: Option<String>,
}

/// Ledger schema as published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSchema {
    pub schema_id: String,
    pub name: String,
    pub version: String,
    pub attributes: Vec<String>,
}

#[async_trait]
pub trait ConnectionGateway: Send + Sync {
    async fn create_invitation(&self, alias: Option<&str>) -> Result<InvitationRecord, GatewayError>;

    async fn receive_invitation(
        &self,
        invitation: &Value,
        alias: Option<&str>,
    ) -> Result<ConnectionHandle, GatewayError>;

    async fn accept_connection_request(&self, connection_id: &str) -> Result<(), GatewayError>;

    async fn remove_connection(&self, connection_id: &str) -> Result<(), GatewayError>;

    async fn list_connection_ids(&self) -> Result<Vec<String>, GatewayError>;

    /// Sends a trust ping; returns the ping's thread id.
    async fn send_ping(&self, connection_id: &str) -> Result<String, GatewayError>;
}

#[async_trait]
pub trait CredentialGateway: Send + Sync {
    /// Re-fetch the authoritative record.
    async fn fetch_credential_exchange(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
    ) -> Result<Value, GatewayError>;

    async fn send_credential_proposal(&self, terms: &CredentialTerms) -> Result<ExchangeHandle, GatewayError>;

    async fn send_credential_offer(&self, terms: &CredentialTerms) -> Result<ExchangeHandle, GatewayError>;

    /// Answer a proposal we received with an offer on the same exchange.
    async fn send_offer_for_proposal(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
    ) -> Result<(), GatewayError>;

    async fn send_credential_request(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
        holder_did: Option<&str>,
    ) -> Result<(), GatewayError>;

    async fn issue_credential(&self, version: ExchangeVersion, exchange_id: &str) -> Result<(), GatewayError>;

    async fn send_credential_problem_report(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
        description: &str,
    ) -> Result<(), GatewayError>;

    async fn remove_credential_exchange(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
    ) -> Result<(), GatewayError>;

    async fn revoke_credential(
        &self,
        rev_reg_id: &str,
        cred_rev_id: &str,
        connection_id: Option<&str>,
    ) -> Result<(), GatewayError>;

    /// Live revocation status of a credential held in the wallet.
    async fn is_credential_revoked(&self, referent: &str) -> Result<bool, GatewayError>;

    async fn fetch_credential_revocation_ids(&self, referent: &str) -> Result<RevocationIds, GatewayError>;

    async fn fetch_schema(&self, schema_id: &str) -> Result<LedgerSchema, GatewayError>;

    async fn credential_definitions_for_schema(&self, schema_id: &str) -> Result<Vec<String>, GatewayError>;
}

#[async_trait]
pub trait ProofGateway: Send + Sync {
    async fn send_presentation_request(
        &self,
        version: ExchangeVersion,
        connection_id: &str,
        request: &Value,
    ) -> Result<ExchangeHandle, GatewayError>;

    async fn send_presentation_proposal(
        &self,
        connection_id: &str,
        proposal: &Value,
    ) -> Result<ExchangeHandle, GatewayError>;

    async fn send_presentation(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
        material: &Value,
    ) -> Result<(), GatewayError>;

    async fn send_presentation_problem_report(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
        description: &str,
    ) -> Result<(), GatewayError>;

    async fn remove_presentation_exchange(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
    ) -> Result<(), GatewayError>;
}
