// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Schemas and credential definitions known locally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::credential::CredentialType;

/// A schema the agent has seen or configured. Holders create these lazily when an offer
/// references an unknown schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRef {
    pub id: Uuid,
    /// Ledger schema id for indy, `@context`/type key for JSON-LD.
    pub schema_id: String,
    pub label: Option<String>,
    pub credential_type: CredentialType,
    pub attributes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl SchemaRef {
    pub fn new(schema_id: impl Into<String>, credential_type: CredentialType) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_id: schema_id.into(),
            label: None,
            credential_type,
            attributes: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// A credential definition this agent can issue with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDefinition {
    pub id: Uuid,
    pub schema_id: String,
    pub cred_def_id: String,
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CredentialDefinition {
    pub fn new(schema_id: impl Into<String>, cred_def_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_id: schema_id.into(),
            cred_def_id: cred_def_id.into(),
            tag: None,
            created_at: Utc::now(),
        }
    }
}

/// Issuer DID embedded in an indy credential definition id
/// (`<did>:3:CL:<schema seq no>:<tag>`).
pub fn issuer_did_of(cred_def_id: &str) -> Option<&str> {
    cred_def_id
        .split_once(":3:")
        .map(|(did, _)| did)
        .filter(|did| !did.is_empty())
}
