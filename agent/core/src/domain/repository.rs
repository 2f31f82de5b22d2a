// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root: one repository per aggregate, interface
//! defined here, implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `PartnerRepository` | `Partner` | `InMemoryPartnerRepository`, `PostgresPartnerRepository` |
//! | `CredentialExchangeRepository` | `CredentialExchange` | `InMemoryCredentialExchangeRepository`, `PostgresCredentialExchangeRepository` |
//! | `ProofExchangeRepository` | `ProofExchange` | `InMemoryProofExchangeRepository`, `PostgresProofExchangeRepository` |
//! | `ActivityRepository` | `Activity` | `InMemoryActivityRepository`, `PostgresActivityRepository` |
//! | `NotificationQueueRepository` | `QueuedNotification` | `InMemoryNotificationQueue`, `PostgresNotificationQueue` |
//! | `WebhookRepository` | `RegisteredWebhook` | `InMemoryWebhookRepository`, `PostgresWebhookRepository` |
//! | `SchemaRepository` | `SchemaRef` | `InMemorySchemaRepository`, `PostgresSchemaRepository` |
//! | `CredentialDefinitionRepository` | `CredentialDefinition` | `InMemoryCredentialDefinitionRepository`, `PostgresCredentialDefinitionRepository` |
//!
//! ## Storage Backend Abstraction
//!
//! Concrete implementations are selected at startup from the `storage` section of the
//! agent configuration. In-memory implementations serve development and tests;
//! PostgreSQL implementations serve production.

use async_trait::async_trait;

use crate::domain::activity::{Activity, ActivityFilter, ActivityId, ActivityKey};
use crate::domain::credential::{CredentialExchange, CredentialExchangeId, ExchangeRole};
use crate::domain::notification::{PushMessage, QueuedNotification};
use crate::domain::partner::{ConnectionState, Partner, PartnerId};
use crate::domain::proof::{ProofExchange, ProofExchangeId};
use crate::domain::schema::{CredentialDefinition, SchemaRef};
use crate::domain::webhook::{RegisteredWebhook, WebhookId};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

#[async_trait]
pub trait PartnerRepository: Send + Sync {
    /// Save partner (create or update)
    async fn save(&self, partner: &Partner) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: PartnerId) -> Result<Option<Partner>, RepositoryError>;

    async fn find_by_connection_id(&self, connection_id: &str) -> Result<Option<Partner>, RepositoryError>;

    async fn find_by_invitation_msg_id(&self, invitation_msg_id: &str) -> Result<Option<Partner>, RepositoryError>;

    async fn find_by_did(&self, did: &str) -> Result<Vec<Partner>, RepositoryError>;

    /// Partners in any of `states` that take part in the liveness probe.
    async fn find_pingable(&self, states: &[ConnectionState]) -> Result<Vec<Partner>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Partner>, RepositoryError>;

    async fn delete(&self, id: PartnerId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CredentialExchangeRepository: Send + Sync {
    async fn save(&self, exchange: &CredentialExchange) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: CredentialExchangeId) -> Result<Option<CredentialExchange>, RepositoryError>;

    /// Lookup by the agent's exchange id.
    async fn find_by_exchange_id(&self, exchange_id: &str) -> Result<Option<CredentialExchange>, RepositoryError>;

    async fn find_by_revocation(
        &self,
        rev_reg_id: &str,
        cred_rev_id: &str,
    ) -> Result<Option<CredentialExchange>, RepositoryError>;

    /// Holder exchanges with a stored credential referent that are not revoked yet.
    async fn find_revocation_candidates(&self) -> Result<Vec<CredentialExchange>, RepositoryError>;

    async fn list_by_partner(&self, partner_id: PartnerId) -> Result<Vec<CredentialExchange>, RepositoryError>;

    async fn list_by_role(&self, role: Option<ExchangeRole>) -> Result<Vec<CredentialExchange>, RepositoryError>;

    async fn delete(&self, id: CredentialExchangeId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProofExchangeRepository: Send + Sync {
    async fn save(&self, exchange: &ProofExchange) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ProofExchangeId) -> Result<Option<ProofExchange>, RepositoryError>;

    async fn find_by_exchange_id(&self, exchange_id: &str) -> Result<Option<ProofExchange>, RepositoryError>;

    async fn list_by_partner(&self, partner_id: PartnerId) -> Result<Vec<ProofExchange>, RepositoryError>;

    /// Newest first.
    async fn list_all(&self) -> Result<Vec<ProofExchange>, RepositoryError>;

    async fn delete(&self, id: ProofExchangeId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn save(&self, activity: &Activity) -> Result<(), RepositoryError>;

    async fn find_by_key(&self, key: &ActivityKey) -> Result<Option<Activity>, RepositoryError>;

    /// Newest first.
    async fn list(&self, filter: &ActivityFilter) -> Result<Vec<Activity>, RepositoryError>;

    async fn delete(&self, id: ActivityId) -> Result<(), RepositoryError>;

    async fn delete_by_partner(&self, partner_id: PartnerId) -> Result<usize, RepositoryError>;
}

/// The shared store-and-forward mailbox of the notification fan-out.
#[async_trait]
pub trait NotificationQueueRepository: Send + Sync {
    async fn enqueue(&self, message: &PushMessage) -> Result<(), RepositoryError>;

    /// Remove and return every queued message in insertion order.
    async fn take_all(&self) -> Result<Vec<QueuedNotification>, RepositoryError>;

    async fn count(&self) -> Result<usize, RepositoryError>;
}

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn save(&self, webhook: &RegisteredWebhook) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: WebhookId) -> Result<Option<RegisteredWebhook>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<RegisteredWebhook>, RepositoryError>;

    async fn delete(&self, id: WebhookId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait SchemaRepository: Send + Sync {
    async fn save(&self, schema: &SchemaRef) -> Result<(), RepositoryError>;

    async fn find_by_schema_id(&self, schema_id: &str) -> Result<Option<SchemaRef>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<SchemaRef>, RepositoryError>;
}

#[async_trait]
pub trait CredentialDefinitionRepository: Send + Sync {
    async fn save(&self, definition: &CredentialDefinition) -> Result<(), RepositoryError>;

    /// Oldest first; callers take the first match.
    async fn find_by_schema_id(&self, schema_id: &str) -> Result<Vec<CredentialDefinition>, RepositoryError>;

    async fn find_by_cred_def_id(&self, cred_def_id: &str) -> Result<Option<CredentialDefinition>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
