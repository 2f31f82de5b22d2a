// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on the storage backend configuration,
//! keeping the domain layer free of infrastructure dependencies.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Selects in-memory or PostgreSQL repositories at startup

use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::repository::{
    ActivityRepository, CredentialDefinitionRepository, CredentialExchangeRepository,
    NotificationQueueRepository, PartnerRepository, ProofExchangeRepository, SchemaRepository,
    StorageBackend, WebhookRepository,
};
use crate::infrastructure::repositories::{
    InMemoryActivityRepository, InMemoryCredentialDefinitionRepository,
    InMemoryCredentialExchangeRepository, InMemoryNotificationQueue, InMemoryPartnerRepository,
    InMemoryProofExchangeRepository, InMemorySchemaRepository, InMemoryWebhookRepository,
    PostgresActivityRepository, PostgresCredentialDefinitionRepository,
    PostgresCredentialExchangeRepository, PostgresNotificationQueue, PostgresPartnerRepository,
    PostgresProofExchangeRepository, PostgresSchemaRepository, PostgresWebhookRepository,
};

/// One repository per aggregate, all on the same backend.
#[derive(Clone)]
pub struct Repositories {
    pub partners: Arc<dyn PartnerRepository>,
    pub credentials: Arc<dyn CredentialExchangeRepository>,
    pub proofs: Arc<dyn ProofExchangeRepository>,
    pub activities: Arc<dyn ActivityRepository>,
    pub notifications: Arc<dyn NotificationQueueRepository>,
    pub webhooks: Arc<dyn WebhookRepository>,
    pub schemas: Arc<dyn SchemaRepository>,
    pub credential_definitions: Arc<dyn CredentialDefinitionRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            partners: Arc::new(InMemoryPartnerRepository::new()),
            credentials: Arc::new(InMemoryCredentialExchangeRepository::new()),
            proofs: Arc::new(InMemoryProofExchangeRepository::new()),
            activities: Arc::new(InMemoryActivityRepository::new()),
            notifications: Arc::new(InMemoryNotificationQueue::new()),
            webhooks: Arc::new(InMemoryWebhookRepository::new()),
            schemas: Arc::new(InMemorySchemaRepository::new()),
            credential_definitions: Arc::new(InMemoryCredentialDefinitionRepository::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            partners: Arc::new(PostgresPartnerRepository::new(pool.clone())),
            credentials: Arc::new(PostgresCredentialExchangeRepository::new(pool.clone())),
            proofs: Arc::new(PostgresProofExchangeRepository::new(pool.clone())),
            activities: Arc::new(PostgresActivityRepository::new(pool.clone())),
            notifications: Arc::new(PostgresNotificationQueue::new(pool.clone())),
            webhooks: Arc::new(PostgresWebhookRepository::new(pool.clone())),
            schemas: Arc::new(PostgresSchemaRepository::new(pool.clone())),
            credential_definitions: Arc::new(PostgresCredentialDefinitionRepository::new(pool)),
        }
    }
}

/// Creates the repository bundle for the configured backend. `pool` is only consulted for
/// the PostgreSQL backend.
pub fn create_repositories(backend: &StorageBackend, pool: Option<PgPool>) -> anyhow::Result<Repositories> {
    match (backend, pool) {
        (StorageBackend::InMemory, _) => Ok(Repositories::in_memory()),
        (StorageBackend::PostgreSQL(_), Some(pool)) => Ok(Repositories::postgres(pool)),
        (StorageBackend::PostgreSQL(_), None) => {
            anyhow::bail!("PostgreSQL storage selected but no connection pool was created")
        }
    }
}
