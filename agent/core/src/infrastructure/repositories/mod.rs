// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in the domain
//! layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! Aggregates are stored as JSONB documents next to the indexed lookup columns the
//! reconcilers query by (external exchange id, connection id, natural keys):
//! - **PostgresPartnerRepository**
//! - **PostgresCredentialExchangeRepository**
//! - **PostgresProofExchangeRepository**
//! - **PostgresActivityRepository**
//! - **PostgresNotificationQueue**
//! - **PostgresWebhookRepository**
//! - **PostgresSchemaRepository** / **PostgresCredentialDefinitionRepository**
//!
//! ## In-Memory Repositories
//!
//! `parking_lot::RwLock<HashMap>`-backed storage for tests and development, one per
//! aggregate, below.

pub mod postgres_activity;
pub mod postgres_credential;
pub mod postgres_notification;
pub mod postgres_partner;
pub mod postgres_proof;
pub mod postgres_schema;
pub mod postgres_webhook;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::activity::{Activity, ActivityFilter, ActivityId, ActivityKey};
use crate::domain::credential::{CredentialExchange, CredentialExchangeId, ExchangeRole};
use crate::domain::notification::{PushMessage, QueuedNotification};
use crate::domain::partner::{ConnectionState, Partner, PartnerId};
use crate::domain::proof::{ProofExchange, ProofExchangeId};
use crate::domain::repository::{
    ActivityRepository, CredentialDefinitionRepository, CredentialExchangeRepository,
    NotificationQueueRepository, PartnerRepository, ProofExchangeRepository, RepositoryError,
    SchemaRepository, WebhookRepository,
};
use crate::domain::schema::{CredentialDefinition, SchemaRef};
use crate::domain::webhook::{RegisteredWebhook, WebhookId};

pub use postgres_activity::PostgresActivityRepository;
pub use postgres_credential::PostgresCredentialExchangeRepository;
pub use postgres_notification::PostgresNotificationQueue;
pub use postgres_partner::PostgresPartnerRepository;
pub use postgres_proof::PostgresProofExchangeRepository;
pub use postgres_schema::{PostgresCredentialDefinitionRepository, PostgresSchemaRepository};
pub use postgres_webhook::PostgresWebhookRepository;

#[derive(Clone, Default)]
pub struct InMemoryPartnerRepository {
    partners: Arc<RwLock<HashMap<PartnerId, Partner>>>,
}

impl InMemoryPartnerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PartnerRepository for InMemoryPartnerRepository {
    async fn save(&self, partner: &Partner) -> Result<(), RepositoryError> {
        self.partners.write().insert(partner.id, partner.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: PartnerId) -> Result<Option<Partner>, RepositoryError> {
        Ok(self.partners.read().get(&id).cloned())
    }

    async fn find_by_connection_id(&self, connection_id: &str) -> Result<Option<Partner>, RepositoryError> {
        Ok(self
            .partners
            .read()
            .values()
            .find(|p| p.connection_id.as_deref() == Some(connection_id))
            .cloned())
    }

    async fn find_by_invitation_msg_id(&self, invitation_msg_id: &str) -> Result<Option<Partner>, RepositoryError> {
        Ok(self
            .partners
            .read()
            .values()
            .find(|p| p.invitation_msg_id.as_deref() == Some(invitation_msg_id))
            .cloned())
    }

    async fn find_by_did(&self, did: &str) -> Result<Vec<Partner>, RepositoryError> {
        Ok(self
            .partners
            .read()
            .values()
            .filter(|p| p.did.as_deref() == Some(did))
            .cloned()
            .collect())
    }

    async fn find_pingable(&self, states: &[ConnectionState]) -> Result<Vec<Partner>, RepositoryError> {
        Ok(self
            .partners
            .read()
            .values()
            .filter(|p| p.trust_ping && p.connection_id.is_some() && states.contains(&p.state))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Partner>, RepositoryError> {
        let mut partners: Vec<Partner> = self.partners.read().values().cloned().collect();
        partners.sort_by_key(|p| p.created_at);
        Ok(partners)
    }

    async fn delete(&self, id: PartnerId) -> Result<(), RepositoryError> {
        self.partners.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCredentialExchangeRepository {
    exchanges: Arc<RwLock<HashMap<CredentialExchangeId, CredentialExchange>>>,
}

impl InMemoryCredentialExchangeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialExchangeRepository for InMemoryCredentialExchangeRepository {
    async fn save(&self, exchange: &CredentialExchange) -> Result<(), RepositoryError> {
        self.exchanges.write().insert(exchange.id, exchange.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: CredentialExchangeId) -> Result<Option<CredentialExchange>, RepositoryError> {
        Ok(self.exchanges.read().get(&id).cloned())
    }

    async fn find_by_exchange_id(&self, exchange_id: &str) -> Result<Option<CredentialExchange>, RepositoryError> {
        Ok(self
            .exchanges
            .read()
            .values()
            .find(|e| e.exchange_id == exchange_id)
            .cloned())
    }

    async fn find_by_revocation(
        &self,
        rev_reg_id: &str,
        cred_rev_id: &str,
    ) -> Result<Option<CredentialExchange>, RepositoryError> {
        Ok(self
            .exchanges
            .read()
            .values()
            .find(|e| {
                e.revocation.rev_reg_id.as_deref() == Some(rev_reg_id)
                    && e.revocation.cred_rev_id.as_deref() == Some(cred_rev_id)
            })
            .cloned())
    }

    async fn find_revocation_candidates(&self) -> Result<Vec<CredentialExchange>, RepositoryError> {
        Ok(self
            .exchanges
            .read()
            .values()
            .filter(|e| e.is_holder() && !e.revocation.revoked && e.referent.is_some())
            .cloned()
            .collect())
    }

    async fn list_by_partner(&self, partner_id: PartnerId) -> Result<Vec<CredentialExchange>, RepositoryError> {
        Ok(self
            .exchanges
            .read()
            .values()
            .filter(|e| e.partner_id == Some(partner_id))
            .cloned()
            .collect())
    }

    async fn list_by_role(&self, role: Option<ExchangeRole>) -> Result<Vec<CredentialExchange>, RepositoryError> {
        let mut exchanges: Vec<CredentialExchange> = self
            .exchanges
            .read()
            .values()
            .filter(|e| role.map_or(true, |r| e.role == r))
            .cloned()
            .collect();
        exchanges.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(exchanges)
    }

    async fn delete(&self, id: CredentialExchangeId) -> Result<(), RepositoryError> {
        self.exchanges.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryProofExchangeRepository {
    exchanges: Arc<RwLock<HashMap<ProofExchangeId, ProofExchange>>>,
}

impl InMemoryProofExchangeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.exchanges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.read().is_empty()
    }
}

#[async_trait]
impl ProofExchangeRepository for InMemoryProofExchangeRepository {
    async fn save(&self, exchange: &ProofExchange) -> Result<(), RepositoryError> {
        self.exchanges.write().insert(exchange.id, exchange.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ProofExchangeId) -> Result<Option<ProofExchange>, RepositoryError> {
        Ok(self.exchanges.read().get(&id).cloned())
    }

    async fn find_by_exchange_id(&self, exchange_id: &str) -> Result<Option<ProofExchange>, RepositoryError> {
        Ok(self
            .exchanges
            .read()
            .values()
            .find(|e| e.exchange_id == exchange_id)
            .cloned())
    }

    async fn list_by_partner(&self, partner_id: PartnerId) -> Result<Vec<ProofExchange>, RepositoryError> {
        Ok(self
            .exchanges
            .read()
            .values()
            .filter(|e| e.partner_id == Some(partner_id))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<ProofExchange>, RepositoryError> {
        let mut exchanges: Vec<_> = self.exchanges.read().values().cloned().collect();
        exchanges.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(exchanges)
    }

    async fn delete(&self, id: ProofExchangeId) -> Result<(), RepositoryError> {
        self.exchanges.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryActivityRepository {
    activities: Arc<RwLock<HashMap<ActivityId, Activity>>>,
}

impl InMemoryActivityRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityRepository for InMemoryActivityRepository {
    async fn save(&self, activity: &Activity) -> Result<(), RepositoryError> {
        self.activities.write().insert(activity.id, activity.clone());
        Ok(())
    }

    async fn find_by_key(&self, key: &ActivityKey) -> Result<Option<Activity>, RepositoryError> {
        Ok(self
            .activities
            .read()
            .values()
            .find(|a| a.matches(key))
            .cloned())
    }

    async fn list(&self, filter: &ActivityFilter) -> Result<Vec<Activity>, RepositoryError> {
        let mut activities: Vec<Activity> = self
            .activities
            .read()
            .values()
            .filter(|a| filter.accepts(a))
            .cloned()
            .collect();
        activities.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(activities)
    }

    async fn delete(&self, id: ActivityId) -> Result<(), RepositoryError> {
        self.activities.write().remove(&id);
        Ok(())
    }

    async fn delete_by_partner(&self, partner_id: PartnerId) -> Result<usize, RepositoryError> {
        let mut activities = self.activities.write();
        let before = activities.len();
        activities.retain(|_, a| a.partner_id != Some(partner_id));
        Ok(before - activities.len())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationQueue {
    queue: Arc<Mutex<(i64, VecDeque<QueuedNotification>)>>,
}

impl InMemoryNotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationQueueRepository for InMemoryNotificationQueue {
    async fn enqueue(&self, message: &PushMessage) -> Result<(), RepositoryError> {
        let mut guard = self.queue.lock();
        let (next, queue) = &mut *guard;
        *next += 1;
        queue.push_back(QueuedNotification {
            id: Uuid::new_v4(),
            sequence: *next,
            message: message.clone(),
            queued_at: Utc::now(),
        });
        Ok(())
    }

    async fn take_all(&self) -> Result<Vec<QueuedNotification>, RepositoryError> {
        let mut guard = self.queue.lock();
        Ok(guard.1.drain(..).collect())
    }

    async fn count(&self) -> Result<usize, RepositoryError> {
        Ok(self.queue.lock().1.len())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryWebhookRepository {
    webhooks: Arc<RwLock<HashMap<WebhookId, RegisteredWebhook>>>,
}

impl InMemoryWebhookRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookRepository for InMemoryWebhookRepository {
    async fn save(&self, webhook: &RegisteredWebhook) -> Result<(), RepositoryError> {
        self.webhooks.write().insert(webhook.id, webhook.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: WebhookId) -> Result<Option<RegisteredWebhook>, RepositoryError> {
        Ok(self.webhooks.read().get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<RegisteredWebhook>, RepositoryError> {
        let mut webhooks: Vec<RegisteredWebhook> = self.webhooks.read().values().cloned().collect();
        webhooks.sort_by_key(|w| w.created_at);
        Ok(webhooks)
    }

    async fn delete(&self, id: WebhookId) -> Result<(), RepositoryError> {
        self.webhooks
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("webhook {}", id)))
    }
}

#[derive(Clone, Default)]
pub struct InMemorySchemaRepository {
    schemas: Arc<RwLock<HashMap<String, SchemaRef>>>,
}

impl InMemorySchemaRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchemaRepository for InMemorySchemaRepository {
    async fn save(&self, schema: &SchemaRef) -> Result<(), RepositoryError> {
        self.schemas.write().insert(schema.schema_id.clone(), schema.clone());
        Ok(())
    }

    async fn find_by_schema_id(&self, schema_id: &str) -> Result<Option<SchemaRef>, RepositoryError> {
        Ok(self.schemas.read().get(schema_id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<SchemaRef>, RepositoryError> {
        Ok(self.schemas.read().values().cloned().collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCredentialDefinitionRepository {
    definitions: Arc<RwLock<Vec<CredentialDefinition>>>,
}

impl InMemoryCredentialDefinitionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialDefinitionRepository for InMemoryCredentialDefinitionRepository {
    async fn save(&self, definition: &CredentialDefinition) -> Result<(), RepositoryError> {
        let mut definitions = self.definitions.write();
        match definitions.iter_mut().find(|d| d.id == definition.id) {
            Some(existing) => *existing = definition.clone(),
            None => definitions.push(definition.clone()),
        }
        Ok(())
    }

    async fn find_by_schema_id(&self, schema_id: &str) -> Result<Vec<CredentialDefinition>, RepositoryError> {
        Ok(self
            .definitions
            .read()
            .iter()
            .filter(|d| d.schema_id == schema_id)
            .cloned()
            .collect())
    }

    async fn find_by_cred_def_id(&self, cred_def_id: &str) -> Result<Option<CredentialDefinition>, RepositoryError> {
        Ok(self
            .definitions
            .read()
            .iter()
            .find(|d| d.cred_def_id == cred_def_id)
            .cloned())
    }
}
