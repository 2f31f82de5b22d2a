// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Credential Exchange Reconcilers
//!
//! [`HolderReconciler`] and [`IssuerReconciler`] drive the two sides of credential issuance.
//! Both share one [`CredentialCore`], so work on a given external exchange id is
//! serialized across roles, and both defer family specifics (schema lookup, default
//! protocol version) to a [`CredentialFamily`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Credential state machine drivers

pub mod holder;
pub mod issuer;

pub use holder::HolderReconciler;
pub use issuer::IssuerReconciler;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::error::ExchangeError;
use crate::application::inbound::{json_ld_schema_key, CredentialEvent};
use crate::domain::credential::{
    CredentialExchange, CredentialExchangeId, CredentialExchangeState, CredentialPayload, CredentialType,
};
use crate::domain::events::DomainEvent;
use crate::domain::exchange::{ExchangeVersion, Transition};
use crate::domain::gateway::{CredentialGateway, GatewayError};
use crate::domain::partner::{Partner, PartnerId};
use crate::domain::repository::{
    CredentialExchangeRepository, PartnerRepository, RepositoryError, SchemaRepository,
};
use crate::domain::schema::SchemaRef;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::key_lock::KeyedLocks;

/// Family-specific behaviour of a credential type.
#[async_trait]
pub trait CredentialFamily: Send + Sync {
    fn credential_type(&self) -> CredentialType;

    /// Protocol version used when this side starts an exchange.
    fn default_version(&self) -> ExchangeVersion;

    /// Key the schema of an inbound exchange is stored under, if one can be derived.
    fn schema_key(&self, event: &CredentialEvent) -> Option<String>;

    /// Describe a schema not stored locally yet. Never fails; an unreachable ledger yields
    /// a bare reference.
    async fn describe_schema(&self, key: &str) -> SchemaRef;
}

pub struct IndyFamily {
    gateway: Arc<dyn CredentialGateway>,
}

impl IndyFamily {
    pub fn new(gateway: Arc<dyn CredentialGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl CredentialFamily for IndyFamily {
    fn credential_type(&self) -> CredentialType {
        CredentialType::Indy
    }

    fn default_version(&self) -> ExchangeVersion {
        ExchangeVersion::V1
    }

    fn schema_key(&self, event: &CredentialEvent) -> Option<String> {
        event.schema_id.clone()
    }

    async fn describe_schema(&self, key: &str) -> SchemaRef {
        let mut schema = SchemaRef::new(key, CredentialType::Indy);
        match self.gateway.fetch_schema(key).await {
            Ok(ledger) => {
                schema.label = Some(ledger.name);
                schema.attributes = ledger.attributes;
            }
            Err(e) => warn!(schema_id = key, error = %e, "Schema lookup failed, storing bare reference"),
        }
        schema
    }
}

pub struct JsonLdFamily;

#[async_trait]
impl CredentialFamily for JsonLdFamily {
    fn credential_type(&self) -> CredentialType {
        CredentialType::JsonLd
    }

    fn default_version(&self) -> ExchangeVersion {
        ExchangeVersion::V2
    }

    fn schema_key(&self, event: &CredentialEvent) -> Option<String> {
        match event.latest_payload() {
            Some(CredentialPayload::JsonLd { document }) => json_ld_schema_key(document),
            _ => None,
        }
    }

    async fn describe_schema(&self, key: &str) -> SchemaRef {
        let mut schema = SchemaRef::new(key, CredentialType::JsonLd);
        // The key ends with the credential type name.
        schema.label = key.rsplit(['#', '/']).next().filter(|s| !s.is_empty()).map(str::to_string);
        schema
    }
}

/// State shared by both credential roles.
pub struct CredentialCore {
    pub(crate) credentials: Arc<dyn CredentialExchangeRepository>,
    pub(crate) partners: Arc<dyn PartnerRepository>,
    schemas: Arc<dyn SchemaRepository>,
    pub(crate) gateway: Arc<dyn CredentialGateway>,
    event_bus: Arc<EventBus>,
    pub(crate) locks: KeyedLocks,
    families: HashMap<CredentialType, Arc<dyn CredentialFamily>>,
}

impl CredentialCore {
    pub fn new(
        credentials: Arc<dyn CredentialExchangeRepository>,
        partners: Arc<dyn PartnerRepository>,
        schemas: Arc<dyn SchemaRepository>,
        gateway: Arc<dyn CredentialGateway>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let mut families: HashMap<CredentialType, Arc<dyn CredentialFamily>> = HashMap::new();
        families.insert(CredentialType::Indy, Arc::new(IndyFamily::new(gateway.clone())));
        families.insert(CredentialType::JsonLd, Arc::new(JsonLdFamily));
        Self {
            credentials,
            partners,
            schemas,
            gateway,
            event_bus,
            locks: KeyedLocks::default(),
            families,
        }
    }

    pub fn with_family(mut self, family: Arc<dyn CredentialFamily>) -> Self {
        self.families.insert(family.credential_type(), family);
        self
    }

    pub fn family(&self, credential_type: CredentialType) -> Option<&Arc<dyn CredentialFamily>> {
        self.families.get(&credential_type)
    }

    pub fn default_version(&self, credential_type: CredentialType) -> ExchangeVersion {
        self.family(credential_type)
            .map(|f| f.default_version())
            .unwrap_or_default()
    }

    /// Schema of an inbound exchange, stored on first sight.
    pub async fn resolve_schema(&self, event: &CredentialEvent) -> Result<Option<SchemaRef>, RepositoryError> {
        let Some(family) = self.family(event.credential_type) else {
            return Ok(None);
        };
        let Some(key) = family.schema_key(event) else {
            return Ok(None);
        };
        if let Some(schema) = self.schemas.find_by_schema_id(&key).await? {
            return Ok(Some(schema));
        }
        let schema = family.describe_schema(&key).await;
        self.schemas.save(&schema).await?;
        debug!(schema_id = %schema.schema_id, "Stored schema first seen on an exchange");
        Ok(Some(schema))
    }

    pub async fn partner_for_connection(&self, connection_id: Option<&str>) -> Result<Option<PartnerId>, RepositoryError> {
        match connection_id {
            Some(connection_id) => Ok(self
                .partners
                .find_by_connection_id(connection_id)
                .await?
                .map(|p| p.id)),
            None => Ok(None),
        }
    }

    /// Partner plus its connection id; exchanges cannot start before the connection exists.
    pub async fn connected_partner(&self, partner_id: PartnerId) -> Result<(Partner, String), ExchangeError> {
        let partner = self
            .partners
            .find_by_id(partner_id)
            .await?
            .ok_or_else(|| ExchangeError::PartnerNotFound(partner_id.to_string()))?;
        let connection_id = partner
            .connection_id
            .clone()
            .ok_or_else(|| ExchangeError::InvalidState("partner has no connection yet".to_string()))?;
        Ok((partner, connection_id))
    }

    pub async fn find(&self, id: CredentialExchangeId) -> Result<CredentialExchange, ExchangeError> {
        self.credentials
            .find_by_id(id)
            .await?
            .ok_or_else(|| ExchangeError::NotFound(id.to_string()))
    }

    /// Confirm the agent still holds the exchange. When it does not, the local row becomes
    /// `problem` and the caller gets [`ExchangeError::NotFound`]. Must run under the
    /// exchange lock.
    pub async fn ensure_live(&self, mut exchange: CredentialExchange) -> Result<CredentialExchange, ExchangeError> {
        match self
            .gateway
            .fetch_credential_exchange(exchange.version, &exchange.exchange_id)
            .await
        {
            Ok(_) => Ok(exchange),
            Err(GatewayError::NotFound(_)) => {
                info!(exchange_id = %exchange.exchange_id, "Exchange gone at agent, marking as problem");
                exchange.error_msg = Some("exchange no longer exists at the agent".to_string());
                let transition = exchange.push_state(CredentialExchangeState::Problem, Utc::now());
                self.credentials.save(&exchange).await?;
                if transition.is_advanced() {
                    self.publish(DomainEvent::CredentialProblem {
                        exchange: exchange.clone(),
                        occurred_at: Utc::now(),
                    });
                }
                Err(ExchangeError::NotFound(exchange.exchange_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Clear the partner reference on every exchange of a removed partner. Each row is
    /// re-read under its exchange lock so a concurrent reconcile cannot write the old
    /// reference back.
    pub async fn detach_partner(&self, partner_id: PartnerId) -> Result<usize, ExchangeError> {
        let mut detached = 0;
        for listed in self.credentials.list_by_partner(partner_id).await? {
            let _guard = self.locks.lock(&listed.exchange_id).await;
            let Some(mut exchange) = self.credentials.find_by_id(listed.id).await? else {
                continue;
            };
            if exchange.partner_id != Some(partner_id) {
                continue;
            }
            exchange.partner_id = None;
            self.credentials.save(&exchange).await?;
            detached += 1;
        }
        Ok(detached)
    }

    /// Answer with a problem report and close the exchange locally.
    pub async fn decline(&self, mut exchange: CredentialExchange, reason: &str) -> Result<CredentialExchange, ExchangeError> {
        self.gateway
            .send_credential_problem_report(exchange.version, &exchange.exchange_id, reason)
            .await?;
        exchange.error_msg = Some(reason.to_string());
        exchange.push_state(CredentialExchangeState::Declined, Utc::now());
        self.credentials.save(&exchange).await?;
        Ok(exchange)
    }

    /// Record a failure reported by the agent. Declined rows stay declined; the agent
    /// reports our own decline back as abandoned.
    pub async fn record_problem(&self, exchange: &mut CredentialExchange, event: &CredentialEvent) -> Result<(), ExchangeError> {
        if exchange.is_declined() {
            return Ok(());
        }
        exchange.error_msg = event.error_msg.clone().or_else(|| exchange.error_msg.clone());
        let transition = exchange.push_state(CredentialExchangeState::Problem, event.updated_at);
        self.credentials.save(exchange).await?;
        if transition.is_advanced() {
            warn!(exchange_id = %exchange.exchange_id, error = ?exchange.error_msg, "Credential exchange failed");
            self.publish(DomainEvent::CredentialProblem {
                exchange: exchange.clone(),
                occurred_at: Utc::now(),
            });
        }
        Ok(())
    }

    /// Remove the exchange remotely (best effort) and locally.
    pub async fn delete(&self, id: CredentialExchangeId) -> Result<(), ExchangeError> {
        let exchange = self.find(id).await?;
        let _guard = self.locks.lock(&exchange.exchange_id).await;
        if let Err(e) = self
            .gateway
            .remove_credential_exchange(exchange.version, &exchange.exchange_id)
            .await
        {
            if !e.is_not_found() {
                warn!(exchange_id = %exchange.exchange_id, error = %e, "Could not remove credential exchange at agent");
            }
        }
        self.credentials.delete(exchange.id).await?;
        Ok(())
    }

    pub fn publish(&self, event: DomainEvent) {
        self.event_bus.publish(event);
    }
}

/// Whether a transition moved the exchange into the acknowledged states.
pub(crate) fn reached_acknowledged(transition: &Transition<CredentialExchangeState>) -> bool {
    matches!(transition, Transition::Advanced { from, to } if to.is_acknowledged() && !from.is_acknowledged())
}
