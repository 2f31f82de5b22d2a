// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Credential-type index.
//!
//! For every schema we know, asks the ledger which credential definitions exist, groups
//! them by issuer DID and stores the definitions on the matching partners as the
//! credential types they can issue. Runs nightly and whenever an incoming connection
//! becomes usable.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::PeriodicJob;
use crate::application::connection::ConnectionReconciler;
use crate::domain::gateway::CredentialGateway;
use crate::domain::repository::{PartnerRepository, SchemaRepository};
use crate::domain::schema::issuer_did_of;

pub struct CredentialTypeIndex {
    schemas: Arc<dyn SchemaRepository>,
    partners: Arc<dyn PartnerRepository>,
    gateway: Arc<dyn CredentialGateway>,
    reconciler: Arc<ConnectionReconciler>,
    did_prefix: String,
}

impl CredentialTypeIndex {
    pub fn new(
        schemas: Arc<dyn SchemaRepository>,
        partners: Arc<dyn PartnerRepository>,
        gateway: Arc<dyn CredentialGateway>,
        reconciler: Arc<ConnectionReconciler>,
        did_prefix: impl Into<String>,
    ) -> Self {
        Self {
            schemas,
            partners,
            gateway,
            reconciler,
            did_prefix: did_prefix.into(),
        }
    }

    async fn definitions_by_issuer(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let mut by_issuer: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for schema in self.schemas.list_all().await? {
            let definitions = match self.gateway.credential_definitions_for_schema(&schema.schema_id).await {
                Ok(definitions) => definitions,
                Err(e) => {
                    warn!(schema_id = %schema.schema_id, error = %e, "Credential definition lookup failed");
                    continue;
                }
            };
            for cred_def_id in definitions {
                if let Some(did) = issuer_did_of(&cred_def_id) {
                    by_issuer.entry(did.to_string()).or_default().insert(cred_def_id.clone());
                }
            }
        }
        Ok(by_issuer)
    }
}

#[async_trait]
impl PeriodicJob for CredentialTypeIndex {
    fn name(&self) -> &'static str {
        "credential_type_index"
    }

    async fn run_once(&self) -> Result<usize> {
        let mut updated = 0;
        for (did, types) in self.definitions_by_issuer().await? {
            let qualified = format!("{}{}", self.did_prefix, did);
            for partner in self.partners.find_by_did(&qualified).await? {
                debug!(partner_id = %partner.id, count = types.len(), "Indexed issuable credential types");
                self.reconciler
                    .set_supported_credential_types(partner.id, types.clone())
                    .await?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn trigger(&self) -> Option<Arc<Notify>> {
        Some(self.reconciler.reindex_signal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::credential::CredentialCore;
    use crate::application::test_support::FakeGateway;
    use crate::domain::credential::CredentialType;
    use crate::domain::partner::{ConnectionState, Partner};
    use crate::domain::schema::SchemaRef;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::repositories::{
        InMemoryCredentialExchangeRepository, InMemoryPartnerRepository, InMemoryProofExchangeRepository,
        InMemorySchemaRepository,
    };

    const SCHEMA: &str = "Th7M:2:bank_account:1.0";

    #[tokio::test]
    async fn test_definitions_land_on_the_issuing_partner() {
        let partners = Arc::new(InMemoryPartnerRepository::new());
        let mut issuer = Partner::unsolicited("conn-1", ConnectionState::Active);
        issuer.did = Some("did:sov:Issuer1".into());
        partners.save(&issuer).await.unwrap();
        let bystander = Partner::unsolicited("conn-2", ConnectionState::Active);
        partners.save(&bystander).await.unwrap();

        let schemas = Arc::new(InMemorySchemaRepository::new());
        schemas.save(&SchemaRef::new(SCHEMA, CredentialType::Indy)).await.unwrap();

        let gateway = Arc::new(FakeGateway::default());
        gateway.set_credential_definitions(SCHEMA, &["Issuer1:3:CL:12:default", "Other:3:CL:12:default"]);

        let bus = Arc::new(EventBus::new(8));
        let core = Arc::new(CredentialCore::new(
            Arc::new(InMemoryCredentialExchangeRepository::new()),
            partners.clone(),
            Arc::new(InMemorySchemaRepository::new()),
            gateway.clone(),
            bus.clone(),
        ));
        let reconciler = Arc::new(ConnectionReconciler::new(
            partners.clone(),
            core,
            Arc::new(InMemoryProofExchangeRepository::new()),
            gateway.clone(),
            gateway.clone(),
            bus,
            "did:sov:",
        ));
        let job = CredentialTypeIndex::new(schemas, partners.clone(), gateway, reconciler, "did:sov:");

        assert_eq!(job.run_once().await.unwrap(), 1);

        let stored = partners.find_by_id(issuer.id).await.unwrap().unwrap();
        assert_eq!(
            stored.supported_credential_types.into_iter().collect::<Vec<_>>(),
            vec!["Issuer1:3:CL:12:default".to_string()]
        );
        let untouched = partners.find_by_id(bystander.id).await.unwrap().unwrap();
        assert!(untouched.supported_credential_types.is_empty());
    }
}
