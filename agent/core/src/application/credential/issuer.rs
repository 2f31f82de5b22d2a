// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Issuer side of credential issuance.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{reached_acknowledged, CredentialCore};
use crate::application::error::ExchangeError;
use crate::application::inbound::{CredentialEvent, RevocationInfoEvent};
use crate::domain::credential::{
    CredentialExchange, CredentialExchangeId, CredentialExchangeState, CredentialPayload, CredentialType,
    ExchangeRole,
};
use crate::domain::events::DomainEvent;
use crate::domain::exchange::ExchangeVersion;
use crate::domain::gateway::{CredentialGateway, CredentialTerms};
use crate::domain::partner::PartnerId;
use crate::domain::repository::{
    CredentialDefinitionRepository, CredentialExchangeRepository, PartnerRepository,
};

pub struct IssuerReconciler {
    core: Arc<CredentialCore>,
    definitions: Arc<dyn CredentialDefinitionRepository>,
    /// The agent answers credential requests on its own.
    auto_respond: bool,
}

impl IssuerReconciler {
    pub fn new(
        core: Arc<CredentialCore>,
        definitions: Arc<dyn CredentialDefinitionRepository>,
        auto_respond: bool,
    ) -> Self {
        Self {
            core,
            definitions,
            auto_respond,
        }
    }

    pub async fn handle(&self, event: CredentialEvent) -> Result<(), ExchangeError> {
        let _guard = self.core.locks.lock(&event.exchange_id).await;
        let existing = self.core.credentials.find_by_exchange_id(&event.exchange_id).await?;

        let failed = event.error_msg.is_some()
            || matches!(event.state, None | Some(CredentialExchangeState::Problem));
        if failed {
            return match existing {
                Some(mut exchange) => self.core.record_problem(&mut exchange, &event).await,
                None => Ok(()),
            };
        }

        match event.state {
            Some(CredentialExchangeState::ProposalReceived) => self.on_proposal(existing, &event).await,
            Some(CredentialExchangeState::RequestReceived) => self.on_request(existing, &event).await,
            Some(state) => self.on_update(existing, &event, state).await,
            None => Ok(()),
        }
    }

    async fn new_exchange(&self, event: &CredentialEvent, state: CredentialExchangeState) -> Result<CredentialExchange, ExchangeError> {
        let mut exchange = CredentialExchange::new(
            ExchangeRole::Issuer,
            event.version,
            event.credential_type,
            event.exchange_id.clone(),
            state,
        );
        exchange.partner_id = self.core.partner_for_connection(event.connection_id.as_deref()).await?;
        exchange.thread_id = event.thread_id.clone();
        exchange.cred_def_id = event.cred_def_id.clone();
        match self.core.resolve_schema(event).await? {
            Some(schema) => {
                exchange.schema_id = Some(schema.schema_id);
                exchange.label = schema.label;
            }
            None => exchange.schema_id = event.schema_id.clone(),
        }
        exchange.proposal = event.proposal.clone();
        exchange.offer = event.offer.clone();
        Ok(exchange)
    }

    /// A holder proposed a credential. The proposal is kept for the user to accept or
    /// decline; a schema we hold no definition for is noted on the row.
    async fn on_proposal(&self, existing: Option<CredentialExchange>, event: &CredentialEvent) -> Result<(), ExchangeError> {
        let created = existing.is_none();
        let mut exchange = match existing {
            Some(exchange) => exchange,
            None => self.new_exchange(event, CredentialExchangeState::ProposalReceived).await?,
        };
        if exchange.cred_def_id.is_none() {
            let definition = match exchange.schema_id.as_deref() {
                Some(schema_id) => self.definitions.find_by_schema_id(schema_id).await?.into_iter().next(),
                None => None,
            };
            match definition {
                Some(definition) => exchange.cred_def_id = Some(definition.cred_def_id),
                None => {
                    exchange.error_msg = Some("no credential definition for the proposed schema".to_string());
                }
            }
        }
        let transition = exchange.push_state(CredentialExchangeState::ProposalReceived, event.updated_at);
        self.core.credentials.save(&exchange).await?;

        if created || transition.is_advanced() {
            info!(exchange_id = %exchange.exchange_id, "Credential proposal received");
            self.core.publish(DomainEvent::CredentialProposalReceived {
                exchange,
                occurred_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn on_request(&self, existing: Option<CredentialExchange>, event: &CredentialEvent) -> Result<(), ExchangeError> {
        let mut exchange = match existing {
            Some(exchange) => exchange,
            None if event.version == ExchangeVersion::V2 => {
                // A request we never offered; the holder is told so.
                warn!(exchange_id = %event.exchange_id, "Credential request for unknown exchange");
                if let Err(e) = self
                    .core
                    .gateway
                    .send_credential_problem_report(event.version, &event.exchange_id, "unknown credential exchange")
                    .await
                {
                    warn!(exchange_id = %event.exchange_id, error = %e, "Problem report failed");
                }
                return Ok(());
            }
            None => self.new_exchange(event, CredentialExchangeState::RequestReceived).await?,
        };

        let transition = exchange.push_state(CredentialExchangeState::RequestReceived, event.updated_at);
        self.core.credentials.save(&exchange).await?;

        if transition.is_advanced() && !self.auto_respond {
            if let Err(e) = self
                .core
                .gateway
                .issue_credential(exchange.version, &exchange.exchange_id)
                .await
            {
                warn!(exchange_id = %exchange.exchange_id, error = %e, "Issuing requested credential failed");
            }
        }
        Ok(())
    }

    async fn on_update(
        &self,
        existing: Option<CredentialExchange>,
        event: &CredentialEvent,
        state: CredentialExchangeState,
    ) -> Result<(), ExchangeError> {
        let Some(mut exchange) = existing else {
            debug!(exchange_id = %event.exchange_id, reported = ?state, "Update for unknown issuer exchange");
            return Ok(());
        };
        exchange.set_revocation_ids(event.rev_reg_id.clone(), event.cred_rev_id.clone());
        let transition = exchange.push_state(state, event.updated_at);

        if reached_acknowledged(&transition) {
            exchange.credential = event
                .credential
                .clone()
                .or_else(|| exchange.credential.clone())
                .or_else(|| exchange.offer.clone());
            self.core.credentials.save(&exchange).await?;
            info!(exchange_id = %exchange.exchange_id, "Issued credential accepted by holder");
            self.core.publish(DomainEvent::CredentialAccepted {
                exchange,
                occurred_at: Utc::now(),
            });
            return Ok(());
        }
        self.core.credentials.save(&exchange).await?;
        Ok(())
    }

    pub async fn handle_revocation_info(&self, info: RevocationInfoEvent) -> Result<(), ExchangeError> {
        let _guard = self.core.locks.lock(&info.cred_ex_id).await;
        let Some(mut exchange) = self.core.credentials.find_by_exchange_id(&info.cred_ex_id).await? else {
            return Ok(());
        };
        if exchange.is_holder() {
            return Ok(());
        }
        exchange.set_revocation_ids(info.rev_reg_id, info.cred_rev_id);
        self.core.credentials.save(&exchange).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // User-initiated
    // ------------------------------------------------------------------------

    pub async fn list(&self) -> Result<Vec<CredentialExchange>, ExchangeError> {
        Ok(self.core.credentials.list_by_role(Some(ExchangeRole::Issuer)).await?)
    }

    /// Offer a credential to a partner under one of our credential definitions.
    pub async fn issue_credential(
        &self,
        partner_id: PartnerId,
        credential_type: CredentialType,
        cred_def_id: String,
        offer: CredentialPayload,
    ) -> Result<CredentialExchange, ExchangeError> {
        let (partner, connection_id) = self.core.connected_partner(partner_id).await?;
        let definition = self
            .definitions
            .find_by_cred_def_id(&cred_def_id)
            .await?
            .ok_or_else(|| ExchangeError::NotFound(format!("credential definition {}", cred_def_id)))?;

        let terms = CredentialTerms {
            version: self.core.default_version(credential_type),
            connection_id,
            credential_type,
            schema_id: Some(definition.schema_id.clone()),
            cred_def_id: Some(cred_def_id.clone()),
            payload: offer.clone(),
        };
        let handle = self.core.gateway.send_credential_offer(&terms).await?;
        let _guard = self.core.locks.lock(&handle.exchange_id).await;

        let mut exchange = match self.core.credentials.find_by_exchange_id(&handle.exchange_id).await? {
            Some(exchange) => exchange,
            None => CredentialExchange::new(
                ExchangeRole::Issuer,
                terms.version,
                credential_type,
                handle.exchange_id.clone(),
                CredentialExchangeState::OfferSent,
            ),
        };
        exchange.partner_id = Some(partner.id);
        exchange.thread_id = handle.thread_id.or(exchange.thread_id);
        exchange.schema_id = Some(definition.schema_id);
        exchange.cred_def_id = Some(cred_def_id);
        exchange.offer = Some(offer);
        self.core.credentials.save(&exchange).await?;

        info!(exchange_id = %exchange.exchange_id, partner_id = %partner.id, "Credential offered");
        self.core.publish(DomainEvent::CredentialIssued {
            exchange: exchange.clone(),
            occurred_at: Utc::now(),
        });
        Ok(exchange)
    }

    pub async fn accept_proposal(&self, id: CredentialExchangeId) -> Result<CredentialExchange, ExchangeError> {
        let exchange = self.core.find(id).await?;
        let _guard = self.core.locks.lock(&exchange.exchange_id).await;
        let exchange = self.core.find(id).await?;
        if exchange.state != CredentialExchangeState::ProposalReceived {
            return Err(ExchangeError::InvalidState(format!(
                "proposal cannot be accepted in state {:?}",
                exchange.state
            )));
        }
        if exchange.cred_def_id.is_none() {
            return Err(ExchangeError::InvalidState(
                "no credential definition for the proposed schema".to_string(),
            ));
        }
        let mut exchange = self.core.ensure_live(exchange).await?;
        self.core
            .gateway
            .send_offer_for_proposal(exchange.version, &exchange.exchange_id)
            .await?;
        exchange.error_msg = None;
        exchange.push_state(CredentialExchangeState::OfferSent, Utc::now());
        self.core.credentials.save(&exchange).await?;
        Ok(exchange)
    }

    pub async fn decline_proposal(&self, id: CredentialExchangeId, reason: Option<String>) -> Result<CredentialExchange, ExchangeError> {
        let exchange = self.core.find(id).await?;
        let _guard = self.core.locks.lock(&exchange.exchange_id).await;
        let exchange = self.core.find(id).await?;
        if exchange.state != CredentialExchangeState::ProposalReceived {
            return Err(ExchangeError::InvalidState(format!(
                "proposal cannot be declined in state {:?}",
                exchange.state
            )));
        }
        let exchange = self.core.ensure_live(exchange).await?;
        let reason = reason.unwrap_or_else(|| "Issuer declined credential proposal".to_string());
        self.core.decline(exchange, &reason).await
    }

    /// Revoke an issued credential and notify the holder.
    pub async fn revoke_credential(&self, id: CredentialExchangeId) -> Result<CredentialExchange, ExchangeError> {
        let exchange = self.core.find(id).await?;
        let _guard = self.core.locks.lock(&exchange.exchange_id).await;
        let mut exchange = self.core.find(id).await?;
        if exchange.is_holder() {
            return Err(ExchangeError::InvalidState("only issued credentials can be revoked".to_string()));
        }
        if !exchange.can_be_revoked() {
            return Err(ExchangeError::InvalidState(format!(
                "credential cannot be revoked in state {:?}",
                exchange.state
            )));
        }
        let (Some(rev_reg_id), Some(cred_rev_id)) = (
            exchange.revocation.rev_reg_id.clone(),
            exchange.revocation.cred_rev_id.clone(),
        ) else {
            return Err(ExchangeError::InvalidState("credential is not revocable".to_string()));
        };

        let connection_id = match exchange.partner_id {
            Some(partner_id) => self
                .core
                .partners
                .find_by_id(partner_id)
                .await?
                .and_then(|p| p.connection_id),
            None => None,
        };
        self.core
            .gateway
            .revoke_credential(&rev_reg_id, &cred_rev_id, connection_id.as_deref())
            .await?;

        let transition = exchange.mark_revoked(Utc::now());
        self.core.credentials.save(&exchange).await?;
        if transition.is_advanced() {
            info!(exchange_id = %exchange.exchange_id, "Credential revoked");
            self.core.publish(DomainEvent::CredentialRevoked {
                exchange: exchange.clone(),
                occurred_at: Utc::now(),
            });
        }
        Ok(exchange)
    }

    /// Offer a revoked credential's content again as a new exchange.
    pub async fn reissue_credential(&self, id: CredentialExchangeId) -> Result<CredentialExchange, ExchangeError> {
        let revoked = self.core.find(id).await?;
        if revoked.state != CredentialExchangeState::CredentialRevoked || revoked.is_holder() {
            return Err(ExchangeError::InvalidState(
                "only revoked issued credentials can be reissued".to_string(),
            ));
        }
        let partner_id = revoked
            .partner_id
            .ok_or_else(|| ExchangeError::InvalidState("partner of the revoked credential is gone".to_string()))?;
        let cred_def_id = revoked
            .cred_def_id
            .clone()
            .ok_or_else(|| ExchangeError::InvalidState("revoked credential has no definition".to_string()))?;
        let payload = revoked
            .credential
            .clone()
            .or_else(|| revoked.offer.clone())
            .ok_or_else(|| ExchangeError::InvalidState("revoked credential has no content".to_string()))?;

        debug!(exchange_id = %revoked.exchange_id, "Reissuing revoked credential");
        self.issue_credential(partner_id, revoked.credential_type, cred_def_id, payload)
            .await
    }

    pub async fn delete(&self, id: CredentialExchangeId) -> Result<(), ExchangeError> {
        self.core.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::FakeGateway;
    use crate::domain::partner::{ConnectionState, Partner};
    use crate::domain::repository::{CredentialExchangeRepository, PartnerRepository};
    use crate::domain::schema::CredentialDefinition;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::repositories::{
        InMemoryCredentialDefinitionRepository, InMemoryCredentialExchangeRepository, InMemoryPartnerRepository,
        InMemorySchemaRepository,
    };
    use serde_json::json;

    const SCHEMA: &str = "Th7M:2:bank_account:1.0";
    const CRED_DEF: &str = "Th7M:3:CL:12:default";

    struct Harness {
        issuer: IssuerReconciler,
        credentials: Arc<InMemoryCredentialExchangeRepository>,
        partners: Arc<InMemoryPartnerRepository>,
        gateway: Arc<FakeGateway>,
        bus: Arc<EventBus>,
    }

    async fn harness(auto_respond: bool) -> Harness {
        let credentials = Arc::new(InMemoryCredentialExchangeRepository::new());
        let partners = Arc::new(InMemoryPartnerRepository::new());
        let definitions = Arc::new(InMemoryCredentialDefinitionRepository::new());
        definitions.save(&CredentialDefinition::new(SCHEMA, CRED_DEF)).await.unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let bus = Arc::new(EventBus::new(64));
        let core = CredentialCore::new(
            credentials.clone(),
            partners.clone(),
            Arc::new(InMemorySchemaRepository::new()),
            gateway.clone(),
            bus.clone(),
        );
        Harness {
            issuer: IssuerReconciler::new(Arc::new(core), definitions, auto_respond),
            credentials,
            partners,
            gateway,
            bus,
        }
    }

    async fn connected_partner(h: &Harness) -> Partner {
        let partner = Partner::unsolicited("conn-1", ConnectionState::Active);
        h.partners.save(&partner).await.unwrap();
        partner
    }

    fn issuer_record(exchange_id: &str, state: &str) -> serde_json::Value {
        json!({
            "credential_exchange_id": exchange_id,
            "connection_id": "conn-1",
            "role": "issuer",
            "state": state,
            "schema_id": SCHEMA,
            "revoc_reg_id": "reg-1",
            "revocation_id": "4"
        })
    }

    #[tokio::test]
    async fn test_proposal_picks_first_definition() {
        let h = harness(false).await;
        connected_partner(&h).await;
        let mut rx = h.bus.subscribe();

        let record = issuer_record("cx-1", "proposal_received");
        h.issuer.handle(CredentialEvent::decode_v1(&record).unwrap()).await.unwrap();
        h.issuer.handle(CredentialEvent::decode_v1(&record).unwrap()).await.unwrap();

        let stored = h.credentials.find_by_exchange_id("cx-1").await.unwrap().unwrap();
        assert_eq!(stored.cred_def_id.as_deref(), Some(CRED_DEF));
        assert_eq!(rx.try_recv().unwrap().event_type(), "credential_proposal_received");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_is_issued_when_agent_does_not_auto_respond() {
        let h = harness(false).await;
        let partner = connected_partner(&h).await;
        let offered = h
            .issuer
            .issue_credential(partner.id, CredentialType::Indy, CRED_DEF.into(), CredentialPayload::indy([("name", "Alice")]))
            .await
            .unwrap();

        let record = issuer_record(&offered.exchange_id, "request_received");
        h.issuer.handle(CredentialEvent::decode_v1(&record).unwrap()).await.unwrap();

        assert!(h
            .gateway
            .calls()
            .contains(&format!("issue_credential {}", offered.exchange_id)));
    }

    #[tokio::test]
    async fn test_request_left_to_agent_when_auto_responding() {
        let h = harness(true).await;
        let partner = connected_partner(&h).await;
        let offered = h
            .issuer
            .issue_credential(partner.id, CredentialType::Indy, CRED_DEF.into(), CredentialPayload::indy([("name", "Alice")]))
            .await
            .unwrap();

        let record = issuer_record(&offered.exchange_id, "request_received");
        h.issuer.handle(CredentialEvent::decode_v1(&record).unwrap()).await.unwrap();

        assert!(!h.gateway.calls().iter().any(|c| c.starts_with("issue_credential")));
    }

    #[tokio::test]
    async fn test_unknown_v2_request_gets_problem_report() {
        let h = harness(false).await;
        let record = json!({
            "cred_ex_id": "cx-unknown",
            "role": "issuer",
            "state": "request-received"
        });

        h.issuer.handle(CredentialEvent::decode_v2(&record).unwrap()).await.unwrap();

        assert!(h.credentials.find_by_exchange_id("cx-unknown").await.unwrap().is_none());
        assert_eq!(h.gateway.calls(), vec!["send_credential_problem_report cx-unknown".to_string()]);
    }

    #[tokio::test]
    async fn test_update_for_unknown_exchange_is_dropped() {
        let h = harness(false).await;
        connected_partner(&h).await;
        let mut rx = h.bus.subscribe();

        let record = issuer_record("cx-stray", "credential_issued");
        h.issuer.handle(CredentialEvent::decode_v1(&record).unwrap()).await.unwrap();

        assert!(h.credentials.find_by_exchange_id("cx-stray").await.unwrap().is_none());
        assert!(h.gateway.calls().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_revoke_then_reissue() {
        let h = harness(false).await;
        let partner = connected_partner(&h).await;
        let offered = h
            .issuer
            .issue_credential(partner.id, CredentialType::Indy, CRED_DEF.into(), CredentialPayload::indy([("name", "Alice")]))
            .await
            .unwrap();
        let acked = issuer_record(&offered.exchange_id, "credential_acked");
        h.issuer.handle(CredentialEvent::decode_v1(&acked).unwrap()).await.unwrap();
        let mut rx = h.bus.subscribe();

        let revoked = h.issuer.revoke_credential(offered.id).await.unwrap();
        assert_eq!(revoked.state, CredentialExchangeState::CredentialRevoked);
        assert_eq!(rx.try_recv().unwrap().event_type(), "credential_revoked");
        assert!(matches!(
            h.issuer.revoke_credential(offered.id).await,
            Err(ExchangeError::InvalidState(_))
        ));

        let reissued = h.issuer.reissue_credential(offered.id).await.unwrap();
        assert_ne!(reissued.exchange_id, offered.exchange_id);
        assert_eq!(reissued.state, CredentialExchangeState::OfferSent);
        assert_eq!(reissued.offer, Some(CredentialPayload::indy([("name", "Alice")])));
    }

    #[tokio::test]
    async fn test_acknowledged_emits_accepted() {
        let h = harness(false).await;
        let partner = connected_partner(&h).await;
        let offered = h
            .issuer
            .issue_credential(partner.id, CredentialType::Indy, CRED_DEF.into(), CredentialPayload::indy([("name", "Alice")]))
            .await
            .unwrap();
        let mut rx = h.bus.subscribe();

        for state in ["credential_issued", "credential_acked"] {
            let record = issuer_record(&offered.exchange_id, state);
            h.issuer.handle(CredentialEvent::decode_v1(&record).unwrap()).await.unwrap();
        }

        assert_eq!(rx.try_recv().unwrap().event_type(), "credential_accepted");
        assert!(rx.try_recv().is_err());
        let stored = h.credentials.find_by_id(offered.id).await.unwrap().unwrap();
        assert!(stored.is_revocation_capable());
    }
}
