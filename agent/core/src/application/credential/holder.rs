// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Holder side of credential issuance: offers arriving, credentials landing in the wallet,
//! revocation, and the user operations on wallet entries.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{reached_acknowledged, CredentialCore};
use crate::application::error::ExchangeError;
use crate::application::inbound::{CredentialEvent, RevocationInfoEvent, RevocationNotice};
use crate::domain::credential::{
    CredentialExchange, CredentialExchangeId, CredentialExchangeState, CredentialPayload, CredentialType,
    ExchangeRole,
};
use crate::domain::events::DomainEvent;
use crate::domain::exchange::Transition;
use crate::domain::gateway::{CredentialGateway, CredentialTerms, GatewayError};
use crate::domain::repository::CredentialExchangeRepository;
use crate::domain::partner::PartnerId;

pub struct HolderReconciler {
    core: Arc<CredentialCore>,
}

impl HolderReconciler {
    pub fn new(core: Arc<CredentialCore>) -> Self {
        Self { core }
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    pub async fn handle(&self, event: CredentialEvent) -> Result<(), ExchangeError> {
        debug_assert_eq!(event.role, ExchangeRole::Holder);
        let _guard = self.core.locks.lock(&event.exchange_id).await;
        let existing = self.core.credentials.find_by_exchange_id(&event.exchange_id).await?;

        let failed = event.error_msg.is_some()
            || matches!(event.state, None | Some(CredentialExchangeState::Problem));
        if failed {
            return match existing {
                Some(mut exchange) => self.core.record_problem(&mut exchange, &event).await,
                None => {
                    debug!(exchange_id = %event.exchange_id, "Problem reported for unknown holder exchange");
                    Ok(())
                }
            };
        }

        match event.state {
            Some(CredentialExchangeState::OfferReceived) => self.on_offer(existing, &event).await,
            Some(
                state @ (CredentialExchangeState::CredentialReceived
                | CredentialExchangeState::CredentialAcked
                | CredentialExchangeState::Done),
            ) => self.on_credential(existing, &event, state).await,
            Some(state) => self.on_update(existing, &event, state).await,
            None => Ok(()),
        }
    }

    async fn new_exchange(&self, event: &CredentialEvent, state: CredentialExchangeState) -> Result<CredentialExchange, ExchangeError> {
        let mut exchange = CredentialExchange::new(
            ExchangeRole::Holder,
            event.version,
            event.credential_type,
            event.exchange_id.clone(),
            state,
        );
        exchange.partner_id = self.core.partner_for_connection(event.connection_id.as_deref()).await?;
        exchange.thread_id = event.thread_id.clone();
        exchange.cred_def_id = event.cred_def_id.clone();
        if let Some(schema) = self.core.resolve_schema(event).await? {
            exchange.schema_id = Some(schema.schema_id);
            exchange.label = schema.label;
        } else {
            exchange.schema_id = event.schema_id.clone();
        }
        Ok(exchange)
    }

    async fn on_offer(&self, existing: Option<CredentialExchange>, event: &CredentialEvent) -> Result<(), ExchangeError> {
        let Some(mut exchange) = existing else {
            let mut exchange = self.new_exchange(event, CredentialExchangeState::OfferReceived).await?;
            exchange.offer = event.offer.clone();
            self.core.credentials.save(&exchange).await?;
            info!(exchange_id = %exchange.exchange_id, "Credential offer received");
            self.core.publish(DomainEvent::CredentialOffered {
                exchange,
                occurred_at: Utc::now(),
            });
            return Ok(());
        };

        if let Some(offer) = event.offer.clone() {
            exchange.offer = Some(offer);
        }
        let transition = exchange.push_state(CredentialExchangeState::OfferReceived, event.updated_at);
        if !transition.is_advanced() {
            self.core.credentials.save(&exchange).await?;
            return Ok(());
        }

        if self.request_if_offer_matches(&mut exchange).await? {
            return Ok(());
        }

        self.core.credentials.save(&exchange).await?;
        self.core.publish(DomainEvent::CredentialOffered {
            exchange,
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    /// An offer that repeats our own proposal is accepted without asking. Returns whether
    /// the request went out; a gateway failure leaves the offer for the user.
    async fn request_if_offer_matches(&self, exchange: &mut CredentialExchange) -> Result<bool, ExchangeError> {
        let matches_proposal = exchange
            .offer
            .as_ref()
            .is_some_and(|offer| exchange.offer_matches_proposal(offer));
        if !matches_proposal {
            return Ok(false);
        }
        match self
            .core
            .gateway
            .send_credential_request(exchange.version, &exchange.exchange_id, None)
            .await
        {
            Ok(()) => {
                exchange.push_state(CredentialExchangeState::RequestSent, Utc::now());
                self.core.credentials.save(exchange).await?;
                info!(exchange_id = %exchange.exchange_id, "Offer matches proposal, credential requested");
                Ok(true)
            }
            Err(e) => {
                warn!(exchange_id = %exchange.exchange_id, error = %e, "Automatic credential request failed");
                Ok(false)
            }
        }
    }

    async fn on_credential(
        &self,
        existing: Option<CredentialExchange>,
        event: &CredentialEvent,
        state: CredentialExchangeState,
    ) -> Result<(), ExchangeError> {
        let (mut exchange, created) = match existing {
            Some(exchange) => (exchange, false),
            None => (self.new_exchange(event, state).await?, true),
        };

        if let Some(credential) = event.credential.clone() {
            exchange.credential = Some(credential);
        }
        if event.referent.is_some() {
            exchange.referent = event.referent.clone();
        }
        exchange.set_revocation_ids(event.rev_reg_id.clone(), event.cred_rev_id.clone());

        let transition = exchange.push_state(state, event.updated_at);
        self.core.credentials.save(&exchange).await?;

        if reached_acknowledged(&transition) || (created && state.is_acknowledged()) {
            info!(exchange_id = %exchange.exchange_id, "Credential stored in wallet");
            self.core.publish(DomainEvent::CredentialAdded {
                exchange,
                occurred_at: Utc::now(),
            });
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
            debug!(exchange_id = %event.exchange_id, reported = ?state, "Update for unknown holder exchange");
            return Ok(());
        };
        match exchange.push_state(state, event.updated_at) {
            Transition::Blocked { terminal } => {
                debug!(exchange_id = %exchange.exchange_id, ?terminal, reported = ?state, "Ignoring update after terminal state");
            }
            Transition::Duplicate => {}
            _ => self.core.credentials.save(&exchange).await?,
        }
        Ok(())
    }

    /// Revocation ids of a stored credential. The agent sends them separately from the
    /// credential record.
    pub async fn handle_revocation_info(&self, info: RevocationInfoEvent) -> Result<(), ExchangeError> {
        let _guard = self.core.locks.lock(&info.cred_ex_id).await;
        let Some(mut exchange) = self.core.credentials.find_by_exchange_id(&info.cred_ex_id).await? else {
            return Ok(());
        };
        if !exchange.is_holder() {
            return Ok(());
        }

        if info.cred_id_stored.is_some() && exchange.referent.is_none() {
            exchange.referent = info.cred_id_stored.clone();
        }
        exchange.set_revocation_ids(info.rev_reg_id, info.cred_rev_id);
        if !exchange.is_revocation_capable() {
            if let Some(referent) = exchange.referent.clone() {
                let ids = self.core.gateway.fetch_credential_revocation_ids(&referent).await?;
                exchange.set_revocation_ids(ids.rev_reg_id, ids.cred_rev_id);
            }
        }
        self.core.credentials.save(&exchange).await?;
        Ok(())
    }

    /// The issuer told us a credential was revoked.
    pub async fn handle_revocation_notice(&self, notice: RevocationNotice) -> Result<(), ExchangeError> {
        let Some(exchange) = self
            .core
            .credentials
            .find_by_revocation(&notice.rev_reg_id, &notice.cred_rev_id)
            .await?
        else {
            debug!(rev_reg_id = %notice.rev_reg_id, cred_rev_id = %notice.cred_rev_id, "Revocation notice for unknown credential");
            return Ok(());
        };
        self.revoke_locally(exchange.id).await?;
        Ok(())
    }

    async fn revoke_locally(&self, id: CredentialExchangeId) -> Result<bool, ExchangeError> {
        let exchange = self.core.find(id).await?;
        let _guard = self.core.locks.lock(&exchange.exchange_id).await;
        let mut exchange = self.core.find(id).await?;
        if exchange.revocation.revoked {
            return Ok(false);
        }
        let transition = exchange.mark_revoked(Utc::now());
        self.core.credentials.save(&exchange).await?;
        if transition.is_advanced() {
            info!(exchange_id = %exchange.exchange_id, "Credential revoked by issuer");
            self.core.publish(DomainEvent::CredentialRevoked {
                exchange,
                occurred_at: Utc::now(),
            });
        }
        Ok(true)
    }

    /// Ask the agent about every revocable wallet credential. Returns how many were found
    /// revoked.
    pub async fn refresh_revocation_status(&self) -> Result<usize, ExchangeError> {
        let mut revoked = 0;
        for exchange in self.core.credentials.find_revocation_candidates().await? {
            let Some(referent) = exchange.referent.clone() else {
                continue;
            };
            if !exchange.is_revocation_capable() {
                continue;
            }
            match self.core.gateway.is_credential_revoked(&referent).await {
                Ok(true) => {
                    if self.revoke_locally(exchange.id).await? {
                        revoked += 1;
                    }
                }
                Ok(false) => {}
                Err(GatewayError::NotFound(_)) => {
                    // Deleted from the wallet outside this agent.
                    let _guard = self.core.locks.lock(&exchange.exchange_id).await;
                    if let Some(mut current) = self.core.credentials.find_by_id(exchange.id).await? {
                        current.referent = None;
                        self.core.credentials.save(&current).await?;
                    }
                }
                Err(e @ GatewayError::Unavailable(_)) => return Err(e.into()),
                Err(e) => warn!(referent, error = %e, "Revocation check failed"),
            }
        }
        Ok(revoked)
    }

    // ------------------------------------------------------------------------
    // User-initiated
    // ------------------------------------------------------------------------

    pub async fn list(&self) -> Result<Vec<CredentialExchange>, ExchangeError> {
        Ok(self.core.credentials.list_by_role(Some(ExchangeRole::Holder)).await?)
    }

    pub async fn get(&self, id: CredentialExchangeId) -> Result<CredentialExchange, ExchangeError> {
        self.core.find(id).await
    }

    /// Propose a credential to a partner acting as issuer.
    pub async fn send_proposal(
        &self,
        partner_id: PartnerId,
        credential_type: CredentialType,
        schema_id: Option<String>,
        cred_def_id: Option<String>,
        proposal: CredentialPayload,
    ) -> Result<CredentialExchange, ExchangeError> {
        let (partner, connection_id) = self.core.connected_partner(partner_id).await?;
        let terms = CredentialTerms {
            version: self.core.default_version(credential_type),
            connection_id,
            credential_type,
            schema_id: schema_id.clone(),
            cred_def_id: cred_def_id.clone(),
            payload: proposal.clone(),
        };
        let handle = self.core.gateway.send_credential_proposal(&terms).await?;
        let _guard = self.core.locks.lock(&handle.exchange_id).await;

        // The agent may have reported the exchange already.
        let mut exchange = match self.core.credentials.find_by_exchange_id(&handle.exchange_id).await? {
            Some(exchange) => exchange,
            None => CredentialExchange::new(
                ExchangeRole::Holder,
                terms.version,
                credential_type,
                handle.exchange_id.clone(),
                CredentialExchangeState::ProposalSent,
            ),
        };
        exchange.partner_id = Some(partner.id);
        exchange.thread_id = handle.thread_id.or(exchange.thread_id);
        exchange.schema_id = schema_id.or(exchange.schema_id);
        exchange.cred_def_id = cred_def_id.or(exchange.cred_def_id);
        exchange.proposal = Some(proposal);
        // The offer answering this proposal can be reconciled before this row is written.
        let offer_arrived_first = exchange.state == CredentialExchangeState::OfferReceived;
        self.core.credentials.save(&exchange).await?;
        if offer_arrived_first {
            self.request_if_offer_matches(&mut exchange).await?;
        }
        Ok(exchange)
    }

    pub async fn accept_offer(&self, id: CredentialExchangeId) -> Result<CredentialExchange, ExchangeError> {
        let exchange = self.core.find(id).await?;
        let _guard = self.core.locks.lock(&exchange.exchange_id).await;
        let exchange = self.core.find(id).await?;
        if exchange.state != CredentialExchangeState::OfferReceived {
            return Err(ExchangeError::InvalidState(format!(
                "offer cannot be accepted in state {:?}",
                exchange.state
            )));
        }
        let mut exchange = self.core.ensure_live(exchange).await?;
        self.core
            .gateway
            .send_credential_request(exchange.version, &exchange.exchange_id, None)
            .await?;
        exchange.push_state(CredentialExchangeState::RequestSent, Utc::now());
        self.core.credentials.save(&exchange).await?;
        Ok(exchange)
    }

    pub async fn decline_offer(&self, id: CredentialExchangeId, reason: Option<String>) -> Result<CredentialExchange, ExchangeError> {
        let exchange = self.core.find(id).await?;
        let _guard = self.core.locks.lock(&exchange.exchange_id).await;
        let exchange = self.core.find(id).await?;
        if exchange.state != CredentialExchangeState::OfferReceived {
            return Err(ExchangeError::InvalidState(format!(
                "offer cannot be declined in state {:?}",
                exchange.state
            )));
        }
        let exchange = self.core.ensure_live(exchange).await?;
        let reason = reason.unwrap_or_else(|| "Holder declined credential offer".to_string());
        self.core.decline(exchange, &reason).await
    }

    /// Flip whether the wallet entry is shown on the public profile.
    pub async fn toggle_visibility(&self, id: CredentialExchangeId) -> Result<CredentialExchange, ExchangeError> {
        let exchange = self.core.find(id).await?;
        let _guard = self.core.locks.lock(&exchange.exchange_id).await;
        let mut exchange = self.core.find(id).await?;
        exchange.public = !exchange.public;
        exchange.updated_at = Utc::now();
        self.core.credentials.save(&exchange).await?;
        Ok(exchange)
    }

    pub async fn delete(&self, id: CredentialExchangeId) -> Result<(), ExchangeError> {
        self.core.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::FakeGateway;
    use crate::domain::gateway::RevocationIds;
    use crate::domain::partner::{ConnectionState, Partner};
    use crate::domain::repository::{CredentialExchangeRepository, PartnerRepository};
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::repositories::{
        InMemoryCredentialExchangeRepository, InMemoryPartnerRepository, InMemorySchemaRepository,
    };
    use serde_json::{json, Value};

    struct Harness {
        holder: HolderReconciler,
        credentials: Arc<InMemoryCredentialExchangeRepository>,
        partners: Arc<InMemoryPartnerRepository>,
        gateway: Arc<FakeGateway>,
        bus: Arc<EventBus>,
    }

    fn harness() -> Harness {
        let credentials = Arc::new(InMemoryCredentialExchangeRepository::new());
        let partners = Arc::new(InMemoryPartnerRepository::new());
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
            holder: HolderReconciler::new(Arc::new(core)),
            credentials,
            partners,
            gateway,
            bus,
        }
    }

    fn offer_record(exchange_id: &str, name: &str) -> Value {
        json!({
            "credential_exchange_id": exchange_id,
            "connection_id": "conn-1",
            "role": "holder",
            "state": "offer_received",
            "schema_id": "Th7M:2:bank_account:1.0",
            "credential_offer_dict": {
                "credential_preview": { "attributes": [{ "name": "name", "value": name }] }
            }
        })
    }

    #[tokio::test]
    async fn test_new_offer_is_stored_and_announced_once() {
        let h = harness();
        let partner = Partner::unsolicited("conn-1", ConnectionState::Active);
        h.partners.save(&partner).await.unwrap();
        let mut rx = h.bus.subscribe();
        let event = CredentialEvent::decode_v1(&offer_record("cx-1", "Alice")).unwrap();

        h.holder.handle(event.clone()).await.unwrap();
        h.holder.handle(event).await.unwrap();

        let stored = h.credentials.find_by_exchange_id("cx-1").await.unwrap().unwrap();
        assert_eq!(stored.partner_id, Some(partner.id));
        assert_eq!(stored.label.as_deref(), Some("bank_account"));
        assert_eq!(rx.try_recv().unwrap().event_type(), "credential_offered");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_offer_matching_proposal_is_requested_automatically() {
        let h = harness();
        let mut partner = Partner::unsolicited("conn-1", ConnectionState::Active);
        partner.label = Some("Bank".into());
        h.partners.save(&partner).await.unwrap();

        let proposed = h
            .holder
            .send_proposal(
                partner.id,
                CredentialType::Indy,
                Some("Th7M:2:bank_account:1.0".into()),
                None,
                CredentialPayload::indy([("name", "Alice")]),
            )
            .await
            .unwrap();
        let mut rx = h.bus.subscribe();

        let event = CredentialEvent::decode_v1(&offer_record(&proposed.exchange_id, "Alice")).unwrap();
        h.holder.handle(event).await.unwrap();

        let stored = h.credentials.find_by_id(proposed.id).await.unwrap().unwrap();
        assert_eq!(stored.state, CredentialExchangeState::RequestSent);
        assert!(h
            .gateway
            .calls()
            .contains(&format!("send_credential_request {}", proposed.exchange_id)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_differing_offer_waits_for_user() {
        let h = harness();
        let partner = Partner::unsolicited("conn-1", ConnectionState::Active);
        h.partners.save(&partner).await.unwrap();
        let proposed = h
            .holder
            .send_proposal(partner.id, CredentialType::Indy, None, None, CredentialPayload::indy([("name", "Alice")]))
            .await
            .unwrap();

        let event = CredentialEvent::decode_v1(&offer_record(&proposed.exchange_id, "Mallory")).unwrap();
        h.holder.handle(event).await.unwrap();

        let stored = h.credentials.find_by_id(proposed.id).await.unwrap().unwrap();
        assert_eq!(stored.state, CredentialExchangeState::OfferReceived);
    }

    #[tokio::test]
    async fn test_acknowledged_credential_emits_added_once() {
        let h = harness();
        h.holder
            .handle(CredentialEvent::decode_v1(&offer_record("cx-2", "Alice")).unwrap())
            .await
            .unwrap();
        let mut rx = h.bus.subscribe();

        for state in ["credential_received", "credential_acked", "credential_acked"] {
            let record = json!({
                "credential_exchange_id": "cx-2",
                "role": "holder",
                "state": state,
                "credential_id": "ref-2",
                "credential": { "attrs": { "name": "Alice" } }
            });
            h.holder.handle(CredentialEvent::decode_v1(&record).unwrap()).await.unwrap();
        }

        assert_eq!(rx.try_recv().unwrap().event_type(), "credential_added");
        assert!(rx.try_recv().is_err());
        let stored = h.credentials.find_by_exchange_id("cx-2").await.unwrap().unwrap();
        assert_eq!(stored.referent.as_deref(), Some("ref-2"));
        assert!(stored.credential.is_some());
    }

    #[tokio::test]
    async fn test_problem_after_decline_is_ignored() {
        let h = harness();
        h.holder
            .handle(CredentialEvent::decode_v1(&offer_record("cx-3", "Alice")).unwrap())
            .await
            .unwrap();
        let stored = h.credentials.find_by_exchange_id("cx-3").await.unwrap().unwrap();
        h.holder.decline_offer(stored.id, None).await.unwrap();
        let mut rx = h.bus.subscribe();

        let abandoned = json!({
            "credential_exchange_id": "cx-3",
            "role": "holder",
            "state": "abandoned",
            "error_msg": "abandoned: declined"
        });
        h.holder.handle(CredentialEvent::decode_v1(&abandoned).unwrap()).await.unwrap();

        let stored = h.credentials.find_by_exchange_id("cx-3").await.unwrap().unwrap();
        assert_eq!(stored.state, CredentialExchangeState::Declined);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accept_offer_gone_at_agent_becomes_problem() {
        let h = harness();
        h.holder
            .handle(CredentialEvent::decode_v1(&offer_record("cx-4", "Alice")).unwrap())
            .await
            .unwrap();
        let stored = h.credentials.find_by_exchange_id("cx-4").await.unwrap().unwrap();
        h.gateway.forget_exchange("cx-4");

        let result = h.holder.accept_offer(stored.id).await;

        assert!(matches!(result, Err(ExchangeError::NotFound(_))));
        let stored = h.credentials.find_by_id(stored.id).await.unwrap().unwrap();
        assert_eq!(stored.state, CredentialExchangeState::Problem);
    }

    #[tokio::test]
    async fn test_accept_offer_agent_down_keeps_state() {
        let h = harness();
        h.holder
            .handle(CredentialEvent::decode_v1(&offer_record("cx-5", "Alice")).unwrap())
            .await
            .unwrap();
        let stored = h.credentials.find_by_exchange_id("cx-5").await.unwrap().unwrap();
        h.gateway
            .fail("fetch_credential_exchange", GatewayError::Unavailable("connection refused".into()));

        let result = h.holder.accept_offer(stored.id).await;

        assert!(matches!(result, Err(ExchangeError::NetworkUnavailable(_))));
        let stored = h.credentials.find_by_id(stored.id).await.unwrap().unwrap();
        assert_eq!(stored.state, CredentialExchangeState::OfferReceived);
    }

    #[tokio::test]
    async fn test_revocation_poll_marks_revoked() {
        let h = harness();
        let mut exchange = CredentialExchange::new(
            ExchangeRole::Holder,
            Default::default(),
            CredentialType::Indy,
            "cx-6",
            CredentialExchangeState::CredentialAcked,
        );
        exchange.referent = Some("ref-6".into());
        exchange.set_revocation_ids(Some("reg-1".into()), Some("7".into()));
        h.credentials.save(&exchange).await.unwrap();
        h.gateway.revoke("ref-6");
        let mut rx = h.bus.subscribe();

        assert_eq!(h.holder.refresh_revocation_status().await.unwrap(), 1);
        assert_eq!(h.holder.refresh_revocation_status().await.unwrap(), 0);

        let stored = h.credentials.find_by_id(exchange.id).await.unwrap().unwrap();
        assert!(stored.revocation.revoked);
        assert_eq!(stored.state, CredentialExchangeState::CredentialRevoked);
        assert_eq!(rx.try_recv().unwrap().event_type(), "credential_revoked");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_revocation_info_fetches_ids_by_referent() {
        let h = harness();
        let mut exchange = CredentialExchange::new(
            ExchangeRole::Holder,
            Default::default(),
            CredentialType::Indy,
            "cx-7",
            CredentialExchangeState::CredentialAcked,
        );
        exchange.referent = Some("ref-7".into());
        h.credentials.save(&exchange).await.unwrap();
        h.gateway.set_revocation_ids(
            "ref-7",
            RevocationIds {
                rev_reg_id: Some("reg-7".into()),
                cred_rev_id: Some("3".into()),
            },
        );

        h.holder
            .handle_revocation_info(RevocationInfoEvent {
                cred_ex_id: "cx-7".into(),
                rev_reg_id: None,
                cred_rev_id: None,
                cred_id_stored: None,
            })
            .await
            .unwrap();

        let stored = h.credentials.find_by_id(exchange.id).await.unwrap().unwrap();
        assert!(stored.is_revocation_capable());
        assert_eq!(stored.revocation.rev_reg_id.as_deref(), Some("reg-7"));
    }

    #[tokio::test]
    async fn test_offer_reconciled_before_proposal_is_saved_is_requested() {
        let h = harness();
        let partner = Partner::unsolicited("conn-1", ConnectionState::Active);
        h.partners.save(&partner).await.unwrap();
        // The agent answers with an offer for "cx-1" before send_proposal writes its row.
        let early_offer = CredentialEvent::decode_v1(&offer_record("cx-1", "Alice")).unwrap();
        h.holder.handle(early_offer).await.unwrap();

        let proposed = h
            .holder
            .send_proposal(partner.id, CredentialType::Indy, None, None, CredentialPayload::indy([("name", "Alice")]))
            .await
            .unwrap();

        assert_eq!(proposed.exchange_id, "cx-1");
        assert_eq!(proposed.state, CredentialExchangeState::RequestSent);
        let stored = h.credentials.find_by_exchange_id("cx-1").await.unwrap().unwrap();
        assert_eq!(stored.state, CredentialExchangeState::RequestSent);
        assert!(h.gateway.calls().contains(&"send_credential_request cx-1".to_string()));
        assert_eq!(h.credentials.list_by_role(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_for_unknown_exchange_is_dropped() {
        let h = harness();
        let event = CredentialEvent::decode_v1(&json!({
            "credential_exchange_id": "cx-8",
            "connection_id": "conn-1",
            "role": "holder",
            "state": "request_sent"
        }))
        .unwrap();

        h.holder.handle(event).await.unwrap();

        assert!(h.credentials.find_by_exchange_id("cx-8").await.unwrap().is_none());
    }
}
