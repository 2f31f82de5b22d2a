// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Connection Reconciler
//!
//! Keeps the local [`Partner`] rows in step with the agent's connection records and emits
//! the partner domain events on the transitions a user acts on:
//!
//! | Direction | Reported | Event |
//! |-----------|----------|-------|
//! | outgoing | `request` | `partner_added` |
//! | outgoing | first of `response`/`active`/`completed` | `partner_accepted` |
//! | incoming, our invitation | first of `response`/`active`/`completed` | `partner_request_completed` |
//! | incoming, no invitation | `request` | `partner_request_received` |
//! | incoming, no invitation | `active`/`completed` | `partner_request_completed` |
//!
//! Events fire only when a row is created or its state advances, so redelivered and
//! reordered records are silent. Every event for one connection serializes on a key that
//! is stable from the invitation onwards (invitation id, else connection id).
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Connection state machine driver and partner lifecycle operations

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::application::credential::CredentialCore;
use crate::application::error::ExchangeError;
use crate::application::inbound::{BasicMessageEvent, ConnectionEvent};
use crate::domain::events::DomainEvent;
use crate::domain::exchange::{ProtocolState, StateHistory, Transition};
use crate::domain::gateway::{ConnectionGateway, InvitationRecord, ProofGateway};
use crate::domain::partner::{ConnectionState, Partner, PartnerId};
use crate::domain::repository::{PartnerRepository, ProofExchangeRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::key_lock::KeyedLocks;

const UNKNOWN_DID: &str = "unknown";
const PEER_DID_PREFIX: &str = "did:peer:";

fn qualify_did(did: &str, prefix: &str) -> String {
    if did.starts_with("did:") {
        did.to_string()
    } else {
        format!("{}{}", prefix, did)
    }
}

fn partner_lock_key(partner: &Partner) -> String {
    partner
        .invitation_msg_id
        .clone()
        .or_else(|| partner.connection_id.clone())
        .unwrap_or_else(|| partner.id.to_string())
}

/// Which partner event, if any, a created or advanced row emits.
fn partner_event_for(event: &ConnectionEvent, partner: &Partner, previous: Option<ConnectionState>) -> Option<DomainEvent> {
    let occurred_at = Utc::now();
    let partner = partner.clone();
    let reached_response = event.state.rank() >= ConnectionState::Response.rank()
        && previous.map_or(true, |p| p.rank() < ConnectionState::Response.rank());

    if !event.is_incoming() {
        return match event.state {
            ConnectionState::Request => Some(DomainEvent::PartnerAdded { partner, occurred_at }),
            ConnectionState::Response | ConnectionState::Active | ConnectionState::Completed if reached_response => {
                Some(DomainEvent::PartnerAccepted { partner, occurred_at })
            }
            _ => None,
        };
    }

    if event.is_invitation_response() {
        // An accepted invitation of ours may never report more than `response`.
        let usable = matches!(
            event.state,
            ConnectionState::Response | ConnectionState::Active | ConnectionState::Completed
        );
        return (usable && reached_response).then(|| DomainEvent::PartnerRequestCompleted { partner, occurred_at });
    }

    match event.state {
        ConnectionState::Request => Some(DomainEvent::PartnerRequestReceived { partner, occurred_at }),
        ConnectionState::Active | ConnectionState::Completed => {
            Some(DomainEvent::PartnerRequestCompleted { partner, occurred_at })
        }
        _ => None,
    }
}

pub struct ConnectionReconciler {
    partners: Arc<dyn PartnerRepository>,
    credentials: Arc<CredentialCore>,
    proofs: Arc<dyn ProofExchangeRepository>,
    gateway: Arc<dyn ConnectionGateway>,
    proof_gateway: Arc<dyn ProofGateway>,
    event_bus: Arc<EventBus>,
    locks: KeyedLocks,
    did_prefix: String,
    reindex: Arc<Notify>,
}

impl ConnectionReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        partners: Arc<dyn PartnerRepository>,
        credentials: Arc<CredentialCore>,
        proofs: Arc<dyn ProofExchangeRepository>,
        gateway: Arc<dyn ConnectionGateway>,
        proof_gateway: Arc<dyn ProofGateway>,
        event_bus: Arc<EventBus>,
        did_prefix: impl Into<String>,
    ) -> Self {
        Self {
            partners,
            credentials,
            proofs,
            gateway,
            proof_gateway,
            event_bus,
            locks: KeyedLocks::default(),
            did_prefix: did_prefix.into(),
            reindex: Arc::new(Notify::new()),
        }
    }

    /// Signalled whenever an incoming connection becomes usable; the credential-type
    /// index listens on it.
    pub fn reindex_signal(&self) -> Arc<Notify> {
        self.reindex.clone()
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    pub async fn handle_connection(&self, event: ConnectionEvent) -> Result<(), ExchangeError> {
        let _guard = self.locks.lock(event.lock_key()).await;

        if !event.is_incoming() {
            self.handle_outgoing(&event).await
        } else if event.is_invitation() {
            self.handle_invitation(&event).await
        } else {
            self.handle_incoming(&event).await
        }
    }

    /// Connections this agent started. Rows exist already; unknown ids are not ours.
    async fn handle_outgoing(&self, event: &ConnectionEvent) -> Result<(), ExchangeError> {
        let Some(mut partner) = self.partners.find_by_connection_id(&event.connection_id).await? else {
            debug!(connection_id = %event.connection_id, "Outgoing connection event for unknown partner");
            return Ok(());
        };

        partner.backfill(None, None, event.their_label.as_deref());
        let transition = partner.push_state(event.state, event.updated_at);
        self.partners.save(&partner).await?;

        if let Transition::Advanced { from, .. } = transition {
            if let Some(domain_event) = partner_event_for(event, &partner, Some(from)) {
                self.event_bus.publish(domain_event);
            }
        }
        Ok(())
    }

    /// An invitation created here was picked up; the connection id becomes known.
    async fn handle_invitation(&self, event: &ConnectionEvent) -> Result<(), ExchangeError> {
        let Some(invitation_msg_id) = event.invitation_msg_id.as_deref() else {
            debug!(connection_id = %event.connection_id, "Invitation event without invitation id");
            return Ok(());
        };
        let Some(mut partner) = self.partners.find_by_invitation_msg_id(invitation_msg_id).await? else {
            debug!(invitation_msg_id, "Invitation event for unknown invitation");
            return Ok(());
        };

        let did = self.resolve_did(event);
        partner.backfill(Some(&event.connection_id), Some(&did), event.their_label.as_deref());
        partner.push_state(event.state, event.updated_at);
        self.partners.save(&partner).await?;
        Ok(())
    }

    async fn handle_incoming(&self, event: &ConnectionEvent) -> Result<(), ExchangeError> {
        let existing = match self.partners.find_by_connection_id(&event.connection_id).await? {
            Some(partner) => Some(partner),
            None => match event.invitation_msg_id.as_deref() {
                Some(invitation_msg_id) => self.partners.find_by_invitation_msg_id(invitation_msg_id).await?,
                None => None,
            },
        };

        let did = self.resolve_did(event);
        let (partner, previous) = match existing {
            Some(mut partner) => {
                partner.backfill(Some(&event.connection_id), Some(&did), event.their_label.as_deref());
                let transition = partner.push_state(event.state, event.updated_at);
                self.partners.save(&partner).await?;
                match transition {
                    Transition::Advanced { from, .. } => (partner, Some(from)),
                    _ => return Ok(()),
                }
            }
            None => {
                let mut partner = Partner::unsolicited(&event.connection_id, event.state);
                partner.invitation_msg_id = event.invitation_msg_id.clone();
                partner.did = Some(did);
                partner.label = event.their_label.clone();
                partner.state_history = StateHistory::starting_at(event.state, event.updated_at);
                self.partners.save(&partner).await?;
                info!(partner_id = %partner.id, connection_id = %event.connection_id, "Partner created from incoming connection");
                (partner, None)
            }
        };

        if let Some(domain_event) = partner_event_for(event, &partner, previous) {
            if matches!(domain_event, DomainEvent::PartnerRequestCompleted { .. }) && !event.is_invitation_response() {
                self.reindex.notify_one();
            }
            self.event_bus.publish(domain_event);
        }
        Ok(())
    }

    /// DID-exchange peers are identified by their public DID if they have one. Everything
    /// else is a pairwise peer DID.
    fn resolve_did(&self, event: &ConnectionEvent) -> String {
        if event.did_exchange && !event.is_invitation() {
            if let Some(did) = event.their_public_did.as_deref().or(event.their_did.as_deref()) {
                return qualify_did(did, &self.did_prefix);
            }
        }
        match event.their_did.as_deref() {
            Some(did) => qualify_did(did, PEER_DID_PREFIX),
            None => format!("{}{}", self.did_prefix, UNKNOWN_DID),
        }
    }

    pub async fn handle_basic_message(&self, message: BasicMessageEvent) -> Result<(), ExchangeError> {
        let Some(partner) = self.partners.find_by_connection_id(&message.connection_id).await? else {
            warn!(connection_id = %message.connection_id, "Dropping basic message from unknown connection");
            return Ok(());
        };
        self.event_bus.publish(DomainEvent::MessageReceived {
            partner_id: partner.id,
            message_id: message.message_id,
            content: message.content,
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Background updates
    // ------------------------------------------------------------------------

    /// Apply `update` to a partner under its connection lock. The closure returns whether
    /// anything changed; only then is the row written.
    pub async fn update_partner<F>(&self, partner_id: PartnerId, update: F) -> Result<Option<Partner>, RepositoryError>
    where
        F: FnOnce(&mut Partner) -> bool + Send,
    {
        let Some(partner) = self.partners.find_by_id(partner_id).await? else {
            return Ok(None);
        };
        let _guard = self.locks.lock(&partner_lock_key(&partner)).await;

        // Re-read under the lock; the first read only located the key.
        let Some(mut partner) = self.partners.find_by_id(partner_id).await? else {
            return Ok(None);
        };
        if update(&mut partner) {
            self.partners.save(&partner).await?;
        }
        Ok(Some(partner))
    }

    /// Outcome of a liveness ping.
    pub async fn record_liveness(&self, partner_id: PartnerId, responded: bool) -> Result<(), RepositoryError> {
        let now = Utc::now();
        self.update_partner(partner_id, |partner| {
            if responded {
                partner.mark_seen(now);
            } else {
                partner.mark_unresponsive(now);
            }
            true
        })
        .await?;
        Ok(())
    }

    pub async fn set_supported_credential_types(
        &self,
        partner_id: PartnerId,
        types: BTreeSet<String>,
    ) -> Result<(), RepositoryError> {
        self.update_partner(partner_id, |partner| {
            if partner.supported_credential_types == types {
                return false;
            }
            partner.supported_credential_types = types;
            partner.updated_at = Utc::now();
            true
        })
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // User-initiated
    // ------------------------------------------------------------------------

    pub async fn list_partners(&self) -> Result<Vec<Partner>, ExchangeError> {
        Ok(self.partners.list_all().await?)
    }

    pub async fn get_partner(&self, partner_id: PartnerId) -> Result<Partner, ExchangeError> {
        self.partners
            .find_by_id(partner_id)
            .await?
            .ok_or_else(|| ExchangeError::PartnerNotFound(partner_id.to_string()))
    }

    /// Create an out-of-band invitation. The partner row is keyed by the invitation id
    /// until the peer answers.
    pub async fn create_invitation(&self, alias: Option<String>) -> Result<(Partner, InvitationRecord), ExchangeError> {
        let invitation = self.gateway.create_invitation(alias.as_deref()).await?;
        let _guard = self.locks.lock(&invitation.invitation_msg_id).await;

        let partner = Partner::from_invitation(invitation.invitation_msg_id.clone(), alias);
        self.partners.save(&partner).await?;
        info!(partner_id = %partner.id, invitation_msg_id = %invitation.invitation_msg_id, "Invitation created");
        Ok((partner, invitation))
    }

    /// Accept an invitation created elsewhere.
    pub async fn receive_invitation(&self, invitation: &Value, alias: Option<String>) -> Result<Partner, ExchangeError> {
        let handle = self.gateway.receive_invitation(invitation, alias.as_deref()).await?;
        let key = handle.invitation_msg_id.clone().unwrap_or_else(|| handle.connection_id.clone());
        let _guard = self.locks.lock(&key).await;

        if let Some(existing) = self.partners.find_by_connection_id(&handle.connection_id).await? {
            return Ok(existing);
        }
        let mut partner = Partner::outgoing(handle.connection_id.clone(), None, alias);
        partner.invitation_msg_id = handle.invitation_msg_id.clone();
        self.partners.save(&partner).await?;

        self.event_bus.publish(DomainEvent::PartnerAdded {
            partner: partner.clone(),
            occurred_at: Utc::now(),
        });
        Ok(partner)
    }

    /// Accept a connection request a peer sent to our public DID.
    pub async fn accept_connection(&self, partner_id: PartnerId) -> Result<Partner, ExchangeError> {
        let partner = self
            .partners
            .find_by_id(partner_id)
            .await?
            .ok_or_else(|| ExchangeError::PartnerNotFound(partner_id.to_string()))?;
        let connection_id = partner
            .connection_id
            .as_deref()
            .ok_or_else(|| ExchangeError::InvalidState("partner has no connection yet".to_string()))?;
        if partner.state != ConnectionState::Request {
            return Err(ExchangeError::InvalidState(format!(
                "connection is {}, not request",
                partner.state
            )));
        }
        self.gateway.accept_connection_request(connection_id).await?;
        Ok(partner)
    }

    /// Remove a partner. Remote cleanup is best effort; local references are always cleared.
    pub async fn remove_partner(&self, partner_id: PartnerId) -> Result<(), ExchangeError> {
        let partner = self
            .partners
            .find_by_id(partner_id)
            .await?
            .ok_or_else(|| ExchangeError::PartnerNotFound(partner_id.to_string()))?;
        let _guard = self.locks.lock(&partner_lock_key(&partner)).await;

        if let Some(connection_id) = partner.connection_id.as_deref() {
            if let Err(e) = self.gateway.remove_connection(connection_id).await {
                warn!(connection_id, error = %e, "Could not remove connection at agent");
            }
        }

        // Deleted first, so events reconciled from here on no longer resolve the partner.
        self.partners.delete(partner.id).await?;
        let detached = self.credentials.detach_partner(partner.id).await?;
        debug!(partner_id = %partner.id, detached, "Credential exchanges detached");
        for proof in self.proofs.list_by_partner(partner.id).await? {
            if let Err(e) = self
                .proof_gateway
                .remove_presentation_exchange(proof.version, &proof.exchange_id)
                .await
            {
                if !e.is_not_found() {
                    warn!(exchange_id = %proof.exchange_id, error = %e, "Could not remove presentation exchange at agent");
                }
            }
            self.proofs.delete(proof.id).await?;
        }

        info!(partner_id = %partner.id, "Partner removed");
        self.event_bus.publish(DomainEvent::PartnerRemoved {
            partner,
            occurred_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::FakeGateway;
    use crate::domain::credential::{CredentialExchange, CredentialExchangeState, CredentialType, ExchangeRole};
    use crate::domain::exchange::ExchangeVersion;
    use crate::domain::repository::CredentialExchangeRepository;
    use crate::infrastructure::repositories::{
        InMemoryCredentialExchangeRepository, InMemoryPartnerRepository, InMemoryProofExchangeRepository,
        InMemorySchemaRepository,
    };
    use serde_json::json;

    struct Harness {
        reconciler: ConnectionReconciler,
        partners: Arc<InMemoryPartnerRepository>,
        credentials: Arc<InMemoryCredentialExchangeRepository>,
        core: Arc<CredentialCore>,
        gateway: Arc<FakeGateway>,
        bus: Arc<EventBus>,
    }

    fn harness() -> Harness {
        let partners = Arc::new(InMemoryPartnerRepository::new());
        let credentials = Arc::new(InMemoryCredentialExchangeRepository::new());
        let gateway = Arc::new(FakeGateway::default());
        let bus = Arc::new(EventBus::new(64));
        let core = Arc::new(CredentialCore::new(
            credentials.clone(),
            partners.clone(),
            Arc::new(InMemorySchemaRepository::new()),
            gateway.clone(),
            bus.clone(),
        ));
        let reconciler = ConnectionReconciler::new(
            partners.clone(),
            core.clone(),
            Arc::new(InMemoryProofExchangeRepository::new()),
            gateway.clone(),
            gateway.clone(),
            bus.clone(),
            "did:sov:",
        );
        Harness {
            reconciler,
            partners,
            credentials,
            core,
            gateway,
            bus,
        }
    }

    fn record(value: serde_json::Value) -> ConnectionEvent {
        ConnectionEvent::decode(&value).unwrap()
    }

    #[tokio::test]
    async fn test_backfill_preserves_invitation_id() {
        let h = harness();
        let partner = Partner::from_invitation("inv-1", Some("Bank".into()));
        h.partners.save(&partner).await.unwrap();

        h.reconciler
            .handle_connection(record(json!({
                "connection_id": "c-1",
                "invitation_msg_id": "inv-1",
                "their_did": "Xy12",
                "their_label": "Bank of Example",
                "state": "request",
                "their_role": "invitee",
                "connection_protocol": "didexchange/1.0"
            })))
            .await
            .unwrap();

        let stored = h.partners.find_by_id(partner.id).await.unwrap().unwrap();
        assert_eq!(stored.connection_id.as_deref(), Some("c-1"));
        assert_eq!(stored.invitation_msg_id.as_deref(), Some("inv-1"));
        assert_eq!(stored.did.as_deref(), Some("did:sov:Xy12"));
        assert_eq!(stored.alias.as_deref(), Some("Bank"));
        assert_eq!(h.partners.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsolicited_request_emits_request_received_once() {
        let h = harness();
        let mut rx = h.bus.subscribe();
        let event = json!({
            "connection_id": "c-9",
            "their_did": "Peer1",
            "state": "request",
            "their_role": "requester",
            "updated_at": "2024-01-01 10:00:00.000000Z"
        });

        h.reconciler.handle_connection(record(event.clone())).await.unwrap();
        h.reconciler.handle_connection(record(event)).await.unwrap();

        let received = rx.try_recv().unwrap();
        assert_eq!(received.event_type(), "partner_request_received");
        assert!(rx.try_recv().is_err());
        let partner = h.partners.find_by_connection_id("c-9").await.unwrap().unwrap();
        assert!(partner.incoming);
        assert_eq!(partner.did.as_deref(), Some("did:peer:Peer1"));
    }

    #[tokio::test]
    async fn test_own_invitation_response_completes_request() {
        let h = harness();
        let partner = Partner::from_invitation("inv-2", None);
        h.partners.save(&partner).await.unwrap();
        let mut rx = h.bus.subscribe();

        for state in ["response", "active"] {
            h.reconciler
                .handle_connection(record(json!({
                    "connection_id": "c-2",
                    "invitation_msg_id": "inv-2",
                    "state": state,
                    "their_role": "invitee"
                })))
                .await
                .unwrap();
        }

        assert_eq!(rx.try_recv().unwrap().event_type(), "partner_request_completed");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_outgoing_accepted_after_request() {
        let h = harness();
        let mut partner = Partner::from_invitation("inv-3", None);
        partner.connection_id = Some("c-3".into());
        h.partners.save(&partner).await.unwrap();
        let mut rx = h.bus.subscribe();

        for state in ["request", "response", "active"] {
            h.reconciler
                .handle_connection(record(json!({
                    "connection_id": "c-3",
                    "state": state,
                    "their_role": "inviter",
                    "their_label": "Shop"
                })))
                .await
                .unwrap();
        }

        assert_eq!(rx.try_recv().unwrap().event_type(), "partner_added");
        assert_eq!(rx.try_recv().unwrap().event_type(), "partner_accepted");
        assert!(rx.try_recv().is_err());
        let stored = h.partners.find_by_id(partner.id).await.unwrap().unwrap();
        assert_eq!(stored.label.as_deref(), Some("Shop"));
    }

    #[tokio::test]
    async fn test_remove_partner_detaches_credentials() {
        let h = harness();
        let mut partner = Partner::unsolicited("c-4", ConnectionState::Active);
        partner.label = Some("Gone".into());
        h.partners.save(&partner).await.unwrap();
        let mut exchange = CredentialExchange::new(
            ExchangeRole::Holder,
            ExchangeVersion::V1,
            CredentialType::Indy,
            "cx-4",
            CredentialExchangeState::CredentialAcked,
        );
        exchange.partner_id = Some(partner.id);
        h.credentials.save(&exchange).await.unwrap();
        let mut rx = h.bus.subscribe();

        h.reconciler.remove_partner(partner.id).await.unwrap();

        assert!(h.partners.find_by_id(partner.id).await.unwrap().is_none());
        let detached = h.credentials.find_by_id(exchange.id).await.unwrap().unwrap();
        assert_eq!(detached.partner_id, None);
        assert_eq!(h.gateway.calls(), vec!["remove_connection c-4".to_string()]);
        assert_eq!(rx.try_recv().unwrap().event_type(), "partner_removed");
    }

    async fn reindex_fired(signal: &Notify) -> bool {
        tokio::time::timeout(std::time::Duration::from_millis(50), signal.notified())
            .await
            .is_ok()
    }

    #[tokio::test]
    async fn test_incoming_connection_usable_triggers_reindex() {
        let h = harness();
        let signal = h.reconciler.reindex_signal();

        for state in ["request", "active"] {
            h.reconciler
                .handle_connection(record(json!({
                    "connection_id": "c-5",
                    "their_did": "Peer5",
                    "state": state,
                    "their_role": "requester"
                })))
                .await
                .unwrap();
        }

        assert!(reindex_fired(&signal).await);
    }

    #[tokio::test]
    async fn test_invitation_response_does_not_trigger_reindex() {
        let h = harness();
        let signal = h.reconciler.reindex_signal();
        h.partners.save(&Partner::from_invitation("inv-6", None)).await.unwrap();

        h.reconciler
            .handle_connection(record(json!({
                "connection_id": "c-6",
                "invitation_msg_id": "inv-6",
                "state": "response",
                "their_role": "invitee"
            })))
            .await
            .unwrap();

        assert!(!reindex_fired(&signal).await);
    }

    #[tokio::test]
    async fn test_stale_active_redelivery_keeps_partner_inactive() {
        let h = harness();
        let signal = h.reconciler.reindex_signal();
        let request = json!({
            "connection_id": "c-7",
            "their_did": "Peer7",
            "state": "request",
            "their_role": "requester",
            "updated_at": "2024-01-01 10:00:00.000000Z"
        });
        let active = json!({
            "connection_id": "c-7",
            "their_did": "Peer7",
            "state": "active",
            "their_role": "requester",
            "updated_at": "2024-01-01 10:01:00.000000Z"
        });
        h.reconciler.handle_connection(record(request)).await.unwrap();
        h.reconciler.handle_connection(record(active.clone())).await.unwrap();
        assert!(reindex_fired(&signal).await);
        let partner = h.partners.find_by_connection_id("c-7").await.unwrap().unwrap();
        h.reconciler.record_liveness(partner.id, false).await.unwrap();
        let mut rx = h.bus.subscribe();

        h.reconciler.handle_connection(record(active)).await.unwrap();

        let stored = h.partners.find_by_id(partner.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ConnectionState::Inactive);
        assert!(rx.try_recv().is_err());
        assert!(!reindex_fired(&signal).await);
    }

    #[tokio::test]
    async fn test_remove_partner_waits_for_in_flight_credential_update() {
        let h = harness();
        let partner = Partner::unsolicited("c-8", ConnectionState::Active);
        h.partners.save(&partner).await.unwrap();
        let mut exchange = CredentialExchange::new(
            ExchangeRole::Holder,
            ExchangeVersion::V1,
            CredentialType::Indy,
            "cx-8",
            CredentialExchangeState::OfferReceived,
        );
        exchange.partner_id = Some(partner.id);
        h.credentials.save(&exchange).await.unwrap();

        // A credential event holds the exchange lock and writes the row it loaded earlier.
        let guard = h.core.locks.lock("cx-8").await;
        let in_flight = async {
            tokio::task::yield_now().await;
            let mut loaded = exchange.clone();
            loaded.push_state(CredentialExchangeState::RequestSent, Utc::now());
            h.credentials.save(&loaded).await.unwrap();
            drop(guard);
        };
        let (removed, ()) = tokio::join!(h.reconciler.remove_partner(partner.id), in_flight);
        removed.unwrap();

        let stored = h.credentials.find_by_id(exchange.id).await.unwrap().unwrap();
        assert_eq!(stored.state, CredentialExchangeState::RequestSent);
        assert_eq!(stored.partner_id, None);
    }

    #[tokio::test]
    async fn test_remove_unknown_partner() {
        let h = harness();
        let result = h.reconciler.remove_partner(PartnerId::new()).await;
        assert!(matches!(result, Err(ExchangeError::PartnerNotFound(_))));
    }
}
