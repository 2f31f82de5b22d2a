// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event Dispatcher
//!
//! Entry point for the agent's webhook topics. Decodes a payload into a typed event and
//! hands it to the reconciler that owns it. Nothing here ever fails towards the agent:
//! undecodable payloads, unknown topics and handler errors are logged and counted, since
//! the agent cannot redeliver any differently.
//!
//! | Topic | Decoded as | Owner |
//! |-------|------------|-------|
//! | `connections` | [`ConnectionEvent`] | connection reconciler |
//! | `issue_credential` | v1 [`CredentialEvent`] | holder or issuer by role |
//! | `issue_credential_v2_0` | v2 [`CredentialEvent`] | holder or issuer by role |
//! | `issue_credential_v2_0_indy` | [`RevocationInfoEvent`] | holder and issuer |
//! | `revocation_notification` | [`RevocationNotice`] | holder |
//! | `present_proof` / `present_proof_v2_0` | [`PresentationEvent`] | proof reconciler |
//! | `basicmessages` | [`BasicMessageEvent`] | connection reconciler |
//! | `ping` | [`PingEvent`] | liveness ping tracker |
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Inbound routing

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::application::connection::ConnectionReconciler;
use crate::application::credential::{HolderReconciler, IssuerReconciler};
use crate::application::error::{DispatchError, ExchangeError};
use crate::application::inbound::{
    BasicMessageEvent, ConnectionEvent, CredentialEvent, PingEvent, PresentationEvent, RevocationInfoEvent,
    RevocationNotice,
};
use crate::application::jobs::PingTracker;
use crate::application::proof::ProofReconciler;
use crate::domain::credential::ExchangeRole;

/// Inbound topic names as the agent posts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Connections,
    IssueCredential,
    IssueCredentialV2,
    IssueCredentialV2Indy,
    RevocationNotification,
    PresentProof,
    PresentProofV2,
    BasicMessages,
    Ping,
}

impl Topic {
    pub fn parse(name: &str) -> Option<Self> {
        let topic = match name {
            "connections" => Topic::Connections,
            "issue_credential" => Topic::IssueCredential,
            "issue_credential_v2_0" => Topic::IssueCredentialV2,
            "issue_credential_v2_0_indy" => Topic::IssueCredentialV2Indy,
            "revocation_notification" => Topic::RevocationNotification,
            "present_proof" => Topic::PresentProof,
            "present_proof_v2_0" => Topic::PresentProofV2,
            "basicmessages" => Topic::BasicMessages,
            "ping" => Topic::Ping,
            _ => return None,
        };
        Some(topic)
    }

    /// Metric label for a raw topic name. Names outside the known set share one label.
    pub fn label(name: &str) -> &'static str {
        Topic::parse(name).map_or("unknown", |topic| topic.as_str())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Connections => "connections",
            Topic::IssueCredential => "issue_credential",
            Topic::IssueCredentialV2 => "issue_credential_v2_0",
            Topic::IssueCredentialV2Indy => "issue_credential_v2_0_indy",
            Topic::RevocationNotification => "revocation_notification",
            Topic::PresentProof => "present_proof",
            Topic::PresentProofV2 => "present_proof_v2_0",
            Topic::BasicMessages => "basicmessages",
            Topic::Ping => "ping",
        }
    }
}

pub struct EventDispatcher {
    connections: Arc<ConnectionReconciler>,
    holder: Arc<HolderReconciler>,
    issuer: Arc<IssuerReconciler>,
    proofs: Arc<ProofReconciler>,
    pings: Arc<PingTracker>,
}

impl EventDispatcher {
    pub fn new(
        connections: Arc<ConnectionReconciler>,
        holder: Arc<HolderReconciler>,
        issuer: Arc<IssuerReconciler>,
        proofs: Arc<ProofReconciler>,
        pings: Arc<PingTracker>,
    ) -> Self {
        Self {
            connections,
            holder,
            issuer,
            proofs,
            pings,
        }
    }

    /// Process one webhook delivery. Never fails; every problem is logged.
    pub async fn dispatch(&self, topic: &str, body: &[u8]) {
        metrics::counter!("partner_agent_inbound_events_total", "topic" => Topic::label(topic)).increment(1);

        match self.route(topic, body).await {
            Ok(Ok(())) => debug!(topic, "Inbound event processed"),
            Ok(Err(e)) => {
                error!(topic, error = %e, "Inbound event handler failed");
            }
            Err(e) => {
                let reason = match e {
                    DispatchError::UnknownTopic(_) => "unknown_topic",
                    DispatchError::Decode { .. } => "undecodable",
                };
                metrics::counter!("partner_agent_inbound_dropped_total", "reason" => reason).increment(1);
                warn!(topic, error = %e, "Dropping inbound event");
            }
        }
    }

    async fn route(&self, topic_name: &str, body: &[u8]) -> Result<Result<(), ExchangeError>, DispatchError> {
        let topic = Topic::parse(topic_name).ok_or_else(|| DispatchError::UnknownTopic(topic_name.to_string()))?;
        let payload: Value = serde_json::from_slice(body).map_err(|e| decode_error(topic, e))?;

        let outcome = match topic {
            Topic::Connections => {
                let event = ConnectionEvent::decode(&payload).map_err(|e| decode_error(topic, e))?;
                self.connections.handle_connection(event).await
            }
            Topic::IssueCredential => {
                let event = CredentialEvent::decode_v1(&payload).map_err(|e| decode_error(topic, e))?;
                self.route_credential(event).await
            }
            Topic::IssueCredentialV2 => {
                let event = CredentialEvent::decode_v2(&payload).map_err(|e| decode_error(topic, e))?;
                self.route_credential(event).await
            }
            Topic::IssueCredentialV2Indy => {
                let info: RevocationInfoEvent = typed(topic, payload)?;
                match self.holder.handle_revocation_info(info.clone()).await {
                    Ok(()) => self.issuer.handle_revocation_info(info).await,
                    Err(e) => Err(e),
                }
            }
            Topic::RevocationNotification => {
                let notice = RevocationNotice::decode(&payload).map_err(|e| decode_error(topic, e))?;
                self.holder.handle_revocation_notice(notice).await
            }
            Topic::PresentProof => {
                let event = PresentationEvent::decode_v1(&payload).map_err(|e| decode_error(topic, e))?;
                self.proofs.handle(event).await
            }
            Topic::PresentProofV2 => {
                let event = PresentationEvent::decode_v2(&payload).map_err(|e| decode_error(topic, e))?;
                self.proofs.handle(event).await
            }
            Topic::BasicMessages => {
                let message: BasicMessageEvent = typed(topic, payload)?;
                self.connections.handle_basic_message(message).await
            }
            Topic::Ping => {
                let ping: PingEvent = typed(topic, payload)?;
                if ping.is_response() && !self.pings.record_response(&ping.thread_id) {
                    debug!(thread_id = %ping.thread_id, "Ping response for a thread we did not start");
                }
                Ok(())
            }
        };
        Ok(outcome)
    }

    async fn route_credential(&self, event: CredentialEvent) -> Result<(), ExchangeError> {
        match event.role {
            ExchangeRole::Holder => self.holder.handle(event).await,
            ExchangeRole::Issuer => self.issuer.handle(event).await,
        }
    }
}

fn typed<T: DeserializeOwned>(topic: Topic, payload: Value) -> Result<T, DispatchError> {
    serde_json::from_value(payload).map_err(|e| decode_error(topic, e))
}

fn decode_error(topic: Topic, reason: impl ToString) -> DispatchError {
    DispatchError::Decode {
        topic: topic.as_str().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::credential::CredentialCore;
    use crate::application::test_support::FakeGateway;
    use crate::domain::partner::{ConnectionState, Partner};
    use crate::domain::repository::{PartnerRepository, ProofExchangeRepository};
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::repositories::{
        InMemoryCredentialDefinitionRepository, InMemoryCredentialExchangeRepository, InMemoryPartnerRepository,
        InMemoryProofExchangeRepository, InMemorySchemaRepository,
    };
    use serde_json::json;

    struct Harness {
        dispatcher: EventDispatcher,
        partners: Arc<InMemoryPartnerRepository>,
        proofs: Arc<InMemoryProofExchangeRepository>,
        pings: Arc<PingTracker>,
    }

    fn harness() -> Harness {
        let partners = Arc::new(InMemoryPartnerRepository::new());
        let credentials = Arc::new(InMemoryCredentialExchangeRepository::new());
        let proofs = Arc::new(InMemoryProofExchangeRepository::new());
        let gateway = Arc::new(FakeGateway::default());
        let bus = Arc::new(EventBus::new(32));

        let core = Arc::new(CredentialCore::new(
            credentials,
            partners.clone(),
            Arc::new(InMemorySchemaRepository::new()),
            gateway.clone(),
            bus.clone(),
        ));
        let connections = Arc::new(ConnectionReconciler::new(
            partners.clone(),
            core.clone(),
            proofs.clone(),
            gateway.clone(),
            gateway.clone(),
            bus.clone(),
            "did:sov:",
        ));
        let holder = Arc::new(HolderReconciler::new(core.clone()));
        let issuer = Arc::new(IssuerReconciler::new(
            core,
            Arc::new(InMemoryCredentialDefinitionRepository::new()),
            false,
        ));
        let proof = Arc::new(ProofReconciler::new(proofs.clone(), partners.clone(), gateway, bus, true));
        let pings = Arc::new(PingTracker::new());

        Harness {
            dispatcher: EventDispatcher::new(connections, holder, issuer, proof, pings.clone()),
            partners,
            proofs,
            pings,
        }
    }

    #[tokio::test]
    async fn test_connection_topic_creates_partner() {
        let h = harness();
        let body = json!({
            "connection_id": "conn-1",
            "state": "request",
            "their_role": "invitee",
            "their_label": "Bob"
        });

        h.dispatcher.dispatch("connections", body.to_string().as_bytes()).await;

        let partner = h.partners.find_by_connection_id("conn-1").await.unwrap().unwrap();
        assert_eq!(partner.state, ConnectionState::Request);
    }

    #[tokio::test]
    async fn test_garbage_and_unknown_topics_are_swallowed() {
        let h = harness();
        h.dispatcher.dispatch("connections", b"{not json").await;
        h.dispatcher.dispatch("mediation", b"{}").await;
        h.dispatcher.dispatch("present_proof", br#"{"role":"prover"}"#).await;

        assert!(h.partners.list_all().await.unwrap().is_empty());
        assert!(h.proofs.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_presentation_for_unknown_connection_is_dropped() {
        let h = harness();
        let body = json!({
            "presentation_exchange_id": "px-9",
            "connection_id": "conn-nobody",
            "role": "verifier",
            "state": "presentation_received"
        });

        h.dispatcher.dispatch("present_proof", body.to_string().as_bytes()).await;

        assert!(h.proofs.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ping_response_is_recorded() {
        let h = harness();
        let partner = Partner::unsolicited("conn-1", ConnectionState::Active);
        h.partners.save(&partner).await.unwrap();
        h.pings.expect("thread-1".into(), partner.id);

        let body = json!({ "connection_id": "conn-1", "thread_id": "thread-1", "state": "response_received" });
        h.dispatcher.dispatch("ping", body.to_string().as_bytes()).await;

        let settled = h.pings.drain();
        assert_eq!(settled.len(), 1);
        assert!(settled[0].responded);
    }

    #[test]
    fn test_topic_names_round_trip() {
        for name in ["connections", "issue_credential_v2_0_indy", "present_proof_v2_0", "ping"] {
            assert_eq!(Topic::parse(name).map(|t| t.as_str()), Some(name));
        }
        assert!(Topic::parse("issue-credential").is_none());
    }

    #[test]
    fn test_unknown_topics_share_one_label() {
        assert_eq!(Topic::label("present_proof"), "present_proof");
        assert_eq!(Topic::label("issue-credential"), "unknown");
        assert_eq!(Topic::label("../../etc/passwd"), "unknown");
    }
}
