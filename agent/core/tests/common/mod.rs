// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared wiring for the end-to-end tests: every service on in-memory storage, talking to
//! a scripted external agent.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use partner_agent_core::application::credential::CredentialCore;
use partner_agent_core::application::jobs::PingTracker;
use partner_agent_core::application::repository_factory::Repositories;
use partner_agent_core::application::{
    ActivityTracker, ConnectionReconciler, EventDispatcher, HolderReconciler, IssuerReconciler, NotificationFanout,
    NotificationService, ProofReconciler, WebhookDispatcher, WebhookRegistry,
};
use partner_agent_core::domain::agent_config::ActivityConfig;
use partner_agent_core::domain::exchange::ExchangeVersion;
use partner_agent_core::domain::gateway::{
    ConnectionGateway, ConnectionHandle, CredentialGateway, CredentialTerms, ExchangeHandle, GatewayError,
    InvitationRecord, LedgerSchema, ProofGateway, RevocationIds,
};
use partner_agent_core::infrastructure::channel_registry::ChannelRegistry;
use partner_agent_core::infrastructure::event_bus::EventBus;
use partner_agent_core::infrastructure::webhook_client::WebhookClient;

/// External agent that accepts every command and hands out sequential ids.
#[derive(Default)]
pub struct ScriptedAgent {
    calls: Mutex<Vec<String>>,
    sequence: AtomicUsize,
}

impl ScriptedAgent {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn called(&self, operation: &str) -> bool {
        self.calls.lock().iter().any(|c| c.starts_with(operation))
    }

    fn record(&self, entry: String) {
        self.calls.lock().push(entry);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn handle(&self, prefix: &str) -> ExchangeHandle {
        ExchangeHandle {
            exchange_id: self.next_id(prefix),
            thread_id: None,
        }
    }
}

#[async_trait]
impl ConnectionGateway for ScriptedAgent {
    async fn create_invitation(&self, _alias: Option<&str>) -> Result<InvitationRecord, GatewayError> {
        let invitation_msg_id = self.next_id("inv");
        self.record(format!("create_invitation {}", invitation_msg_id));
        Ok(InvitationRecord {
            invitation_url: format!("http://agent.test?oob={}", invitation_msg_id),
            invitation: json!({ "@id": invitation_msg_id }),
            invitation_msg_id,
        })
    }

    async fn receive_invitation(&self, invitation: &Value, _alias: Option<&str>) -> Result<ConnectionHandle, GatewayError> {
        self.record("receive_invitation".to_string());
        Ok(ConnectionHandle {
            connection_id: self.next_id("conn"),
            invitation_msg_id: invitation.get("@id").and_then(Value::as_str).map(str::to_string),
            state: Some("request".to_string()),
        })
    }

    async fn accept_connection_request(&self, connection_id: &str) -> Result<(), GatewayError> {
        self.record(format!("accept_connection_request {}", connection_id));
        Ok(())
    }

    async fn remove_connection(&self, connection_id: &str) -> Result<(), GatewayError> {
        self.record(format!("remove_connection {}", connection_id));
        Ok(())
    }

    async fn list_connection_ids(&self) -> Result<Vec<String>, GatewayError> {
        Ok(Vec::new())
    }

    async fn send_ping(&self, connection_id: &str) -> Result<String, GatewayError> {
        Ok(format!("thread-{}", connection_id))
    }
}

#[async_trait]
impl CredentialGateway for ScriptedAgent {
    async fn fetch_credential_exchange(&self, _version: ExchangeVersion, exchange_id: &str) -> Result<Value, GatewayError> {
        Ok(json!({ "credential_exchange_id": exchange_id }))
    }

    async fn send_credential_proposal(&self, terms: &CredentialTerms) -> Result<ExchangeHandle, GatewayError> {
        self.record(format!("send_credential_proposal {}", terms.connection_id));
        Ok(self.handle("cx"))
    }

    async fn send_credential_offer(&self, terms: &CredentialTerms) -> Result<ExchangeHandle, GatewayError> {
        self.record(format!("send_credential_offer {}", terms.connection_id));
        Ok(self.handle("cx"))
    }

    async fn send_offer_for_proposal(&self, _version: ExchangeVersion, exchange_id: &str) -> Result<(), GatewayError> {
        self.record(format!("send_offer_for_proposal {}", exchange_id));
        Ok(())
    }

    async fn send_credential_request(
        &self,
        _version: ExchangeVersion,
        exchange_id: &str,
        _holder_did: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.record(format!("send_credential_request {}", exchange_id));
        Ok(())
    }

    async fn issue_credential(&self, _version: ExchangeVersion, exchange_id: &str) -> Result<(), GatewayError> {
        self.record(format!("issue_credential {}", exchange_id));
        Ok(())
    }

    async fn send_credential_problem_report(
        &self,
        _version: ExchangeVersion,
        exchange_id: &str,
        _description: &str,
    ) -> Result<(), GatewayError> {
        self.record(format!("send_credential_problem_report {}", exchange_id));
        Ok(())
    }

    async fn remove_credential_exchange(&self, _version: ExchangeVersion, _exchange_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn revoke_credential(
        &self,
        rev_reg_id: &str,
        cred_rev_id: &str,
        _connection_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.record(format!("revoke_credential {}/{}", rev_reg_id, cred_rev_id));
        Ok(())
    }

    async fn is_credential_revoked(&self, _referent: &str) -> Result<bool, GatewayError> {
        Ok(false)
    }

    async fn fetch_credential_revocation_ids(&self, _referent: &str) -> Result<RevocationIds, GatewayError> {
        Ok(RevocationIds::default())
    }

    async fn fetch_schema(&self, schema_id: &str) -> Result<LedgerSchema, GatewayError> {
        Ok(LedgerSchema {
            schema_id: schema_id.to_string(),
            name: schema_id.split(':').nth(2).unwrap_or(schema_id).to_string(),
            version: "1.0".to_string(),
            attributes: vec!["name".to_string()],
        })
    }

    async fn credential_definitions_for_schema(&self, _schema_id: &str) -> Result<Vec<String>, GatewayError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl ProofGateway for ScriptedAgent {
    async fn send_presentation_request(
        &self,
        _version: ExchangeVersion,
        connection_id: &str,
        _request: &Value,
    ) -> Result<ExchangeHandle, GatewayError> {
        self.record(format!("send_presentation_request {}", connection_id));
        Ok(self.handle("px"))
    }

    async fn send_presentation_proposal(&self, connection_id: &str, _proposal: &Value) -> Result<ExchangeHandle, GatewayError> {
        self.record(format!("send_presentation_proposal {}", connection_id));
        Ok(self.handle("px"))
    }

    async fn send_presentation(&self, _version: ExchangeVersion, exchange_id: &str, _material: &Value) -> Result<(), GatewayError> {
        self.record(format!("send_presentation {}", exchange_id));
        Ok(())
    }

    async fn send_presentation_problem_report(
        &self,
        _version: ExchangeVersion,
        exchange_id: &str,
        _description: &str,
    ) -> Result<(), GatewayError> {
        self.record(format!("send_presentation_problem_report {}", exchange_id));
        Ok(())
    }

    async fn remove_presentation_exchange(&self, _version: ExchangeVersion, _exchange_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }
}

pub struct TestAgent {
    pub repos: Repositories,
    pub gateway: Arc<ScriptedAgent>,
    pub bus: Arc<EventBus>,
    pub connections: Arc<ConnectionReconciler>,
    pub holder: Arc<HolderReconciler>,
    pub issuer: Arc<IssuerReconciler>,
    pub proofs: Arc<ProofReconciler>,
    pub dispatcher: EventDispatcher,
    pub activities: Arc<ActivityTracker>,
    pub notifications: Arc<NotificationService>,
    pub webhooks: WebhookRegistry,
}

impl TestAgent {
    /// Build the agent and start its event subscribers.
    pub async fn start() -> Self {
        let repos = Repositories::in_memory();
        let gateway = Arc::new(ScriptedAgent::default());
        let bus = Arc::new(EventBus::new(256));

        let core = Arc::new(CredentialCore::new(
            repos.credentials.clone(),
            repos.partners.clone(),
            repos.schemas.clone(),
            gateway.clone(),
            bus.clone(),
        ));
        let connections = Arc::new(ConnectionReconciler::new(
            repos.partners.clone(),
            core.clone(),
            repos.proofs.clone(),
            gateway.clone(),
            gateway.clone(),
            bus.clone(),
            "did:sov:",
        ));
        let holder = Arc::new(HolderReconciler::new(core.clone()));
        let issuer = Arc::new(IssuerReconciler::new(core, repos.credential_definitions.clone(), false));
        let proofs = Arc::new(ProofReconciler::new(
            repos.proofs.clone(),
            repos.partners.clone(),
            gateway.clone(),
            bus.clone(),
            true,
        ));
        let dispatcher = EventDispatcher::new(
            connections.clone(),
            holder.clone(),
            issuer.clone(),
            proofs.clone(),
            Arc::new(PingTracker::new()),
        );

        let activities = Arc::new(ActivityTracker::new(
            repos.activities.clone(),
            bus.clone(),
            ActivityConfig::default(),
        ));
        let notifications = Arc::new(NotificationService::new(
            Arc::new(ChannelRegistry::new()),
            repos.notifications.clone(),
        ));
        let fanout = Arc::new(NotificationFanout::new(
            notifications.clone(),
            repos.partners.clone(),
            bus.clone(),
            ActivityConfig::default(),
        ));
        let webhook_dispatcher = Arc::new(WebhookDispatcher::new(
            repos.webhooks.clone(),
            WebhookClient::new(Duration::from_secs(2)).expect("webhook client"),
            bus.clone(),
        ));

        activities.clone().start();
        fanout.start();
        webhook_dispatcher.start();

        // Subscribers attach from their own tasks.
        wait_until(|| {
            let bus = bus.clone();
            async move { bus.subscriber_count() >= 3 }
        })
        .await;

        Self {
            webhooks: WebhookRegistry::new(repos.webhooks.clone()),
            repos,
            gateway,
            bus,
            connections,
            holder,
            issuer,
            proofs,
            dispatcher,
            activities,
            notifications,
        }
    }

    pub async fn deliver(&self, topic: &str, body: Value) {
        self.dispatcher.dispatch(topic, body.to_string().as_bytes()).await;
    }
}

/// Poll `condition` until it holds; panics after two seconds.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within two seconds");
}
