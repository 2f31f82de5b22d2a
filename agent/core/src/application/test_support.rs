// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Recording stand-in for the external agent, shared by the reconciler unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::exchange::ExchangeVersion;
use crate::domain::gateway::{
    ConnectionGateway, ConnectionHandle, CredentialGateway, CredentialTerms, ExchangeHandle,
    GatewayError, InvitationRecord, LedgerSchema, ProofGateway, RevocationIds,
};

#[derive(Default)]
pub struct FakeGateway {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, GatewayError>>,
    missing_exchanges: Mutex<HashSet<String>>,
    revoked: Mutex<HashSet<String>>,
    revocation_ids: Mutex<HashMap<String, RevocationIds>>,
    connection_ids: Mutex<Vec<String>>,
    cred_defs: Mutex<HashMap<String, Vec<String>>>,
    sequence: AtomicUsize,
}

impl FakeGateway {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Every later call to `operation` fails with `error`.
    pub fn fail(&self, operation: &'static str, error: GatewayError) {
        self.failures.lock().insert(operation, error);
    }

    /// The agent has forgotten this exchange.
    pub fn forget_exchange(&self, exchange_id: &str) {
        self.missing_exchanges.lock().insert(exchange_id.to_string());
    }

    pub fn revoke(&self, referent: &str) {
        self.revoked.lock().insert(referent.to_string());
    }

    pub fn set_revocation_ids(&self, referent: &str, ids: RevocationIds) {
        self.revocation_ids.lock().insert(referent.to_string(), ids);
    }

    pub fn set_connection_ids(&self, ids: &[&str]) {
        *self.connection_ids.lock() = ids.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_credential_definitions(&self, schema_id: &str, cred_def_ids: &[&str]) {
        self.cred_defs
            .lock()
            .insert(schema_id.to_string(), cred_def_ids.iter().map(|s| s.to_string()).collect());
    }

    fn record(&self, operation: &'static str, detail: impl Into<String>) -> Result<(), GatewayError> {
        let detail = detail.into();
        let entry = if detail.is_empty() {
            operation.to_string()
        } else {
            format!("{} {}", operation, detail)
        };
        self.calls.lock().push(entry);
        match self.failures.lock().get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl ConnectionGateway for FakeGateway {
    async fn create_invitation(&self, alias: Option<&str>) -> Result<InvitationRecord, GatewayError> {
        self.record("create_invitation", alias.unwrap_or_default())?;
        let invitation_msg_id = self.next_id("inv");
        Ok(InvitationRecord {
            invitation_url: format!("http://agent.test?oob={}", invitation_msg_id),
            invitation: json!({ "@id": invitation_msg_id }),
            invitation_msg_id,
        })
    }

    async fn receive_invitation(&self, invitation: &Value, _alias: Option<&str>) -> Result<ConnectionHandle, GatewayError> {
        let invitation_msg_id = invitation.get("@id").and_then(Value::as_str).map(str::to_string);
        self.record("receive_invitation", invitation_msg_id.clone().unwrap_or_default())?;
        Ok(ConnectionHandle {
            connection_id: self.next_id("conn"),
            invitation_msg_id,
            state: Some("request".to_string()),
        })
    }

    async fn accept_connection_request(&self, connection_id: &str) -> Result<(), GatewayError> {
        self.record("accept_connection_request", connection_id)
    }

    async fn remove_connection(&self, connection_id: &str) -> Result<(), GatewayError> {
        self.record("remove_connection", connection_id)
    }

    async fn list_connection_ids(&self) -> Result<Vec<String>, GatewayError> {
        self.record("list_connection_ids", "")?;
        Ok(self.connection_ids.lock().clone())
    }

    async fn send_ping(&self, connection_id: &str) -> Result<String, GatewayError> {
        self.record("send_ping", connection_id)?;
        Ok(format!("thread-{}", connection_id))
    }
}

#[async_trait]
impl CredentialGateway for FakeGateway {
    async fn fetch_credential_exchange(&self, _version: ExchangeVersion, exchange_id: &str) -> Result<Value, GatewayError> {
        self.record("fetch_credential_exchange", exchange_id)?;
        if self.missing_exchanges.lock().contains(exchange_id) {
            return Err(GatewayError::NotFound(exchange_id.to_string()));
        }
        Ok(json!({ "credential_exchange_id": exchange_id }))
    }

    async fn send_credential_proposal(&self, terms: &CredentialTerms) -> Result<ExchangeHandle, GatewayError> {
        self.record("send_credential_proposal", terms.connection_id.clone())?;
        Ok(ExchangeHandle {
            exchange_id: self.next_id("cx"),
            thread_id: None,
        })
    }

    async fn send_credential_offer(&self, terms: &CredentialTerms) -> Result<ExchangeHandle, GatewayError> {
        self.record("send_credential_offer", terms.connection_id.clone())?;
        Ok(ExchangeHandle {
            exchange_id: self.next_id("cx"),
            thread_id: None,
        })
    }

    async fn send_offer_for_proposal(&self, _version: ExchangeVersion, exchange_id: &str) -> Result<(), GatewayError> {
        self.record("send_offer_for_proposal", exchange_id)
    }

    async fn send_credential_request(
        &self,
        _version: ExchangeVersion,
        exchange_id: &str,
        _holder_did: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.record("send_credential_request", exchange_id)
    }

    async fn issue_credential(&self, _version: ExchangeVersion, exchange_id: &str) -> Result<(), GatewayError> {
        self.record("issue_credential", exchange_id)
    }

    async fn send_credential_problem_report(
        &self,
        _version: ExchangeVersion,
        exchange_id: &str,
        _description: &str,
    ) -> Result<(), GatewayError> {
        self.record("send_credential_problem_report", exchange_id)
    }

    async fn remove_credential_exchange(&self, _version: ExchangeVersion, exchange_id: &str) -> Result<(), GatewayError> {
        self.record("remove_credential_exchange", exchange_id)
    }

    async fn revoke_credential(
        &self,
        rev_reg_id: &str,
        cred_rev_id: &str,
        _connection_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.record("revoke_credential", format!("{}/{}", rev_reg_id, cred_rev_id))
    }

    async fn is_credential_revoked(&self, referent: &str) -> Result<bool, GatewayError> {
        self.record("is_credential_revoked", referent)?;
        Ok(self.revoked.lock().contains(referent))
    }

    async fn fetch_credential_revocation_ids(&self, referent: &str) -> Result<RevocationIds, GatewayError> {
        self.record("fetch_credential_revocation_ids", referent)?;
        Ok(self.revocation_ids.lock().get(referent).cloned().unwrap_or_default())
    }

    async fn fetch_schema(&self, schema_id: &str) -> Result<LedgerSchema, GatewayError> {
        self.record("fetch_schema", schema_id)?;
        let name = schema_id.split(':').nth(2).unwrap_or(schema_id).to_string();
        Ok(LedgerSchema {
            schema_id: schema_id.to_string(),
            name,
            version: "1.0".to_string(),
            attributes: vec!["name".to_string()],
        })
    }

    async fn credential_definitions_for_schema(&self, schema_id: &str) -> Result<Vec<String>, GatewayError> {
        self.record("credential_definitions_for_schema", schema_id)?;
        Ok(self.cred_defs.lock().get(schema_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ProofGateway for FakeGateway {
    async fn send_presentation_request(
        &self,
        _version: ExchangeVersion,
        connection_id: &str,
        _request: &Value,
    ) -> Result<ExchangeHandle, GatewayError> {
        self.record("send_presentation_request", connection_id)?;
        Ok(ExchangeHandle {
            exchange_id: self.next_id("px"),
            thread_id: None,
        })
    }

    async fn send_presentation_proposal(&self, connection_id: &str, _proposal: &Value) -> Result<ExchangeHandle, GatewayError> {
        self.record("send_presentation_proposal", connection_id)?;
        Ok(ExchangeHandle {
            exchange_id: self.next_id("px"),
            thread_id: None,
        })
    }

    async fn send_presentation(&self, _version: ExchangeVersion, exchange_id: &str, _material: &Value) -> Result<(), GatewayError> {
        self.record("send_presentation", exchange_id)
    }

    async fn send_presentation_problem_report(
        &self,
        _version: ExchangeVersion,
        exchange_id: &str,
        _description: &str,
    ) -> Result<(), GatewayError> {
        self.record("send_presentation_problem_report", exchange_id)
    }

    async fn remove_presentation_exchange(&self, _version: ExchangeVersion, exchange_id: &str) -> Result<(), GatewayError> {
        self.record("remove_presentation_exchange", exchange_id)
    }
}
