// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! External Agent Admin Client
//!
//! `reqwest` implementation of the gateway traits against the identity agent's admin
//! API. Every request carries the configured timeout so a slow agent cannot stall a
//! user-facing request or a background job.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** HTTP adapter for `ConnectionGateway`, `CredentialGateway`, `ProofGateway`
//! - **Integration:** Reconcilers / jobs → admin API → external agent

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::domain::agent_config::GatewayConfig;
use crate::domain::credential::{CredentialPayload, CredentialType};
use crate::domain::exchange::ExchangeVersion;
use crate::domain::gateway::{
    ConnectionGateway, ConnectionHandle, CredentialGateway, CredentialTerms, ExchangeHandle,
    GatewayError, InvitationRecord, LedgerSchema, ProofGateway, RevocationIds,
};

const DIDEXCHANGE_PROTOCOL: &str = "https://didcomm.org/didexchange/1.0";

// ============================================================================
// Wire Models
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreatedInvitation {
    invi_msg_id: String,
    invitation_url: String,
    #[serde(default)]
    invitation: Value,
}

#[derive(Debug, Deserialize)]
struct ConnectionList {
    #[serde(default)]
    results: Vec<ConnectionSummary>,
}

#[derive(Debug, Deserialize)]
struct ConnectionSummary {
    connection_id: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionResult {
    connection_id: String,
    #[serde(default)]
    invitation_msg_id: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PingResult {
    thread_id: String,
}

#[derive(Debug, Deserialize)]
struct RevokedResult {
    revoked: bool,
}

#[derive(Debug, Deserialize)]
struct SchemaEnvelope {
    schema: SchemaBody,
}

#[derive(Debug, Deserialize)]
struct SchemaBody {
    id: String,
    name: String,
    version: String,
    #[serde(rename = "attrNames", default)]
    attr_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedCredDefs {
    #[serde(default)]
    credential_definition_ids: Vec<String>,
}

// ============================================================================
// Client Implementation
// ============================================================================

pub struct AgentAdminClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl AgentAdminClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Self::new(config.url.clone(), config.api_key.clone(), config.timeout)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("X-API-Key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> Result<reqwest::Response, GatewayError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Unavailable(format!("{} timed out", path))
            } else {
                GatewayError::Unavailable(format!("{}: {}", path, e))
            }
        })?;

        let status = response.status();
        debug!(path = path, status = status.as_u16(), "Agent admin call");
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, GatewayError> {
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = self.send(builder, path).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(format!("{}: {}", path, e)))
    }

    async fn call_unit(&self, method: Method, path: &str, body: Option<&Value>) -> Result<(), GatewayError> {
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.send(builder, path).await.map(|_| ())
    }

    fn credential_records(version: ExchangeVersion) -> &'static str {
        match version {
            ExchangeVersion::V1 => "/issue-credential/records",
            ExchangeVersion::V2 => "/issue-credential-2.0/records",
        }
    }

    fn presentation_records(version: ExchangeVersion) -> &'static str {
        match version {
            ExchangeVersion::V1 => "/present-proof/records",
            ExchangeVersion::V2 => "/present-proof-2.0/records",
        }
    }

    fn exchange_handle(value: Value) -> Result<ExchangeHandle, GatewayError> {
        let exchange_id = ["credential_exchange_id", "cred_ex_id", "presentation_exchange_id", "pres_ex_id"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .ok_or_else(|| GatewayError::Decode("response carries no exchange id".to_string()))?;
        Ok(ExchangeHandle {
            exchange_id: exchange_id.to_string(),
            thread_id: value.get("thread_id").and_then(Value::as_str).map(str::to_string),
        })
    }

    fn credential_preview(version: ExchangeVersion, payload: &CredentialPayload) -> Value {
        let attributes: Vec<Value> = match payload {
            CredentialPayload::Indy { attributes } => attributes
                .iter()
                .map(|(name, value)| json!({ "name": name, "value": value }))
                .collect(),
            CredentialPayload::JsonLd { .. } => Vec::new(),
        };
        let preview_type = match version {
            ExchangeVersion::V1 => "issue-credential/1.0/credential-preview",
            ExchangeVersion::V2 => "issue-credential/2.0/credential-preview",
        };
        json!({ "@type": preview_type, "attributes": attributes })
    }

    fn v2_filter(terms: &CredentialTerms) -> Value {
        match (&terms.credential_type, &terms.payload) {
            (CredentialType::JsonLd, CredentialPayload::JsonLd { document }) => json!({
                "ld_proof": {
                    "credential": document,
                    "options": { "proofType": "Ed25519Signature2018" }
                }
            }),
            _ => {
                let mut indy = serde_json::Map::new();
                if let Some(schema_id) = &terms.schema_id {
                    indy.insert("schema_id".into(), json!(schema_id));
                }
                if let Some(cred_def_id) = &terms.cred_def_id {
                    indy.insert("cred_def_id".into(), json!(cred_def_id));
                }
                json!({ "indy": indy })
            }
        }
    }
}

#[async_trait]
impl ConnectionGateway for AgentAdminClient {
    async fn create_invitation(&self, alias: Option<&str>) -> Result<InvitationRecord, GatewayError> {
        let body = json!({
            "alias": alias,
            "handshake_protocols": [DIDEXCHANGE_PROTOCOL],
            "use_public_did": false
        });
        let created: CreatedInvitation = self
            .call(Method::POST, "/out-of-band/create-invitation?auto_accept=true", Some(&body))
            .await?;
        Ok(InvitationRecord {
            invitation_msg_id: created.invi_msg_id,
            invitation_url: created.invitation_url,
            invitation: created.invitation,
        })
    }

    async fn receive_invitation(
        &self,
        invitation: &Value,
        alias: Option<&str>,
    ) -> Result<ConnectionHandle, GatewayError> {
        let path = "/out-of-band/receive-invitation";
        let mut builder = self
            .request(Method::POST, path)
            .query(&[("auto_accept", "true")])
            .json(invitation);
        if let Some(alias) = alias {
            builder = builder.query(&[("alias", alias)]);
        }
        let result: ConnectionResult = self
            .send(builder, path)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("{}: {}", path, e)))?;
        Ok(ConnectionHandle {
            connection_id: result.connection_id,
            invitation_msg_id: result.invitation_msg_id,
            state: result.state,
        })
    }

    async fn accept_connection_request(&self, connection_id: &str) -> Result<(), GatewayError> {
        self.call_unit(
            Method::POST,
            &format!("/didexchange/{}/accept-request", connection_id),
            None,
        )
        .await
    }

    async fn remove_connection(&self, connection_id: &str) -> Result<(), GatewayError> {
        self.call_unit(Method::DELETE, &format!("/connections/{}", connection_id), None)
            .await
    }

    async fn list_connection_ids(&self) -> Result<Vec<String>, GatewayError> {
        let list: ConnectionList = self.call(Method::GET, "/connections", None).await?;
        Ok(list.results.into_iter().map(|c| c.connection_id).collect())
    }

    async fn send_ping(&self, connection_id: &str) -> Result<String, GatewayError> {
        let result: PingResult = self
            .call(
                Method::POST,
                &format!("/connections/{}/send-ping", connection_id),
                Some(&json!({ "comment": "ping" })),
            )
            .await?;
        Ok(result.thread_id)
    }
}

#[async_trait]
impl CredentialGateway for AgentAdminClient {
    async fn fetch_credential_exchange(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
    ) -> Result<Value, GatewayError> {
        self.call(
            Method::GET,
            &format!("{}/{}", Self::credential_records(version), exchange_id),
            None,
        )
        .await
    }

    async fn send_credential_proposal(&self, terms: &CredentialTerms) -> Result<ExchangeHandle, GatewayError> {
        let (path, body) = match terms.version {
            ExchangeVersion::V1 => (
                "/issue-credential/send-proposal",
                json!({
                    "connection_id": terms.connection_id,
                    "schema_id": terms.schema_id,
                    "cred_def_id": terms.cred_def_id,
                    "credential_proposal": Self::credential_preview(terms.version, &terms.payload),
                }),
            ),
            ExchangeVersion::V2 => (
                "/issue-credential-2.0/send-proposal",
                json!({
                    "connection_id": terms.connection_id,
                    "credential_preview": Self::credential_preview(terms.version, &terms.payload),
                    "filter": Self::v2_filter(terms),
                }),
            ),
        };
        let value: Value = self.call(Method::POST, path, Some(&body)).await?;
        Self::exchange_handle(value)
    }

    async fn send_credential_offer(&self, terms: &CredentialTerms) -> Result<ExchangeHandle, GatewayError> {
        let (path, body) = match terms.version {
            ExchangeVersion::V1 => (
                "/issue-credential/send-offer",
                json!({
                    "connection_id": terms.connection_id,
                    "cred_def_id": terms.cred_def_id,
                    "credential_preview": Self::credential_preview(terms.version, &terms.payload),
                    "auto_issue": true,
                }),
            ),
            ExchangeVersion::V2 => (
                "/issue-credential-2.0/send-offer",
                json!({
                    "connection_id": terms.connection_id,
                    "credential_preview": Self::credential_preview(terms.version, &terms.payload),
                    "filter": Self::v2_filter(terms),
                    "auto_issue": true,
                }),
            ),
        };
        let value: Value = self.call(Method::POST, path, Some(&body)).await?;
        Self::exchange_handle(value)
    }

    async fn send_offer_for_proposal(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
    ) -> Result<(), GatewayError> {
        self.call_unit(
            Method::POST,
            &format!("{}/{}/send-offer", Self::credential_records(version), exchange_id),
            Some(&json!({})),
        )
        .await
    }

    async fn send_credential_request(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
        holder_did: Option<&str>,
    ) -> Result<(), GatewayError> {
        let body = match (version, holder_did) {
            (ExchangeVersion::V2, Some(did)) => json!({ "holder_did": did }),
            _ => json!({}),
        };
        self.call_unit(
            Method::POST,
            &format!("{}/{}/send-request", Self::credential_records(version), exchange_id),
            Some(&body),
        )
        .await
    }

    async fn issue_credential(&self, version: ExchangeVersion, exchange_id: &str) -> Result<(), GatewayError> {
        self.call_unit(
            Method::POST,
            &format!("{}/{}/issue", Self::credential_records(version), exchange_id),
            Some(&json!({})),
        )
        .await
    }

    async fn send_credential_problem_report(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
        description: &str,
    ) -> Result<(), GatewayError> {
        self.call_unit(
            Method::POST,
            &format!("{}/{}/problem-report", Self::credential_records(version), exchange_id),
            Some(&json!({ "description": description })),
        )
        .await
    }

    async fn remove_credential_exchange(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
    ) -> Result<(), GatewayError> {
        self.call_unit(
            Method::DELETE,
            &format!("{}/{}", Self::credential_records(version), exchange_id),
            None,
        )
        .await
    }

    async fn revoke_credential(
        &self,
        rev_reg_id: &str,
        cred_rev_id: &str,
        connection_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        let body = json!({
            "rev_reg_id": rev_reg_id,
            "cred_rev_id": cred_rev_id,
            "publish": true,
            "notify": connection_id.is_some(),
            "connection_id": connection_id,
        });
        self.call_unit(Method::POST, "/revocation/revoke", Some(&body)).await
    }

    async fn is_credential_revoked(&self, referent: &str) -> Result<bool, GatewayError> {
        let result: RevokedResult = self
            .call(Method::GET, &format!("/credential/revoked/{}", referent), None)
            .await?;
        Ok(result.revoked)
    }

    async fn fetch_credential_revocation_ids(&self, referent: &str) -> Result<RevocationIds, GatewayError> {
        let value: Value = self
            .call(Method::GET, &format!("/credential/{}", referent), None)
            .await?;
        Ok(RevocationIds {
            rev_reg_id: value.get("rev_reg_id").and_then(Value::as_str).map(str::to_string),
            cred_rev_id: value.get("cred_rev_id").and_then(Value::as_str).map(str::to_string),
        })
    }

    async fn fetch_schema(&self, schema_id: &str) -> Result<LedgerSchema, GatewayError> {
        let envelope: SchemaEnvelope = self
            .call(Method::GET, &format!("/schemas/{}", schema_id), None)
            .await?;
        Ok(LedgerSchema {
            schema_id: envelope.schema.id,
            name: envelope.schema.name,
            version: envelope.schema.version,
            attributes: envelope.schema.attr_names,
        })
    }

    async fn credential_definitions_for_schema(&self, schema_id: &str) -> Result<Vec<String>, GatewayError> {
        let path = "/credential-definitions/created";
        let builder = self
            .request(Method::GET, path)
            .query(&[("schema_id", schema_id)]);
        let created: CreatedCredDefs = self
            .send(builder, path)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("{}: {}", path, e)))?;
        Ok(created.credential_definition_ids)
    }
}

#[async_trait]
impl ProofGateway for AgentAdminClient {
    async fn send_presentation_request(
        &self,
        version: ExchangeVersion,
        connection_id: &str,
        request: &Value,
    ) -> Result<ExchangeHandle, GatewayError> {
        let (path, body) = match version {
            ExchangeVersion::V1 => (
                "/present-proof/send-request",
                json!({ "connection_id": connection_id, "proof_request": request }),
            ),
            ExchangeVersion::V2 => (
                "/present-proof-2.0/send-request",
                json!({ "connection_id": connection_id, "presentation_request": { "indy": request } }),
            ),
        };
        let value: Value = self.call(Method::POST, path, Some(&body)).await?;
        Self::exchange_handle(value)
    }

    async fn send_presentation_proposal(
        &self,
        connection_id: &str,
        proposal: &Value,
    ) -> Result<ExchangeHandle, GatewayError> {
        let body = json!({ "connection_id": connection_id, "presentation_proposal": proposal });
        let value: Value = self
            .call(Method::POST, "/present-proof/send-proposal", Some(&body))
            .await?;
        Self::exchange_handle(value)
    }

    async fn send_presentation(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
        material: &Value,
    ) -> Result<(), GatewayError> {
        let body = match version {
            ExchangeVersion::V1 => material.clone(),
            ExchangeVersion::V2 => json!({ "indy": material }),
        };
        self.call_unit(
            Method::POST,
            &format!("{}/{}/send-presentation", Self::presentation_records(version), exchange_id),
            Some(&body),
        )
        .await
    }

    async fn send_presentation_problem_report(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
        description: &str,
    ) -> Result<(), GatewayError> {
        self.call_unit(
            Method::POST,
            &format!("{}/{}/problem-report", Self::presentation_records(version), exchange_id),
            Some(&json!({ "description": description })),
        )
        .await
    }

    async fn remove_presentation_exchange(
        &self,
        version: ExchangeVersion,
        exchange_id: &str,
    ) -> Result<(), GatewayError> {
        self.call_unit(
            Method::DELETE,
            &format!("{}/{}", Self::presentation_records(version), exchange_id),
            None,
        )
        .await
    }
}
