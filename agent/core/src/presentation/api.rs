// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP API
//!
//! Two audiences share one router:
//!
//! - the external agent, which POSTs every state change to `/webhooks/topic/{topic}` and
//!   always gets `200` back so it never retries;
//! - the local UI and operators, which drive the management API under `/api`.
//!
//! Application errors map to status codes in [`ApiError`]: an unreachable agent is `503`,
//! a missing partner or exchange `404`, an action that does not fit the current state
//! `409`.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::websocket::events_handler;
use crate::application::{
    ActivityTracker, ConnectionReconciler, EventDispatcher, ExchangeError, HolderReconciler, IssuerReconciler,
    NotificationService, ProofReconciler, WebhookRegistry, WebhookRegistryError,
};
use crate::domain::activity::{ActivityFilter, ActivityType};
use crate::domain::credential::{CredentialExchangeId, CredentialPayload, CredentialType};
use crate::domain::exchange::ExchangeVersion;
use crate::domain::partner::PartnerId;
use crate::domain::proof::ProofExchangeId;
use crate::domain::repository::RepositoryError;
use crate::domain::webhook::{BasicCredentials, RegisteredWebhook, WebhookId};

pub struct AppState {
    pub dispatcher: Arc<EventDispatcher>,
    pub connections: Arc<ConnectionReconciler>,
    pub holder: Arc<HolderReconciler>,
    pub issuer: Arc<IssuerReconciler>,
    pub proofs: Arc<ProofReconciler>,
    pub activities: Arc<ActivityTracker>,
    pub webhooks: Arc<WebhookRegistry>,
    pub notifications: Arc<NotificationService>,
    pub started_at: Instant,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhooks/topic/{topic}", post(agent_webhook))
        .route("/events", get(events_handler))
        // Partners
        .route("/api/partners", get(list_partners))
        .route("/api/partners/invitations", post(create_invitation))
        .route("/api/partners/receive-invitation", post(receive_invitation))
        .route("/api/partners/{id}", get(get_partner).delete(remove_partner))
        .route("/api/partners/{id}/accept", post(accept_partner))
        // Holder wallet
        .route("/api/wallet/credentials", get(list_wallet))
        .route("/api/wallet/credentials/proposals", post(send_credential_proposal))
        .route("/api/wallet/credentials/{id}", get(get_wallet_credential).delete(delete_wallet_credential))
        .route("/api/wallet/credentials/{id}/accept", post(accept_offer))
        .route("/api/wallet/credentials/{id}/decline", post(decline_offer))
        .route("/api/wallet/credentials/{id}/toggle-visibility", post(toggle_visibility))
        // Issuer
        .route("/api/issuer/exchanges", get(list_issued).post(issue_credential))
        .route("/api/issuer/exchanges/{id}", delete(delete_issued))
        .route("/api/issuer/exchanges/{id}/accept-proposal", post(accept_proposal))
        .route("/api/issuer/exchanges/{id}/decline-proposal", post(decline_proposal))
        .route("/api/issuer/exchanges/{id}/revoke", post(revoke_credential))
        .route("/api/issuer/exchanges/{id}/reissue", post(reissue_credential))
        // Proofs
        .route("/api/proofs", get(list_proofs))
        .route("/api/proofs/requests", post(send_presentation_request))
        .route("/api/proofs/proposals", post(send_presentation_proposal))
        .route("/api/proofs/{id}", get(get_proof).delete(delete_proof))
        .route("/api/proofs/{id}/decline", post(decline_presentation_request))
        // Activities and webhooks
        .route("/api/activities", get(list_activities))
        .route("/api/webhooks", get(list_webhooks).post(register_webhook))
        .route("/api/webhooks/{id}", put(update_webhook).delete(delete_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ExchangeError> for ApiError {
    fn from(err: ExchangeError) -> Self {
        let status = match &err {
            ExchangeError::NetworkUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ExchangeError::NotFound(_) | ExchangeError::PartnerNotFound(_) => StatusCode::NOT_FOUND,
            ExchangeError::InvalidState(_) => StatusCode::CONFLICT,
            ExchangeError::Gateway(_) | ExchangeError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<WebhookRegistryError> for ApiError {
    fn from(err: WebhookRegistryError) -> Self {
        let status = match &err {
            WebhookRegistryError::Invalid(_) => StatusCode::BAD_REQUEST,
            WebhookRegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            WebhookRegistryError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Decline endpoints accept an empty body.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))
}

// ============================================================================
// Health and agent intake
// ============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn agent_webhook(State(state): State<Arc<AppState>>, Path(topic): Path<String>, body: Bytes) -> StatusCode {
    state.dispatcher.dispatch(&topic, &body).await;
    StatusCode::OK
}

// ============================================================================
// Partners
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CreateInvitationRequest {
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveInvitationRequest {
    pub invitation: Value,
    #[serde(default)]
    pub alias: Option<String>,
}

async fn list_partners(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.connections.list_partners().await?))
}

async fn get_partner(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.connections.get_partner(PartnerId(id)).await?))
}

async fn create_invitation(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<impl IntoResponse> {
    let request: CreateInvitationRequest = optional_body(&body)?;
    let (partner, invitation) = state.connections.create_invitation(request.alias).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "partner": partner,
            "invitation_url": invitation.invitation_url,
            "invitation": invitation.invitation,
        })),
    ))
}

async fn receive_invitation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReceiveInvitationRequest>,
) -> ApiResult<impl IntoResponse> {
    let partner = state
        .connections
        .receive_invitation(&request.invitation, request.alias)
        .await?;
    Ok((StatusCode::CREATED, Json(partner)))
}

async fn accept_partner(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.connections.accept_connection(PartnerId(id)).await?))
}

async fn remove_partner(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.connections.remove_partner(PartnerId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Holder wallet
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CredentialProposalRequest {
    pub partner_id: PartnerId,
    #[serde(default)]
    pub credential_type: CredentialType,
    #[serde(default)]
    pub schema_id: Option<String>,
    #[serde(default)]
    pub cred_def_id: Option<String>,
    pub proposal: CredentialPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeclineRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

async fn list_wallet(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.holder.list().await?))
}

async fn get_wallet_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.holder.get(CredentialExchangeId(id)).await?))
}

async fn send_credential_proposal(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CredentialProposalRequest>,
) -> ApiResult<impl IntoResponse> {
    let exchange = state
        .holder
        .send_proposal(
            request.partner_id,
            request.credential_type,
            request.schema_id,
            request.cred_def_id,
            request.proposal,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(exchange)))
}

async fn accept_offer(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.holder.accept_offer(CredentialExchangeId(id)).await?))
}

async fn decline_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: DeclineRequest = optional_body(&body)?;
    Ok(Json(state.holder.decline_offer(CredentialExchangeId(id), request.reason).await?))
}

async fn toggle_visibility(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.holder.toggle_visibility(CredentialExchangeId(id)).await?))
}

async fn delete_wallet_credential(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.holder.delete(CredentialExchangeId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Issuer
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IssueCredentialRequest {
    pub partner_id: PartnerId,
    #[serde(default)]
    pub credential_type: CredentialType,
    pub cred_def_id: String,
    pub offer: CredentialPayload,
}

async fn list_issued(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.issuer.list().await?))
}

async fn issue_credential(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IssueCredentialRequest>,
) -> ApiResult<impl IntoResponse> {
    let exchange = state
        .issuer
        .issue_credential(
            request.partner_id,
            request.credential_type,
            request.cred_def_id,
            request.offer,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(exchange)))
}

async fn accept_proposal(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.issuer.accept_proposal(CredentialExchangeId(id)).await?))
}

async fn decline_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: DeclineRequest = optional_body(&body)?;
    Ok(Json(
        state
            .issuer
            .decline_proposal(CredentialExchangeId(id), request.reason)
            .await?,
    ))
}

async fn revoke_credential(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.issuer.revoke_credential(CredentialExchangeId(id)).await?))
}

async fn reissue_credential(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.issuer.reissue_credential(CredentialExchangeId(id)).await?))
}

async fn delete_issued(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.issuer.delete(CredentialExchangeId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Proofs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PresentationRequestBody {
    pub partner_id: PartnerId,
    #[serde(default)]
    pub version: ExchangeVersion,
    pub request: Value,
    #[serde(default)]
    pub template_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct PresentationProposalBody {
    pub partner_id: PartnerId,
    pub proposal: Value,
    /// Presented once the partner answers with a matching request.
    pub material: Value,
}

async fn list_proofs(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.proofs.list().await?))
}

async fn get_proof(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.proofs.get(ProofExchangeId(id)).await?))
}

async fn send_presentation_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PresentationRequestBody>,
) -> ApiResult<impl IntoResponse> {
    let exchange = state
        .proofs
        .send_presentation_request(body.partner_id, body.version, body.request, body.template_id)
        .await?;
    Ok((StatusCode::CREATED, Json(exchange)))
}

async fn send_presentation_proposal(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PresentationProposalBody>,
) -> ApiResult<impl IntoResponse> {
    let exchange = state
        .proofs
        .send_presentation_proposal(body.partner_id, body.proposal, body.material)
        .await?;
    Ok((StatusCode::CREATED, Json(exchange)))
}

async fn decline_presentation_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: DeclineRequest = optional_body(&body)?;
    Ok(Json(
        state
            .proofs
            .decline_presentation_request(ProofExchangeId(id), request.reason)
            .await?,
    ))
}

async fn delete_proof(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.proofs.delete_exchange(ProofExchangeId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Activities
// ============================================================================

/// `?task=true` lists open tasks, `?task=false` the completed activity log.
#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    #[serde(default)]
    pub task: Option<bool>,
    #[serde(default, rename = "type")]
    pub activity_type: Option<ActivityType>,
}

async fn list_activities(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = ActivityFilter {
        completed: query.task.map(|task| !task),
        activity_type: query.activity_type,
    };
    Ok(Json(state.activities.list(&filter).await?))
}

// ============================================================================
// Webhooks
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub url: String,
    #[serde(default)]
    pub credentials: Option<BasicCredentials>,
}

/// Registered webhook as shown to operators. The password never leaves the agent.
#[derive(Debug, Serialize)]
pub struct WebhookView {
    pub id: WebhookId,
    pub url: String,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RegisteredWebhook> for WebhookView {
    fn from(hook: RegisteredWebhook) -> Self {
        Self {
            id: hook.id,
            url: hook.url,
            username: hook.credentials.map(|c| c.username),
            created_at: hook.created_at,
            updated_at: hook.updated_at,
        }
    }
}

async fn list_webhooks(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let hooks: Vec<WebhookView> = state.webhooks.list().await?.into_iter().map(Into::into).collect();
    Ok(Json(hooks))
}

async fn register_webhook(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WebhookRequest>,
) -> ApiResult<impl IntoResponse> {
    let hook = state.webhooks.register(&request.url, request.credentials).await?;
    Ok((StatusCode::CREATED, Json(WebhookView::from(hook))))
}

async fn update_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<WebhookRequest>,
) -> ApiResult<impl IntoResponse> {
    let hook = state
        .webhooks
        .update(WebhookId(id), &request.url, request.credentials)
        .await?;
    Ok(Json(WebhookView::from(hook)))
}

async fn delete_webhook(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.webhooks.delete(WebhookId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
