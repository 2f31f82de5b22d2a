// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registered Webhooks
//!
//! Third-party HTTP subscribers. Every subscriber receives every domain event; there is no
//! per-type filter.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Webhook subscription aggregate and the outbound envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(pub Uuid);

impl WebhookId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WebhookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("invalid webhook url '{0}': {1}")]
    InvalidUrl(String, String),

    #[error("webhook url must use http or https, got '{0}'")]
    UnsupportedScheme(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredWebhook {
    pub id: WebhookId,
    pub url: String,
    pub credentials: Option<BasicCredentials>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegisteredWebhook {
    pub fn new(url: &str, credentials: Option<BasicCredentials>) -> Result<Self, WebhookError> {
        let url = validate_url(url)?;
        let now = Utc::now();
        Ok(Self {
            id: WebhookId::new(),
            url,
            credentials,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update(&mut self, url: &str, credentials: Option<BasicCredentials>) -> Result<(), WebhookError> {
        self.url = validate_url(url)?;
        self.credentials = credentials;
        self.updated_at = Utc::now();
        Ok(())
    }
}

pub fn validate_url(raw: &str) -> Result<String, WebhookError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| WebhookError::InvalidUrl(raw.to_string(), e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        other => Err(WebhookError::UnsupportedScheme(other.to_string())),
    }
}

/// Body POSTed to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    /// Epoch milliseconds.
    pub sent: i64,
}
