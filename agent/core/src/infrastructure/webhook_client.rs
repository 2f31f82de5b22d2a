// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Outbound Webhook Client
//!
//! POSTs a webhook envelope to one subscriber, with basic auth when credentials are
//! configured and a bounded timeout so a slow subscriber cannot stall the dispatcher.

use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::domain::webhook::{RegisteredWebhook, WebhookEnvelope};

#[derive(Debug, Error)]
pub enum WebhookDeliveryError {
    #[error("webhook {url} unreachable: {reason}")]
    Transport { url: String, reason: String },

    #[error("webhook {url} answered {status}")]
    Status { url: String, status: u16 },
}

#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub async fn deliver(
        &self,
        hook: &RegisteredWebhook,
        envelope: &WebhookEnvelope,
    ) -> Result<(), WebhookDeliveryError> {
        let mut request = self.client.post(&hook.url).json(envelope);
        if let Some(credentials) = &hook.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request.send().await.map_err(|e| WebhookDeliveryError::Transport {
            url: hook.url.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebhookDeliveryError::Status {
                url: hook.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::webhook::BasicCredentials;
    use mockito::Matcher;
    use serde_json::json;

    fn envelope() -> WebhookEnvelope {
        WebhookEnvelope {
            event_type: "partner_added".into(),
            payload: json!({ "partner": { "label": "Bob" } }),
            sent: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_delivers_envelope_with_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .match_body(Matcher::PartialJson(json!({
                "type": "partner_added",
                "sent": 1_700_000_000_000i64
            })))
            .with_status(204)
            .create_async()
            .await;

        let hook = RegisteredWebhook::new(
            &format!("{}/hook", server.url()),
            Some(BasicCredentials {
                username: "user".into(),
                password: "pass".into(),
            }),
        )
        .unwrap();

        WebhookClient::new(Duration::from_secs(2))
            .unwrap()
            .deliver(&hook, &envelope())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_authorization_without_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .create_async()
            .await;

        let hook = RegisteredWebhook::new(&format!("{}/hook", server.url()), None).unwrap();
        WebhookClient::new(Duration::from_secs(2))
            .unwrap()
            .deliver(&hook, &envelope())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/hook").with_status(503).create_async().await;

        let hook = RegisteredWebhook::new(&format!("{}/hook", server.url()), None).unwrap();
        let result = WebhookClient::new(Duration::from_secs(2))
            .unwrap()
            .deliver(&hook, &envelope())
            .await;

        assert!(matches!(result, Err(WebhookDeliveryError::Status { status: 503, .. })));
    }
}
