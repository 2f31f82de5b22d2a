// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! External Webhook Dispatcher
//!
//! Every domain event goes to every registered subscriber as
//! `{type, payload, sent}`. Each delivery runs on its own task with the client's bounded
//! timeout; a failed delivery is logged and counted, never retried, and never reaches the
//! code that published the event.
//!
//! [`WebhookRegistry`] is the management surface for subscribers.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::events::DomainEvent;
use crate::domain::repository::{RepositoryError, WebhookRepository};
use crate::domain::webhook::{BasicCredentials, RegisteredWebhook, WebhookEnvelope, WebhookError, WebhookId};
use crate::infrastructure::event_bus::{EventBus, EventBusError};
use crate::infrastructure::webhook_client::WebhookClient;

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Error)]
pub enum WebhookRegistryError {
    #[error(transparent)]
    Invalid(#[from] WebhookError),

    #[error("webhook {0} not found")]
    NotFound(WebhookId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct WebhookRegistry {
    webhooks: Arc<dyn WebhookRepository>,
}

impl WebhookRegistry {
    pub fn new(webhooks: Arc<dyn WebhookRepository>) -> Self {
        Self { webhooks }
    }

    pub async fn register(
        &self,
        url: &str,
        credentials: Option<BasicCredentials>,
    ) -> Result<RegisteredWebhook, WebhookRegistryError> {
        let hook = RegisteredWebhook::new(url, credentials)?;
        self.webhooks.save(&hook).await?;
        info!(webhook_id = %hook.id, url = %hook.url, "Registered webhook");
        Ok(hook)
    }

    pub async fn update(
        &self,
        id: WebhookId,
        url: &str,
        credentials: Option<BasicCredentials>,
    ) -> Result<RegisteredWebhook, WebhookRegistryError> {
        let mut hook = self
            .webhooks
            .find_by_id(id)
            .await?
            .ok_or(WebhookRegistryError::NotFound(id))?;
        hook.update(url, credentials)?;
        self.webhooks.save(&hook).await?;
        Ok(hook)
    }

    pub async fn delete(&self, id: WebhookId) -> Result<(), WebhookRegistryError> {
        if self.webhooks.find_by_id(id).await?.is_none() {
            return Err(WebhookRegistryError::NotFound(id));
        }
        self.webhooks.delete(id).await?;
        info!(webhook_id = %id, "Deleted webhook");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<RegisteredWebhook>, WebhookRegistryError> {
        Ok(self.webhooks.list_all().await?)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct WebhookDispatcher {
    webhooks: Arc<dyn WebhookRepository>,
    client: WebhookClient,
    event_bus: Arc<EventBus>,
}

impl WebhookDispatcher {
    pub fn new(webhooks: Arc<dyn WebhookRepository>, client: WebhookClient, event_bus: Arc<EventBus>) -> Self {
        Self {
            webhooks,
            client,
            event_bus,
        }
    }

    pub fn envelope(event: &DomainEvent) -> WebhookEnvelope {
        WebhookEnvelope {
            event_type: event.event_type().to_string(),
            payload: event.payload(),
            sent: Utc::now().timestamp_millis(),
        }
    }

    /// Start one delivery per subscriber. The returned handles finish once each delivery
    /// has succeeded or been given up.
    pub async fn dispatch(&self, event: &DomainEvent) -> Result<Vec<JoinHandle<()>>, RepositoryError> {
        let hooks = self.webhooks.list_all().await?;
        if hooks.is_empty() {
            return Ok(Vec::new());
        }

        let envelope = Arc::new(Self::envelope(event));
        debug!(event_type = %envelope.event_type, subscribers = hooks.len(), "Dispatching webhooks");

        Ok(hooks
            .into_iter()
            .map(|hook| {
                let client = self.client.clone();
                let envelope = envelope.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.deliver(&hook, &envelope).await {
                        metrics::counter!("partner_agent_webhook_failures_total").increment(1);
                        warn!(
                            webhook_id = %hook.id,
                            event_type = %envelope.event_type,
                            error = %e,
                            "Webhook delivery failed"
                        );
                    }
                })
            })
            .collect())
    }

    /// Start the background dispatch task. Runs until the event bus closes.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!("Starting webhook dispatcher background task");

        tokio::spawn(async move {
            let mut receiver = self.event_bus.subscribe();
            let mut events_processed = 0u64;
            let mut errors_encountered = 0u64;

            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        events_processed += 1;
                        if let Err(e) = self.dispatch(&event).await {
                            errors_encountered += 1;
                            error!(
                                event_type = event.event_type(),
                                error = %e,
                                "Failed to load webhook subscribers"
                            );
                        }
                    }
                    Err(EventBusError::Closed) => {
                        info!("Event bus closed, shutting down webhook dispatcher");
                        break;
                    }
                    Err(EventBusError::Lagged(n)) => {
                        warn!("Webhook dispatcher lagged by {} events, subscribers missed them", n);
                    }
                    Err(e) => {
                        error!(error = ?e, "Unexpected error receiving event from bus");
                    }
                }
            }

            info!(
                "Webhook dispatcher shut down (processed {} events, {} errors)",
                events_processed, errors_encountered
            );
        })
    }
}
