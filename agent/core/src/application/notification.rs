// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Notification Fan-out Application Service
//!
//! [`NotificationService`] owns delivery to connected UI sessions: broadcast when at least
//! one channel is live, otherwise park the message in the shared durable queue. A newly
//! connected channel receives the whole queue in insertion order before anything else.
//!
//! [`NotificationFanout`] subscribes to the event bus and renders domain events into
//! [`PushMessage`]s with a snapshot of the partner they concern.
//!
//! The queue is one mailbox for all sessions: the agent has a single operator, and any
//! session that reconnects after an outage sees every message queued meanwhile.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::agent_config::ActivityConfig;
use crate::domain::events::DomainEvent;
use crate::domain::notification::{PushMessage, PushMessageType};
use crate::domain::partner::PartnerId;
use crate::domain::proof::ProofRole;
use crate::domain::repository::{NotificationQueueRepository, PartnerRepository, RepositoryError};
use crate::infrastructure::channel_registry::{ChannelId, ChannelRegistry};
use crate::infrastructure::event_bus::{EventBus, EventBusError};

// ============================================================================
// Delivery
// ============================================================================

pub struct NotificationService {
    registry: Arc<ChannelRegistry>,
    queue: Arc<dyn NotificationQueueRepository>,
    // Serializes send against the connect-time drain so queued messages stay ahead of
    // anything broadcast while a session is attaching.
    delivery: Mutex<()>,
}

impl NotificationService {
    pub fn new(registry: Arc<ChannelRegistry>, queue: Arc<dyn NotificationQueueRepository>) -> Self {
        Self {
            registry,
            queue,
            delivery: Mutex::new(()),
        }
    }

    /// Broadcast to every live channel or queue durably when there is none.
    pub async fn send(&self, message: PushMessage) -> Result<(), RepositoryError> {
        let _guard = self.delivery.lock().await;
        if self.registry.has_live() && self.registry.broadcast(&message) > 0 {
            return Ok(());
        }
        self.queue.enqueue(&message).await?;
        metrics::counter!("partner_agent_notifications_queued_total").increment(1);
        debug!(message_type = ?message.message_type, "No live push channel, message queued");
        Ok(())
    }

    /// Register a channel and flush the durable queue into it.
    pub async fn connect(&self) -> Result<(ChannelId, mpsc::UnboundedReceiver<PushMessage>), RepositoryError> {
        let _guard = self.delivery.lock().await;
        let (id, receiver) = self.registry.connect();
        let queued = self.queue.take_all().await?;
        if !queued.is_empty() {
            info!(channel_id = %id, count = queued.len(), "Flushing queued notifications");
        }
        for entry in queued {
            if !self.registry.send_to(id, entry.message) {
                warn!(channel_id = %id, "Push channel closed while flushing the queue");
                break;
            }
        }
        Ok((id, receiver))
    }

    pub fn disconnect(&self, id: ChannelId) -> bool {
        self.registry.disconnect(id)
    }

    pub fn prune_closed(&self) -> usize {
        self.registry.prune_closed()
    }

    pub async fn queued(&self) -> Result<usize, RepositoryError> {
        self.queue.count().await
    }
}

// ============================================================================
// Event subscriber
// ============================================================================

pub struct NotificationFanout {
    notifications: Arc<NotificationService>,
    partners: Arc<dyn PartnerRepository>,
    event_bus: Arc<EventBus>,
    config: ActivityConfig,
}

impl NotificationFanout {
    pub fn new(
        notifications: Arc<NotificationService>,
        partners: Arc<dyn PartnerRepository>,
        event_bus: Arc<EventBus>,
        config: ActivityConfig,
    ) -> Self {
        Self {
            notifications,
            partners,
            event_bus,
            config,
        }
    }

    async fn partner_snapshot(&self, partner_id: Option<PartnerId>) -> Result<Option<Value>, RepositoryError> {
        let Some(partner_id) = partner_id else {
            return Ok(None);
        };
        Ok(self
            .partners
            .find_by_id(partner_id)
            .await?
            .and_then(|partner| serde_json::to_value(partner).ok()))
    }

    /// The push message for `event`, if the UI is told about it at all.
    pub async fn render(&self, event: &DomainEvent) -> Result<Option<PushMessage>, RepositoryError> {
        use PushMessageType::*;

        let (message_type, id, payload, partner_id) = match event {
            DomainEvent::PartnerAdded { partner, .. }
            | DomainEvent::PartnerAccepted { partner, .. }
            | DomainEvent::PartnerRequestReceived { partner, .. }
            | DomainEvent::PartnerRequestCompleted { partner, .. }
            | DomainEvent::PartnerRemoved { partner, .. } => {
                let message_type = match event {
                    DomainEvent::PartnerAdded { .. } => OnPartnerAdded,
                    DomainEvent::PartnerAccepted { .. } => OnPartnerAccepted,
                    DomainEvent::PartnerRequestCompleted { .. } => OnPartnerRequestCompleted,
                    DomainEvent::PartnerRemoved { .. } => OnPartnerRemoved,
                    _ => {
                        // Only a request that needs a decision is announced.
                        if !self.config.connection_task_states.contains(&partner.state) {
                            return Ok(None);
                        }
                        OnPartnerRequestReceived
                    }
                };
                let snapshot = serde_json::to_value(partner).unwrap_or(Value::Null);
                return Ok(Some(
                    PushMessage::new(message_type, Some(partner.id.to_string()), Value::Null).with_partner(snapshot),
                ));
            }
            DomainEvent::CredentialOffered { exchange, .. }
            | DomainEvent::CredentialAdded { exchange, .. }
            | DomainEvent::CredentialProblem { exchange, .. }
            | DomainEvent::CredentialRevoked { exchange, .. } => {
                let message_type = match event {
                    DomainEvent::CredentialOffered { .. } => OnCredentialOffered,
                    DomainEvent::CredentialAdded { .. } => OnCredentialAdded,
                    DomainEvent::CredentialProblem { .. } => OnCredentialProblem,
                    _ => OnCredentialRevoked,
                };
                (message_type, exchange.id.to_string(), serde_json::to_value(exchange), exchange.partner_id)
            }
            DomainEvent::PresentationRequestReceived { exchange, .. }
            | DomainEvent::PresentationRequestSent { exchange, .. } => {
                if !self.config.presentation_task_states.contains(&exchange.state) {
                    return Ok(None);
                }
                let message_type = match event {
                    DomainEvent::PresentationRequestReceived { .. } => OnPresentationRequestReceived,
                    _ => OnPresentationRequestSent,
                };
                (message_type, exchange.id.to_string(), serde_json::to_value(exchange), exchange.partner_id)
            }
            DomainEvent::PresentationRequestCompleted { exchange, .. } => {
                let message_type = match exchange.role {
                    ProofRole::Prover => OnPresentationProved,
                    ProofRole::Verifier => OnPresentationVerified,
                };
                (message_type, exchange.id.to_string(), serde_json::to_value(exchange), exchange.partner_id)
            }
            DomainEvent::PresentationRequestDeclined { exchange, .. } => (
                OnPresentationRequestDeclined,
                exchange.id.to_string(),
                serde_json::to_value(exchange),
                exchange.partner_id,
            ),
            DomainEvent::PresentationRequestDeleted { exchange, .. } => (
                OnPresentationRequestDeleted,
                exchange.id.to_string(),
                serde_json::to_value(exchange),
                exchange.partner_id,
            ),
            DomainEvent::MessageReceived {
                partner_id,
                message_id,
                content,
                ..
            } => (
                OnMessageReceived,
                message_id.clone(),
                Ok(json!({ "message_id": message_id, "content": content })),
                Some(*partner_id),
            ),
            DomainEvent::TaskAdded { activity, .. } | DomainEvent::TaskCompleted { activity, .. } => {
                let message_type = if matches!(event, DomainEvent::TaskAdded { .. }) {
                    TaskAdded
                } else {
                    TaskCompleted
                };
                let payload = serde_json::to_value(activity)?;
                let mut message = PushMessage::new(message_type, Some(activity.id.0.to_string()), payload);
                if let Some(partner) = self.partner_snapshot(activity.partner_id).await? {
                    message = message.with_partner(partner);
                }
                return Ok(Some(message));
            }
            DomainEvent::CredentialProposalReceived { .. }
            | DomainEvent::CredentialIssued { .. }
            | DomainEvent::CredentialAccepted { .. } => return Ok(None),
        };

        // Exchange messages only make sense next to the partner they belong to.
        let Some(partner) = self.partner_snapshot(partner_id).await? else {
            debug!(event_type = event.event_type(), "No partner for push message, skipping");
            return Ok(None);
        };
        Ok(Some(PushMessage::new(message_type, Some(id), payload?).with_partner(partner)))
    }

    pub async fn handle(&self, event: &DomainEvent) -> Result<(), RepositoryError> {
        if let Some(message) = self.render(event).await? {
            self.notifications.send(message).await?;
        }
        Ok(())
    }

    /// Start the background fan-out task. Runs until the event bus closes.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!("Starting notification fan-out background task");

        tokio::spawn(async move {
            let mut receiver = self.event_bus.subscribe();
            let mut events_processed = 0u64;
            let mut errors_encountered = 0u64;

            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        events_processed += 1;
                        if let Err(e) = self.handle(&event).await {
                            errors_encountered += 1;
                            error!(
                                event_type = event.event_type(),
                                error = %e,
                                "Failed to deliver push notification"
                            );
                            if errors_encountered % 10 == 0 {
                                warn!("Push notification delivery has failed {} times", errors_encountered);
                            }
                        }
                    }
                    Err(EventBusError::Closed) => {
                        info!("Event bus closed, shutting down notification fan-out");
                        break;
                    }
                    Err(EventBusError::Lagged(n)) => {
                        warn!("Notification fan-out lagged by {} events, some notifications were lost", n);
                    }
                    Err(e) => {
                        error!(error = ?e, "Unexpected error receiving event from bus");
                    }
                }
            }

            info!(
                "Notification fan-out shut down (processed {} events, {} errors)",
                events_processed, errors_encountered
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::exchange::ExchangeVersion;
    use crate::domain::partner::{ConnectionState, Partner};
    use crate::domain::proof::{PresentationExchangeState, ProofExchange};
    use crate::infrastructure::repositories::{InMemoryNotificationQueue, InMemoryPartnerRepository};
    use chrono::Utc;

    fn service() -> (Arc<NotificationService>, Arc<InMemoryNotificationQueue>) {
        let queue = Arc::new(InMemoryNotificationQueue::new());
        (
            Arc::new(NotificationService::new(Arc::new(ChannelRegistry::new()), queue.clone())),
            queue,
        )
    }

    fn message(n: usize) -> PushMessage {
        PushMessage::new(PushMessageType::OnMessageReceived, Some(n.to_string()), Value::Null)
    }

    #[tokio::test]
    async fn test_queued_messages_flush_in_order_on_connect() {
        let (service, queue) = service();
        for n in 0..3 {
            service.send(message(n)).await.unwrap();
        }
        assert_eq!(queue.count().await.unwrap(), 3);

        let (_id, mut receiver) = service.connect().await.unwrap();

        for n in 0..3 {
            assert_eq!(receiver.recv().await.unwrap().id, Some(n.to_string()));
        }
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_live_channel_receives_directly() {
        let (service, queue) = service();
        let (_first, mut a) = service.connect().await.unwrap();
        let (_second, mut b) = service.connect().await.unwrap();

        service.send(message(7)).await.unwrap();

        assert_eq!(a.recv().await.unwrap().id.as_deref(), Some("7"));
        assert_eq!(b.recv().await.unwrap().id.as_deref(), Some("7"));
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_channel_falls_back_to_queue() {
        let (service, queue) = service();
        let (_id, receiver) = service.connect().await.unwrap();
        drop(receiver);

        service.send(message(1)).await.unwrap();

        assert_eq!(queue.count().await.unwrap(), 1);
        assert_eq!(service.prune_closed(), 1);
    }

    #[tokio::test]
    async fn test_presentation_completed_message_follows_role() {
        let (service, _queue) = service();
        let partners = Arc::new(InMemoryPartnerRepository::new());
        let partner = Partner::unsolicited("conn-1", ConnectionState::Active);
        partners.save(&partner).await.unwrap();
        let fanout = NotificationFanout::new(
            service,
            partners,
            Arc::new(EventBus::new(8)),
            ActivityConfig::default(),
        );

        let mut exchange = ProofExchange::new(
            ProofRole::Verifier,
            ExchangeVersion::V1,
            "px-1",
            PresentationExchangeState::Verified,
        );
        exchange.partner_id = Some(partner.id);

        let message = fanout
            .render(&DomainEvent::PresentationRequestCompleted {
                exchange,
                occurred_at: Utc::now(),
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(message.message_type, PushMessageType::OnPresentationVerified);
        assert_eq!(message.partner.unwrap()["connection_id"], "conn-1");
    }

    #[tokio::test]
    async fn test_request_without_decision_is_not_announced() {
        let (service, _queue) = service();
        let fanout = NotificationFanout::new(
            service,
            Arc::new(InMemoryPartnerRepository::new()),
            Arc::new(EventBus::new(8)),
            ActivityConfig::default(),
        );

        let announced = fanout
            .render(&DomainEvent::PartnerRequestReceived {
                partner: Partner::unsolicited("conn-1", ConnectionState::Request),
                occurred_at: Utc::now(),
            })
            .await
            .unwrap();
        let silent = fanout
            .render(&DomainEvent::PartnerRequestReceived {
                partner: Partner::unsolicited("conn-2", ConnectionState::Response),
                occurred_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(announced.unwrap().message_type, PushMessageType::OnPartnerRequestReceived);
        assert!(silent.is_none());
    }
}
