// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Activity Tracker Application Service
//!
//! Subscribes to domain events and projects them into the task/activity ledger. Every
//! producer is an upsert on (link id, type, role): an existing row is transitioned, a
//! missing one is created already reflecting the final fact, so replays and missed
//! earlier events converge on the same record.
//!
//! New pending rows publish `task_added`, pending rows that complete publish
//! `task_completed`. The tracker ignores both on the way back in.

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::activity::{
    Activity, ActivityFilter, ActivityKey, ActivityRole, ActivityState, ActivityType,
};
use crate::domain::agent_config::ActivityConfig;
use crate::domain::credential::{CredentialExchange, ExchangeRole};
use crate::domain::events::DomainEvent;
use crate::domain::partner::{Partner, PartnerId};
use crate::domain::proof::{PresentationExchangeState, ProofExchange, ProofRole};
use crate::domain::repository::{ActivityRepository, RepositoryError};
use crate::infrastructure::event_bus::{EventBus, EventBusError};

fn presentation_role(exchange: &ProofExchange) -> ActivityRole {
    match exchange.role {
        ProofRole::Prover => ActivityRole::PresentationExchangeProver,
        ProofRole::Verifier => ActivityRole::PresentationExchangeVerifier,
    }
}

fn presentation_state(exchange: &ProofExchange) -> ActivityState {
    use PresentationExchangeState::*;
    match exchange.state {
        Verified | PresentationAcked | Done => ActivityState::PresentationExchangeAccepted,
        RequestSent | PresentationSent => ActivityState::PresentationExchangeSent,
        RequestReceived | PresentationReceived => ActivityState::PresentationExchangeReceived,
        Declined | Problem => ActivityState::PresentationExchangeDeclined,
        ProposalSent | ProposalReceived => match exchange.role {
            ProofRole::Verifier => ActivityState::PresentationExchangeReceived,
            ProofRole::Prover => ActivityState::PresentationExchangeSent,
        },
    }
}

fn credential_role(exchange: &CredentialExchange) -> ActivityRole {
    match exchange.role {
        ExchangeRole::Holder => ActivityRole::CredentialExchangeHolder,
        ExchangeRole::Issuer => ActivityRole::CredentialExchangeIssuer,
    }
}

fn partner_key(partner: &Partner, role: ActivityRole) -> ActivityKey {
    ActivityKey::new(partner.id.to_string(), ActivityType::ConnectionRequest, role)
}

fn presentation_key(exchange: &ProofExchange) -> ActivityKey {
    ActivityKey::new(
        exchange.id.to_string(),
        ActivityType::PresentationExchange,
        presentation_role(exchange),
    )
}

fn credential_key(exchange: &CredentialExchange) -> ActivityKey {
    ActivityKey::new(
        exchange.id.to_string(),
        ActivityType::CredentialExchange,
        credential_role(exchange),
    )
}

pub struct ActivityTracker {
    activities: Arc<dyn ActivityRepository>,
    event_bus: Arc<EventBus>,
    config: ActivityConfig,
}

impl ActivityTracker {
    pub fn new(activities: Arc<dyn ActivityRepository>, event_bus: Arc<EventBus>, config: ActivityConfig) -> Self {
        Self {
            activities,
            event_bus,
            config,
        }
    }

    /// Tasks, activities or both, newest first.
    pub async fn list(&self, filter: &ActivityFilter) -> Result<Vec<Activity>, RepositoryError> {
        self.activities.list(filter).await
    }

    pub async fn handle(&self, event: &DomainEvent) -> Result<(), RepositoryError> {
        match event {
            DomainEvent::PartnerRequestReceived { partner, .. } => self.partner_request_received(partner).await,
            DomainEvent::PartnerRequestCompleted { partner, .. } => self.partner_request_completed(partner).await,
            DomainEvent::PartnerAdded { partner, .. } => self.partner_added(partner).await,
            DomainEvent::PartnerAccepted { partner, .. } => self.partner_accepted(partner).await,
            DomainEvent::PartnerRemoved { partner, .. } => self.delete_partner_activities(partner).await,
            DomainEvent::PresentationRequestReceived { exchange, .. }
            | DomainEvent::PresentationRequestSent { exchange, .. } => self.add_presentation_task(exchange).await,
            DomainEvent::PresentationRequestCompleted { exchange, .. } => {
                self.complete_presentation_task(exchange).await
            }
            DomainEvent::PresentationRequestDeclined { exchange, .. } => {
                self.decline_presentation_task(exchange).await
            }
            DomainEvent::PresentationRequestDeleted { exchange, .. } => self.delete_presentation_task(exchange).await,
            DomainEvent::CredentialOffered { exchange, .. }
            | DomainEvent::CredentialProposalReceived { exchange, .. } => self.add_credential_task(exchange).await,
            DomainEvent::CredentialAdded { exchange, .. } | DomainEvent::CredentialAccepted { exchange, .. } => {
                self.complete_credential_task(exchange).await
            }
            DomainEvent::CredentialProblem { exchange, .. } => self.decline_credential_task(exchange).await,
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    pub async fn partner_request_received(&self, partner: &Partner) -> Result<(), RepositoryError> {
        let key = partner_key(partner, ActivityRole::ConnectionRequestRecipient);
        if self.activities.find_by_key(&key).await?.is_some() {
            return Ok(());
        }
        let pending = self.config.connection_task_states.contains(&partner.state);
        let activity = Activity::new(key, Some(partner.id), ActivityState::ConnectionRequestReceived, !pending);
        self.activities.save(&activity).await?;
        if pending {
            self.task_added(activity);
        }
        Ok(())
    }

    pub async fn partner_request_completed(&self, partner: &Partner) -> Result<(), RepositoryError> {
        let key = partner_key(partner, ActivityRole::ConnectionRequestRecipient);
        self.complete_or_create(key, Some(partner.id), ActivityState::ConnectionRequestAccepted)
            .await
    }

    pub async fn partner_added(&self, partner: &Partner) -> Result<(), RepositoryError> {
        let key = partner_key(partner, ActivityRole::ConnectionRequestSender);
        if self.activities.find_by_key(&key).await?.is_none() {
            let activity = Activity::new(key, Some(partner.id), ActivityState::ConnectionRequestSent, true);
            self.activities.save(&activity).await?;
        }
        Ok(())
    }

    pub async fn partner_accepted(&self, partner: &Partner) -> Result<(), RepositoryError> {
        let key = partner_key(partner, ActivityRole::ConnectionRequestSender);
        self.complete_or_create(key, Some(partner.id), ActivityState::ConnectionRequestAccepted)
            .await
    }

    pub async fn delete_partner_activities(&self, partner: &Partner) -> Result<(), RepositoryError> {
        let removed = self.activities.delete_by_partner(partner.id).await?;
        debug!(partner_id = %partner.id, removed, "Deleted partner activities");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Presentations
    // ------------------------------------------------------------------------

    pub async fn add_presentation_task(&self, exchange: &ProofExchange) -> Result<(), RepositoryError> {
        if exchange.partner_id.is_none() {
            return Ok(());
        }
        let key = presentation_key(exchange);
        if self.activities.find_by_key(&key).await?.is_some() {
            return Ok(());
        }
        let pending = self.config.presentation_task_states.contains(&exchange.state);
        let activity = Activity::new(key, exchange.partner_id, presentation_state(exchange), !pending);
        self.activities.save(&activity).await?;
        if pending {
            self.task_added(activity);
        }
        Ok(())
    }

    pub async fn complete_presentation_task(&self, exchange: &ProofExchange) -> Result<(), RepositoryError> {
        if exchange.partner_id.is_none() {
            return Ok(());
        }
        let key = presentation_key(exchange);
        self.complete_or_create(key, exchange.partner_id, ActivityState::PresentationExchangeAccepted)
            .await
    }

    pub async fn decline_presentation_task(&self, exchange: &ProofExchange) -> Result<(), RepositoryError> {
        self.finish_existing(presentation_key(exchange), ActivityState::PresentationExchangeDeclined)
            .await
    }

    pub async fn delete_presentation_task(&self, exchange: &ProofExchange) -> Result<(), RepositoryError> {
        if let Some(activity) = self.activities.find_by_key(&presentation_key(exchange)).await? {
            self.activities.delete(activity.id).await?;
            if !activity.completed {
                self.task_completed(activity);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------------

    pub async fn add_credential_task(&self, exchange: &CredentialExchange) -> Result<(), RepositoryError> {
        let key = credential_key(exchange);
        if self.activities.find_by_key(&key).await?.is_some() {
            return Ok(());
        }
        let activity = Activity::new(key, exchange.partner_id, ActivityState::CredentialExchangeReceived, false);
        self.activities.save(&activity).await?;
        self.task_added(activity);
        Ok(())
    }

    pub async fn complete_credential_task(&self, exchange: &CredentialExchange) -> Result<(), RepositoryError> {
        self.complete_or_create(credential_key(exchange), exchange.partner_id, ActivityState::CredentialExchangeAccepted)
            .await
    }

    pub async fn decline_credential_task(&self, exchange: &CredentialExchange) -> Result<(), RepositoryError> {
        self.finish_existing(credential_key(exchange), ActivityState::CredentialExchangeDeclined)
            .await
    }

    // ------------------------------------------------------------------------
    // Shared upserts
    // ------------------------------------------------------------------------

    async fn complete_or_create(
        &self,
        key: ActivityKey,
        partner_id: Option<PartnerId>,
        state: ActivityState,
    ) -> Result<(), RepositoryError> {
        match self.activities.find_by_key(&key).await? {
            Some(mut activity) => {
                let was_pending = !activity.completed;
                if activity.transition(state, true) {
                    self.activities.save(&activity).await?;
                    if was_pending {
                        self.task_completed(activity);
                    }
                }
            }
            None => {
                let activity = Activity::new(key, partner_id, state, true);
                self.activities.save(&activity).await?;
            }
        }
        Ok(())
    }

    async fn finish_existing(&self, key: ActivityKey, state: ActivityState) -> Result<(), RepositoryError> {
        if let Some(mut activity) = self.activities.find_by_key(&key).await? {
            let was_pending = !activity.completed;
            if activity.transition(state, true) {
                self.activities.save(&activity).await?;
                if was_pending {
                    self.task_completed(activity);
                }
            }
        }
        Ok(())
    }

    fn task_added(&self, activity: Activity) {
        self.event_bus.publish(DomainEvent::TaskAdded {
            activity,
            occurred_at: Utc::now(),
        });
    }

    fn task_completed(&self, activity: Activity) {
        self.event_bus.publish(DomainEvent::TaskCompleted {
            activity,
            occurred_at: Utc::now(),
        });
    }

    /// Start the background projection task. Runs until the event bus closes.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!("Starting activity tracker background task");

        tokio::spawn(async move {
            let mut receiver = self.event_bus.subscribe();
            let mut events_processed = 0u64;
            let mut errors_encountered = 0u64;

            loop {
                match receiver.recv().await {
                    Ok(event) if event.is_task_event() => continue,
                    Ok(event) => {
                        events_processed += 1;
                        if let Err(e) = self.handle(&event).await {
                            errors_encountered += 1;
                            error!(
                                event_type = event.event_type(),
                                error = %e,
                                "Failed to project event into the activity ledger"
                            );
                            if errors_encountered % 10 == 0 {
                                warn!("Activity projection has failed {} times", errors_encountered);
                            }
                        }
                    }
                    Err(EventBusError::Closed) => {
                        info!("Event bus closed, shutting down activity tracker");
                        break;
                    }
                    Err(EventBusError::Lagged(n)) => {
                        warn!("Activity tracker lagged by {} events, ledger may be incomplete", n);
                    }
                    Err(e) => {
                        error!(error = ?e, "Unexpected error receiving event from bus");
                    }
                }
            }

            info!(
                "Activity tracker shut down (processed {} events, {} errors)",
                events_processed, errors_encountered
            );
        })
    }
}
