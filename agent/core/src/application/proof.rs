// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Proof Reconciler
//!
//! Inbound presentation events take exactly one of four paths, checked in this order:
//!
//! 1. **acknowledgement**: verifier `verified`, prover `presentation_acked`/`done`.
//!    The only place revealed attributes are stored.
//! 2. **request**: prover `request_received`. Answered automatically when it follows a
//!    proposal we made ourselves.
//! 3. **problem**: the record carries an error message. Ends in `declined`.
//! 4. **default**: idempotent upsert by external exchange id.
//!
//! Rows are only created for events whose connection maps to a known partner; anything
//! else is dropped with a warning.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Presentation state machine driver and user proof operations

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::error::ExchangeError;
use crate::application::inbound::PresentationEvent;
use crate::domain::events::DomainEvent;
use crate::domain::exchange::{ExchangeVersion, Transition};
use crate::domain::gateway::ProofGateway;
use crate::domain::partner::PartnerId;
use crate::domain::proof::{
    PresentationExchangeState, ProofExchange, ProofExchangeId, ProofRole, RevealedAttributes,
};
use crate::domain::repository::{PartnerRepository, ProofExchangeRepository};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::key_lock::KeyedLocks;

pub struct ProofReconciler {
    proofs: Arc<dyn ProofExchangeRepository>,
    partners: Arc<dyn PartnerRepository>,
    gateway: Arc<dyn ProofGateway>,
    event_bus: Arc<EventBus>,
    locks: KeyedLocks,
    auto_present: bool,
}

impl ProofReconciler {
    pub fn new(
        proofs: Arc<dyn ProofExchangeRepository>,
        partners: Arc<dyn PartnerRepository>,
        gateway: Arc<dyn ProofGateway>,
        event_bus: Arc<EventBus>,
        auto_present: bool,
    ) -> Self {
        Self {
            proofs,
            partners,
            gateway,
            event_bus,
            locks: KeyedLocks::default(),
            auto_present,
        }
    }

    pub async fn handle(&self, event: PresentationEvent) -> Result<(), ExchangeError> {
        let _guard = self.locks.lock(&event.exchange_id).await;
        let existing = self.proofs.find_by_exchange_id(&event.exchange_id).await?;

        if event.is_acknowledgement() {
            self.on_acknowledgement(existing, &event).await
        } else if event.role == ProofRole::Prover && event.state == Some(PresentationExchangeState::RequestReceived) {
            self.on_request(existing, &event).await
        } else if event.error_msg.is_some() {
            self.on_problem(existing, &event).await
        } else {
            self.on_default(existing, &event).await
        }
    }

    /// New row for an inbound event, or `None` when the connection is not a known partner.
    async fn new_exchange(&self, event: &PresentationEvent, state: PresentationExchangeState) -> Result<Option<ProofExchange>, ExchangeError> {
        let partner = match event.connection_id.as_deref() {
            Some(connection_id) => self.partners.find_by_connection_id(connection_id).await?,
            None => None,
        };
        let Some(partner) = partner else {
            warn!(
                exchange_id = %event.exchange_id,
                connection_id = ?event.connection_id,
                "Dropping presentation event without a known partner"
            );
            metrics::counter!("partner_agent_inbound_dropped_total", "reason" => "orphan_presentation").increment(1);
            return Ok(None);
        };
        let mut exchange = ProofExchange::new(event.role, event.version, event.exchange_id.clone(), state);
        exchange.partner_id = Some(partner.id);
        exchange.thread_id = event.thread_id.clone();
        exchange.presentation_request = event.presentation_request.clone();
        Ok(Some(exchange))
    }

    async fn on_acknowledgement(&self, existing: Option<ProofExchange>, event: &PresentationEvent) -> Result<(), ExchangeError> {
        let Some(state) = event.state else {
            return Ok(());
        };
        let (mut exchange, created) = match existing {
            Some(exchange) => (exchange, false),
            None => match self.new_exchange(event, state).await? {
                Some(exchange) => (exchange, true),
                None => return Ok(()),
            },
        };

        let transition = exchange.push_state(state, event.updated_at);
        if !created && !transition.is_advanced() {
            return Ok(());
        }
        if let Some(verified) = event.verified {
            exchange.verified = verified;
        }
        let revealed = RevealedAttributes::from_presentation(&event.record);
        if !revealed.is_empty() {
            exchange.revealed = Some(revealed);
        }
        self.proofs.save(&exchange).await?;

        info!(exchange_id = %exchange.exchange_id, verified = exchange.verified, "Presentation exchange completed");
        self.event_bus.publish(DomainEvent::PresentationRequestCompleted {
            exchange,
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    async fn on_request(&self, existing: Option<ProofExchange>, event: &PresentationEvent) -> Result<(), ExchangeError> {
        let state = PresentationExchangeState::RequestReceived;
        let Some(mut exchange) = existing else {
            let Some(exchange) = self.new_exchange(event, state).await? else {
                return Ok(());
            };
            self.proofs.save(&exchange).await?;
            info!(exchange_id = %exchange.exchange_id, "Presentation request received");
            self.event_bus.publish(DomainEvent::PresentationRequestReceived {
                exchange,
                occurred_at: Utc::now(),
            });
            return Ok(());
        };

        let answers_own_proposal =
            exchange.self_initiated && exchange.state == PresentationExchangeState::ProposalSent;
        if event.presentation_request.is_some() {
            exchange.presentation_request = event.presentation_request.clone();
        }
        let transition = exchange.push_state(state, event.updated_at);
        if !transition.is_advanced() {
            self.proofs.save(&exchange).await?;
            return Ok(());
        }

        if answers_own_proposal && event.auto_present {
            // The agent presents on its own.
            self.proofs.save(&exchange).await?;
            return Ok(());
        }
        if answers_own_proposal && self.auto_present && self.present_proposed(&mut exchange).await? {
            return Ok(());
        }

        self.proofs.save(&exchange).await?;
        self.event_bus.publish(DomainEvent::PresentationRequestReceived {
            exchange,
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    /// Answer a request with the material of the proposal we sent. Returns whether the
    /// presentation went out; a gateway failure leaves the request for the user.
    async fn present_proposed(&self, exchange: &mut ProofExchange) -> Result<bool, ExchangeError> {
        let Some(material) = exchange.proposal_material.clone() else {
            return Ok(false);
        };
        match self
            .gateway
            .send_presentation(exchange.version, &exchange.exchange_id, &material)
            .await
        {
            Ok(()) => {
                exchange.push_state(PresentationExchangeState::PresentationSent, Utc::now());
                self.proofs.save(exchange).await?;
                info!(exchange_id = %exchange.exchange_id, "Presented proposed proof automatically");
                Ok(true)
            }
            Err(e) => {
                warn!(exchange_id = %exchange.exchange_id, error = %e, "Automatic presentation failed");
                Ok(false)
            }
        }
    }

    async fn on_problem(&self, existing: Option<ProofExchange>, event: &PresentationEvent) -> Result<(), ExchangeError> {
        let Some(mut exchange) = existing else {
            debug!(exchange_id = %event.exchange_id, "Problem reported for unknown presentation exchange");
            return Ok(());
        };
        let transition = exchange.push_state(PresentationExchangeState::Declined, event.updated_at);
        if !transition.is_advanced() {
            return Ok(());
        }
        exchange.set_problem(event.error_msg.as_deref().unwrap_or_default());
        self.proofs.save(&exchange).await?;

        info!(exchange_id = %exchange.exchange_id, problem = ?exchange.problem, "Presentation exchange declined");
        self.event_bus.publish(DomainEvent::PresentationRequestDeclined {
            exchange,
            occurred_at: Utc::now(),
        });
        Ok(())
    }

    async fn on_default(&self, existing: Option<ProofExchange>, event: &PresentationEvent) -> Result<(), ExchangeError> {
        let Some(state) = event.state else {
            debug!(exchange_id = %event.exchange_id, "Presentation event without a tracked state");
            return Ok(());
        };
        // Written by the user operation that started the exchange.
        let created_locally = matches!(
            (event.role, state),
            (ProofRole::Prover, PresentationExchangeState::ProposalSent)
                | (ProofRole::Verifier, PresentationExchangeState::RequestSent)
        );
        if created_locally {
            return Ok(());
        }

        match existing {
            Some(mut exchange) => {
                let mut changed = false;
                if exchange.presentation_request.is_none() && event.presentation_request.is_some() {
                    exchange.presentation_request = event.presentation_request.clone();
                    changed = true;
                }
                match exchange.push_state(state, event.updated_at) {
                    Transition::Duplicate => {}
                    Transition::Blocked { terminal } => {
                        debug!(exchange_id = %exchange.exchange_id, ?terminal, reported = ?state, "Ignoring update after terminal state");
                    }
                    _ => changed = true,
                }
                if changed {
                    self.proofs.save(&exchange).await?;
                }
            }
            None => {
                if let Some(exchange) = self.new_exchange(event, state).await? {
                    self.proofs.save(&exchange).await?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // User-initiated
    // ------------------------------------------------------------------------

    pub async fn list(&self) -> Result<Vec<ProofExchange>, ExchangeError> {
        Ok(self.proofs.list_all().await?)
    }

    pub async fn get(&self, id: ProofExchangeId) -> Result<ProofExchange, ExchangeError> {
        self.proofs
            .find_by_id(id)
            .await?
            .ok_or_else(|| ExchangeError::NotFound(id.to_string()))
    }

    async fn connection_of(&self, partner_id: PartnerId) -> Result<String, ExchangeError> {
        let partner = self
            .partners
            .find_by_id(partner_id)
            .await?
            .ok_or_else(|| ExchangeError::PartnerNotFound(partner_id.to_string()))?;
        partner
            .connection_id
            .ok_or_else(|| ExchangeError::InvalidState("partner has no connection yet".to_string()))
    }

    /// Ask a partner to prove something.
    pub async fn send_presentation_request(
        &self,
        partner_id: PartnerId,
        version: ExchangeVersion,
        request: Value,
        template_id: Option<Uuid>,
    ) -> Result<ProofExchange, ExchangeError> {
        let connection_id = self.connection_of(partner_id).await?;
        let handle = self
            .gateway
            .send_presentation_request(version, &connection_id, &request)
            .await?;
        let _guard = self.locks.lock(&handle.exchange_id).await;

        let mut exchange = match self.proofs.find_by_exchange_id(&handle.exchange_id).await? {
            Some(exchange) => exchange,
            None => ProofExchange::new(
                ProofRole::Verifier,
                version,
                handle.exchange_id.clone(),
                PresentationExchangeState::RequestSent,
            ),
        };
        exchange.partner_id = Some(partner_id);
        exchange.thread_id = handle.thread_id.or(exchange.thread_id);
        exchange.presentation_request = Some(request);
        exchange.template_id = template_id;
        exchange.self_initiated = true;
        self.proofs.save(&exchange).await?;

        info!(exchange_id = %exchange.exchange_id, partner_id = %partner_id, "Presentation request sent");
        self.event_bus.publish(DomainEvent::PresentationRequestSent {
            exchange: exchange.clone(),
            occurred_at: Utc::now(),
        });
        Ok(exchange)
    }

    /// Offer to prove something. `material` is what will be presented once the partner
    /// answers with a matching request.
    pub async fn send_presentation_proposal(
        &self,
        partner_id: PartnerId,
        proposal: Value,
        material: Value,
    ) -> Result<ProofExchange, ExchangeError> {
        let connection_id = self.connection_of(partner_id).await?;
        let handle = self
            .gateway
            .send_presentation_proposal(&connection_id, &proposal)
            .await?;
        let _guard = self.locks.lock(&handle.exchange_id).await;

        let mut exchange = match self.proofs.find_by_exchange_id(&handle.exchange_id).await? {
            Some(exchange) => exchange,
            None => ProofExchange::new(
                ProofRole::Prover,
                ExchangeVersion::V1,
                handle.exchange_id.clone(),
                PresentationExchangeState::ProposalSent,
            ),
        };
        exchange.partner_id = Some(partner_id);
        exchange.thread_id = handle.thread_id.or(exchange.thread_id);
        exchange.proposal_material = Some(material);
        exchange.self_initiated = true;
        // The partner's request can be reconciled before this row is written.
        let request_arrived_first = exchange.state == PresentationExchangeState::RequestReceived;
        self.proofs.save(&exchange).await?;
        if request_arrived_first && self.auto_present {
            self.present_proposed(&mut exchange).await?;
        }
        Ok(exchange)
    }

    pub async fn decline_presentation_request(
        &self,
        id: ProofExchangeId,
        reason: Option<String>,
    ) -> Result<ProofExchange, ExchangeError> {
        let exchange = self.get(id).await?;
        let _guard = self.locks.lock(&exchange.exchange_id).await;
        let mut exchange = self.get(id).await?;
        if exchange.role != ProofRole::Prover || exchange.state != PresentationExchangeState::RequestReceived {
            return Err(ExchangeError::InvalidState(format!(
                "presentation request cannot be declined in state {:?}",
                exchange.state
            )));
        }
        let reason = reason.unwrap_or_else(|| "Presentation request declined".to_string());
        match self
            .gateway
            .send_presentation_problem_report(exchange.version, &exchange.exchange_id, &reason)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                info!(exchange_id = %exchange.exchange_id, "Exchange gone at agent, marking as problem");
                exchange.push_state(PresentationExchangeState::Problem, Utc::now());
                exchange.set_problem("exchange no longer exists at the agent");
                self.proofs.save(&exchange).await?;
                return Err(ExchangeError::NotFound(exchange.exchange_id));
            }
            Err(e) => return Err(e.into()),
        }
        exchange.push_state(PresentationExchangeState::Declined, Utc::now());
        exchange.set_problem(&reason);
        self.proofs.save(&exchange).await?;

        self.event_bus.publish(DomainEvent::PresentationRequestDeclined {
            exchange: exchange.clone(),
            occurred_at: Utc::now(),
        });
        Ok(exchange)
    }

    pub async fn delete_exchange(&self, id: ProofExchangeId) -> Result<(), ExchangeError> {
        let exchange = self.get(id).await?;
        let _guard = self.locks.lock(&exchange.exchange_id).await;
        if let Err(e) = self
            .gateway
            .remove_presentation_exchange(exchange.version, &exchange.exchange_id)
            .await
        {
            if !e.is_not_found() {
                warn!(exchange_id = %exchange.exchange_id, error = %e, "Could not remove presentation exchange at agent");
            }
        }
        self.proofs.delete(exchange.id).await?;
        self.event_bus.publish(DomainEvent::PresentationRequestDeleted {
            exchange,
            occurred_at: Utc::now(),
        });
        Ok(())
    }
}
