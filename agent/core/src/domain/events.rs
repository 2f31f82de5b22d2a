// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Events
//!
//! Emitted by the reconcilers on actionable transitions and consumed by the activity
//! tracker, the notification fan-out and the webhook dispatcher. Events carry a snapshot
//! of the aggregate so consumers never read back from the store.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Typed event vocabulary published on the event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::activity::Activity;
use crate::domain::credential::CredentialExchange;
use crate::domain::partner::{Partner, PartnerId};
use crate::domain::proof::ProofExchange;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    PartnerAdded {
        partner: Partner,
        occurred_at: DateTime<Utc>,
    },
    PartnerAccepted {
        partner: Partner,
        occurred_at: DateTime<Utc>,
    },
    PartnerRequestReceived {
        partner: Partner,
        occurred_at: DateTime<Utc>,
    },
    PartnerRequestCompleted {
        partner: Partner,
        occurred_at: DateTime<Utc>,
    },
    PartnerRemoved {
        partner: Partner,
        occurred_at: DateTime<Utc>,
    },
    CredentialOffered {
        exchange: CredentialExchange,
        occurred_at: DateTime<Utc>,
    },
    CredentialAdded {
        exchange: CredentialExchange,
        occurred_at: DateTime<Utc>,
    },
    CredentialProposalReceived {
        exchange: CredentialExchange,
        occurred_at: DateTime<Utc>,
    },
    CredentialIssued {
        exchange: CredentialExchange,
        occurred_at: DateTime<Utc>,
    },
    CredentialAccepted {
        exchange: CredentialExchange,
        occurred_at: DateTime<Utc>,
    },
    CredentialProblem {
        exchange: CredentialExchange,
        occurred_at: DateTime<Utc>,
    },
    CredentialRevoked {
        exchange: CredentialExchange,
        occurred_at: DateTime<Utc>,
    },
    PresentationRequestReceived {
        exchange: ProofExchange,
        occurred_at: DateTime<Utc>,
    },
    PresentationRequestSent {
        exchange: ProofExchange,
        occurred_at: DateTime<Utc>,
    },
    PresentationRequestCompleted {
        exchange: ProofExchange,
        occurred_at: DateTime<Utc>,
    },
    PresentationRequestDeclined {
        exchange: ProofExchange,
        occurred_at: DateTime<Utc>,
    },
    PresentationRequestDeleted {
        exchange: ProofExchange,
        occurred_at: DateTime<Utc>,
    },
    MessageReceived {
        partner_id: PartnerId,
        message_id: String,
        content: String,
        occurred_at: DateTime<Utc>,
    },
    TaskAdded {
        activity: Activity,
        occurred_at: DateTime<Utc>,
    },
    TaskCompleted {
        activity: Activity,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Wire name, identical to the serde tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::PartnerAdded { .. } => "partner_added",
            DomainEvent::PartnerAccepted { .. } => "partner_accepted",
            DomainEvent::PartnerRequestReceived { .. } => "partner_request_received",
            DomainEvent::PartnerRequestCompleted { .. } => "partner_request_completed",
            DomainEvent::PartnerRemoved { .. } => "partner_removed",
            DomainEvent::CredentialOffered { .. } => "credential_offered",
            DomainEvent::CredentialAdded { .. } => "credential_added",
            DomainEvent::CredentialProposalReceived { .. } => "credential_proposal_received",
            DomainEvent::CredentialIssued { .. } => "credential_issued",
            DomainEvent::CredentialAccepted { .. } => "credential_accepted",
            DomainEvent::CredentialProblem { .. } => "credential_problem",
            DomainEvent::CredentialRevoked { .. } => "credential_revoked",
            DomainEvent::PresentationRequestReceived { .. } => "presentation_request_received",
            DomainEvent::PresentationRequestSent { .. } => "presentation_request_sent",
            DomainEvent::PresentationRequestCompleted { .. } => "presentation_request_completed",
            DomainEvent::PresentationRequestDeclined { .. } => "presentation_request_declined",
            DomainEvent::PresentationRequestDeleted { .. } => "presentation_request_deleted",
            DomainEvent::MessageReceived { .. } => "message_received",
            DomainEvent::TaskAdded { .. } => "task_added",
            DomainEvent::TaskCompleted { .. } => "task_completed",
        }
    }

    /// Event body without the `type` tag.
    pub fn payload(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut fields)) => {
                fields.remove("type");
                Value::Object(fields)
            }
            Ok(other) => other,
            Err(_) => Value::Null,
        }
    }

    pub fn partner_id(&self) -> Option<PartnerId> {
        match self {
            DomainEvent::PartnerAdded { partner, .. }
            | DomainEvent::PartnerAccepted { partner, .. }
            | DomainEvent::PartnerRequestReceived { partner, .. }
            | DomainEvent::PartnerRequestCompleted { partner, .. }
            | DomainEvent::PartnerRemoved { partner, .. } => Some(partner.id),
            DomainEvent::CredentialOffered { exchange, .. }
            | DomainEvent::CredentialAdded { exchange, .. }
            | DomainEvent::CredentialProposalReceived { exchange, .. }
            | DomainEvent::CredentialIssued { exchange, .. }
            | DomainEvent::CredentialAccepted { exchange, .. }
            | DomainEvent::CredentialProblem { exchange, .. }
            | DomainEvent::CredentialRevoked { exchange, .. } => exchange.partner_id,
            DomainEvent::PresentationRequestReceived { exchange, .. }
            | DomainEvent::PresentationRequestSent { exchange, .. }
            | DomainEvent::PresentationRequestCompleted { exchange, .. }
            | DomainEvent::PresentationRequestDeclined { exchange, .. }
            | DomainEvent::PresentationRequestDeleted { exchange, .. } => exchange.partner_id,
            DomainEvent::MessageReceived { partner_id, .. } => Some(*partner_id),
            DomainEvent::TaskAdded { activity, .. } | DomainEvent::TaskCompleted { activity, .. } => {
                activity.partner_id
            }
        }
    }

    pub fn is_task_event(&self) -> bool {
        matches!(self, DomainEvent::TaskAdded { .. } | DomainEvent::TaskCompleted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::partner::ConnectionState;

    #[test]
    fn test_payload_strips_type_tag() {
        let partner = Partner::unsolicited("conn-1", ConnectionState::Request);
        let event = DomainEvent::PartnerRequestReceived {
            partner: partner.clone(),
            occurred_at: Utc::now(),
        };

        let payload = event.payload();

        assert_eq!(event.event_type(), "partner_request_received");
        assert!(payload.get("type").is_none());
        assert_eq!(payload["partner"]["connection_id"], "conn-1");
        assert_eq!(event.partner_id(), Some(partner.id));
    }

    #[test]
    fn test_event_type_matches_serde_tag() {
        let event = DomainEvent::MessageReceived {
            partner_id: PartnerId::new(),
            message_id: "m-1".into(),
            content: "hello".into(),
            occurred_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
    }
}
