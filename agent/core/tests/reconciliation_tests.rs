// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end reconciliation tests.
//!
//! Agent webhook payloads go in through the dispatcher; assertions are made on the
//! stored exchanges, the activity log, the push queue and the commands sent back to the
//! agent. Subscribers run on their own tasks, so derived state is awaited.

mod common;

use serde_json::json;
use std::time::Duration;

use common::{wait_until, TestAgent};
use partner_agent_core::domain::activity::ActivityFilter;
use partner_agent_core::domain::exchange::ExchangeVersion;
use partner_agent_core::domain::notification::PushMessageType;
use partner_agent_core::domain::partner::{ConnectionState, Partner};
use partner_agent_core::domain::proof::PresentationExchangeState;
use partner_agent_core::domain::repository::{PartnerRepository, ProofExchangeRepository};

async fn active_partner(agent: &TestAgent, connection_id: &str) -> Partner {
    let partner = Partner::unsolicited(connection_id, ConnectionState::Active);
    agent.repos.partners.save(&partner).await.unwrap();
    partner
}

fn proof_request(exchange_id: &str, connection_id: &str) -> serde_json::Value {
    json!({
        "presentation_exchange_id": exchange_id,
        "connection_id": connection_id,
        "role": "prover",
        "state": "request_received",
        "presentation_request": {
            "name": "Proof of account",
            "requested_attributes": { "iban": { "name": "iban" } }
        }
    })
}

async fn open_tasks(agent: &TestAgent) -> usize {
    agent.activities.list(&ActivityFilter::tasks()).await.unwrap().len()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_redelivered_event_is_applied_once() {
    let agent = &TestAgent::start().await;
    active_partner(agent, "conn-1").await;

    agent.deliver("present_proof", proof_request("px-9", "conn-1")).await;
    wait_until(move || async move { open_tasks(agent).await == 1 }).await;
    settle().await;
    let queued = agent.notifications.queued().await.unwrap();

    agent.deliver("present_proof", proof_request("px-9", "conn-1")).await;
    settle().await;

    assert_eq!(open_tasks(agent).await, 1);
    assert_eq!(agent.notifications.queued().await.unwrap(), queued);
    assert_eq!(agent.repos.proofs.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_late_event_does_not_reopen_verified_exchange() {
    let agent = &TestAgent::start().await;
    let partner = active_partner(agent, "conn-1").await;

    let exchange = agent
        .proofs
        .send_presentation_request(partner.id, ExchangeVersion::V1, json!({ "name": "age" }), None)
        .await
        .unwrap();

    agent
        .deliver(
            "present_proof",
            json!({
                "presentation_exchange_id": exchange.exchange_id,
                "connection_id": "conn-1",
                "role": "verifier",
                "state": "verified",
                "verified": "true"
            }),
        )
        .await;
    agent
        .deliver(
            "present_proof",
            json!({
                "presentation_exchange_id": exchange.exchange_id,
                "connection_id": "conn-1",
                "role": "verifier",
                "state": "presentation_received"
            }),
        )
        .await;

    let stored = agent
        .repos
        .proofs
        .find_by_exchange_id(&exchange.exchange_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, PresentationExchangeState::Verified);
    assert!(stored.verified);
}

#[tokio::test]
async fn test_request_answering_own_proposal_is_presented_automatically() {
    let agent = &TestAgent::start().await;
    let partner = active_partner(agent, "conn-1").await;

    let exchange = agent
        .proofs
        .send_presentation_proposal(
            partner.id,
            json!({ "attributes": [{ "name": "iban" }] }),
            json!({ "requested_attributes": { "iban": { "cred_id": "cred-1", "revealed": true } } }),
        )
        .await
        .unwrap();

    agent
        .deliver("present_proof", proof_request(&exchange.exchange_id, "conn-1"))
        .await;
    settle().await;

    assert!(agent
        .gateway
        .calls()
        .contains(&format!("send_presentation {}", exchange.exchange_id)));
    let stored = agent
        .repos
        .proofs
        .find_by_exchange_id(&exchange.exchange_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, PresentationExchangeState::PresentationSent);
    assert_eq!(open_tasks(agent).await, 0);
}

#[tokio::test]
async fn test_presentation_from_unknown_connection_is_dropped() {
    let agent = &TestAgent::start().await;

    agent.deliver("present_proof", proof_request("px-1", "conn-unknown")).await;
    settle().await;

    assert!(agent.repos.proofs.find_by_exchange_id("px-1").await.unwrap().is_none());
    assert_eq!(open_tasks(agent).await, 0);
    assert_eq!(agent.notifications.queued().await.unwrap(), 0);
}

#[tokio::test]
async fn test_notifications_wait_for_the_next_session() {
    let agent = &TestAgent::start().await;

    agent
        .deliver(
            "connections",
            json!({
                "connection_id": "conn-1",
                "state": "request",
                "their_role": "requester",
                "their_label": "Alice"
            }),
        )
        .await;
    wait_until(move || async move { agent.notifications.queued().await.unwrap() >= 2 }).await;

    let (_channel, mut messages) = agent.notifications.connect().await.unwrap();
    let first = messages.recv().await.unwrap();
    let second = messages.recv().await.unwrap();

    assert_eq!(first.message_type, PushMessageType::OnPartnerRequestReceived);
    assert_eq!(second.message_type, PushMessageType::TaskAdded);
    assert_eq!(agent.notifications.queued().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failing_webhook_does_not_hold_back_local_state() {
    let mut server = mockito::Server::new_async().await;
    let hook = server
        .mock("POST", "/hook")
        .with_status(500)
        .expect_at_least(1)
        .create_async()
        .await;

    let agent = &TestAgent::start().await;
    agent
        .webhooks
        .register(&format!("{}/hook", server.url()), None)
        .await
        .unwrap();

    agent
        .deliver(
            "connections",
            json!({
                "connection_id": "conn-1",
                "state": "request",
                "their_role": "requester"
            }),
        )
        .await;

    wait_until(move || async move { open_tasks(agent).await == 1 }).await;
    wait_until(move || async move { agent.notifications.queued().await.unwrap() >= 2 }).await;
    let hook = &hook;
    wait_until(move || async move { hook.matched_async().await }).await;
}

#[tokio::test]
async fn test_invitation_partner_is_completed_in_place() {
    let agent = &TestAgent::start().await;

    let (partner, invitation) = agent.connections.create_invitation(Some("Bob".into())).await.unwrap();
    assert!(partner.connection_id.is_none());

    for state in ["invitation", "request", "active"] {
        agent
            .deliver(
                "connections",
                json!({
                    "connection_id": "conn-7",
                    "invitation_msg_id": invitation.invitation_msg_id,
                    "state": state,
                    "their_role": "invitee",
                    "their_label": "Bob's wallet",
                    "their_did": "Q4zqM7aXqm7gDQkUVLng9h"
                }),
            )
            .await;
    }

    let all = agent.repos.partners.list_all().await.unwrap();
    assert_eq!(all.len(), 1);
    let stored = &all[0];
    assert_eq!(stored.id, partner.id);
    assert_eq!(stored.connection_id.as_deref(), Some("conn-7"));
    assert_eq!(stored.label.as_deref(), Some("Bob's wallet"));
    assert_eq!(stored.state, ConnectionState::Active);

    wait_until(move || async move {
        agent
            .activities
            .list(&ActivityFilter::activities())
            .await
            .unwrap()
            .len()
            == 1
    })
    .await;
    assert_eq!(open_tasks(agent).await, 0);
}
