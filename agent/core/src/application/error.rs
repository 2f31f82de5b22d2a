// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Errors surfaced by user-initiated reconciler operations.
//!
//! Only a transport failure towards the external agent is propagated as a retryable error.
//! A 404 from the agent on a record we still consider live is turned into local state
//! (`problem`) by the reconciler before it surfaces as [`ExchangeError::NotFound`].

use thiserror::Error;

use crate::domain::gateway::GatewayError;
use crate::domain::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("external agent unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("partner not found: {0}")]
    PartnerNotFound(String),

    #[error("external agent error: {0}")]
    Gateway(GatewayError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<GatewayError> for ExchangeError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(reason) => ExchangeError::NetworkUnavailable(reason),
            GatewayError::NotFound(what) => ExchangeError::NotFound(what),
            other => ExchangeError::Gateway(other),
        }
    }
}

/// Inbound payload that could not be turned into a typed event. Logged, never returned to
/// the agent.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    #[error("undecodable '{topic}' payload: {reason}")]
    Decode { topic: String, reason: String },
}
