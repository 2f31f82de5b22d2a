// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod error;
pub mod inbound;
pub mod repository_factory;

pub mod connection;
pub mod credential;
pub mod proof;
pub mod dispatcher;

pub mod activity_tracker;
pub mod notification;
pub mod webhook_dispatcher;
pub mod jobs;

#[cfg(test)]
pub mod test_support;

// Re-export services for convenience
pub use activity_tracker::ActivityTracker;
pub use connection::ConnectionReconciler;
pub use credential::{CredentialCore, HolderReconciler, IssuerReconciler};
pub use dispatcher::EventDispatcher;
pub use error::{DispatchError, ExchangeError};
pub use notification::{NotificationFanout, NotificationService};
pub use proof::ProofReconciler;
pub use webhook_dispatcher::{WebhookDispatcher, WebhookRegistry, WebhookRegistryError};
