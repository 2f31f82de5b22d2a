// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Aggregates, state machines, domain events and the contracts of the collaborators
//! (aggregate store, external agent gateway) the reconcilers depend on.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure model, no I/O

pub mod activity;
pub mod agent_config;
pub mod credential;
pub mod events;
pub mod exchange;
pub mod gateway;
pub mod notification;
pub mod partner;
pub mod proof;
pub mod repository;
pub mod schema;
pub mod webhook;
