// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure
//!
//! Concrete adapters behind the domain contracts: event bus, per-key locks, live channel
//! registry, HTTP clients for the external agent and webhook subscribers, repositories.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** I/O adapters

pub mod agent_client;
pub mod channel_registry;
pub mod db;
pub mod event_bus;
pub mod key_lock;
pub mod repositories;
pub mod webhook_client;
