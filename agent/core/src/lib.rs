// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Partner Agent Core
//!
//! Keeps a local view of connection, credential and proof exchanges in step with an
//! external identity agent and fans every state change out to UI sessions and webhooks.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Crate root re-exporting the four layers

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
