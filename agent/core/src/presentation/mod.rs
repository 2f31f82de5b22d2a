// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`partner-agent-core`)
//!
//! HTTP and WebSocket surface that translates external requests into application
//! service calls. No reconciliation logic lives here; every handler delegates to a
//! service in `crate::application`.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | Agent webhook intake, management API, health |
//! | [`websocket`] | WebSocket (Axum) | Push-notification channel for UI sessions |

pub mod api;
pub mod websocket;

pub use api::{app, ApiError, AppState};
