// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Removes push channel registrations whose session has gone away.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::PeriodicJob;
use crate::application::notification::NotificationService;

pub struct ChannelPrune {
    notifications: Arc<NotificationService>,
}

impl ChannelPrune {
    pub fn new(notifications: Arc<NotificationService>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl PeriodicJob for ChannelPrune {
    fn name(&self) -> &'static str {
        "channel_prune"
    }

    async fn run_once(&self) -> Result<usize> {
        let pruned = self.notifications.prune_closed();
        if pruned > 0 {
            debug!(pruned, "Pruned closed push channels");
        }
        Ok(pruned)
    }
}
