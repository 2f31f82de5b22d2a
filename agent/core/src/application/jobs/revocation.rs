// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Revocation status poll for held credentials.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::PeriodicJob;
use crate::application::credential::holder::HolderReconciler;

pub struct RevocationPoll {
    holder: Arc<HolderReconciler>,
}

impl RevocationPoll {
    pub fn new(holder: Arc<HolderReconciler>) -> Self {
        Self { holder }
    }
}

#[async_trait]
impl PeriodicJob for RevocationPoll {
    fn name(&self) -> &'static str {
        "revocation_poll"
    }

    async fn run_once(&self) -> Result<usize> {
        Ok(self.holder.refresh_revocation_status().await?)
    }
}
