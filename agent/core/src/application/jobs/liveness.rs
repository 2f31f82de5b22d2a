// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Connection liveness probe.
//!
//! Each cycle first settles the previous round (answered pings mark the partner seen,
//! unanswered ones mark it inactive) and then pings every trust-ping partner again.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::PeriodicJob;
use crate::application::connection::ConnectionReconciler;
use crate::domain::gateway::ConnectionGateway;
use crate::domain::partner::{ConnectionState, PartnerId};
use crate::domain::repository::PartnerRepository;

const PINGABLE: [ConnectionState; 3] = [
    ConnectionState::Active,
    ConnectionState::Completed,
    ConnectionState::Inactive,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPing {
    pub partner_id: PartnerId,
    pub responded: bool,
}

/// Outstanding pings by thread id. Written by the probe, answered from the `ping` topic.
#[derive(Default)]
pub struct PingTracker {
    pending: DashMap<String, PendingPing>,
}

impl PingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&self, thread_id: String, partner_id: PartnerId) {
        self.pending.insert(
            thread_id,
            PendingPing {
                partner_id,
                responded: false,
            },
        );
    }

    /// Returns false for a thread we never pinged.
    pub fn record_response(&self, thread_id: &str) -> bool {
        match self.pending.get_mut(thread_id) {
            Some(mut ping) => {
                ping.responded = true;
                true
            }
            None => false,
        }
    }

    pub fn drain(&self) -> Vec<PendingPing> {
        let keys: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|(_, ping)| ping))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

pub struct LivenessProbe {
    partners: Arc<dyn PartnerRepository>,
    gateway: Arc<dyn ConnectionGateway>,
    reconciler: Arc<ConnectionReconciler>,
    tracker: Arc<PingTracker>,
}

impl LivenessProbe {
    pub fn new(
        partners: Arc<dyn PartnerRepository>,
        gateway: Arc<dyn ConnectionGateway>,
        reconciler: Arc<ConnectionReconciler>,
        tracker: Arc<PingTracker>,
    ) -> Self {
        Self {
            partners,
            gateway,
            reconciler,
            tracker,
        }
    }
}

#[async_trait]
impl PeriodicJob for LivenessProbe {
    fn name(&self) -> &'static str {
        "liveness_probe"
    }

    async fn run_once(&self) -> Result<usize> {
        // Drained entries are gone from the tracker, so one failure must not abandon the rest.
        for ping in self.tracker.drain() {
            if let Err(e) = self.reconciler.record_liveness(ping.partner_id, ping.responded).await {
                warn!(partner_id = %ping.partner_id, error = %e, "Recording ping outcome failed");
            }
        }

        let mut pinged = 0;
        for partner in self.partners.find_pingable(&PINGABLE).await? {
            let Some(connection_id) = partner.connection_id.as_deref() else {
                continue;
            };
            match self.gateway.send_ping(connection_id).await {
                Ok(thread_id) => {
                    self.tracker.expect(thread_id, partner.id);
                    pinged += 1;
                }
                Err(e) if e.is_not_found() => {
                    debug!(partner_id = %partner.id, connection_id, "Connection gone at the agent, marking inactive");
                    if let Err(e) = self.reconciler.record_liveness(partner.id, false).await {
                        warn!(partner_id = %partner.id, error = %e, "Marking vanished connection inactive failed");
                    }
                }
                Err(e) => warn!(partner_id = %partner.id, error = %e, "Trust ping failed"),
            }
        }
        Ok(pinged)
    }
}
