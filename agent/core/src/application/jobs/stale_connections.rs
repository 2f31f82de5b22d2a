// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Deletes connections the agent still holds but no local partner refers to, e.g. left
//! over from invitations that were never answered or partners removed while the agent
//! was unreachable.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::PeriodicJob;
use crate::domain::gateway::ConnectionGateway;
use crate::domain::repository::PartnerRepository;

pub struct StaleConnectionPrune {
    partners: Arc<dyn PartnerRepository>,
    gateway: Arc<dyn ConnectionGateway>,
}

impl StaleConnectionPrune {
    pub fn new(partners: Arc<dyn PartnerRepository>, gateway: Arc<dyn ConnectionGateway>) -> Self {
        Self { partners, gateway }
    }
}

#[async_trait]
impl PeriodicJob for StaleConnectionPrune {
    fn name(&self) -> &'static str {
        "stale_connection_prune"
    }

    async fn run_once(&self) -> Result<usize> {
        let mut removed = 0;
        for connection_id in self.gateway.list_connection_ids().await? {
            if self.partners.find_by_connection_id(&connection_id).await?.is_some() {
                continue;
            }
            match self.gateway.remove_connection(&connection_id).await {
                Ok(()) => {
                    info!(connection_id = %connection_id, "Removed connection unknown to the partner list");
                    removed += 1;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(connection_id = %connection_id, error = %e, "Failed to remove stale connection"),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::FakeGateway;
    use crate::domain::partner::{ConnectionState, Partner};
    use crate::infrastructure::repositories::InMemoryPartnerRepository;

    #[tokio::test]
    async fn test_only_unknown_connections_are_removed() {
        let partners = Arc::new(InMemoryPartnerRepository::new());
        partners
            .save(&Partner::unsolicited("conn-known", ConnectionState::Active))
            .await
            .unwrap();
        let gateway = Arc::new(FakeGateway::default());
        gateway.set_connection_ids(&["conn-known", "conn-stale"]);

        let job = StaleConnectionPrune::new(partners, gateway.clone());

        assert_eq!(job.run_once().await.unwrap(), 1);
        let removals: Vec<String> = gateway
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("remove_connection"))
            .collect();
        assert_eq!(removals, vec!["remove_connection conn-stale".to_string()]);
    }
}
