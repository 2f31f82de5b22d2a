// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Periodic Jobs
//!
//! Background loops that probe and poll the external agent. Each job runs on its own
//! timer and stops on its cancellation token; a failed cycle is logged and the next one
//! runs on schedule.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Scheduling of liveness probing, revocation polling and pruning

pub mod channel_prune;
pub mod credential_types;
pub mod liveness;
pub mod revocation;
pub mod stale_connections;

pub use channel_prune::ChannelPrune;
pub use credential_types::CredentialTypeIndex;
pub use liveness::{LivenessProbe, PingTracker};
pub use revocation::RevocationPoll;
pub use stale_connections::StaleConnectionPrune;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::agent_config::JobSchedule;

#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One cycle. Returns how many items the cycle touched.
    async fn run_once(&self) -> Result<usize>;

    /// Optional out-of-schedule trigger; a notification runs a cycle immediately.
    fn trigger(&self) -> Option<Arc<Notify>> {
        None
    }
}

/// Spawn the loop for `job`. Returns `None` when the schedule is disabled. The first cycle
/// runs one interval after start.
pub fn spawn_job(job: Arc<dyn PeriodicJob>, schedule: &JobSchedule, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
    if !schedule.enabled {
        info!(job = job.name(), "Periodic job is disabled");
        return None;
    }

    let period = schedule.interval;
    Some(tokio::spawn(async move {
        info!(job = job.name(), interval = ?period, "Starting periodic job");

        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let trigger = job.trigger().unwrap_or_else(|| Arc::new(Notify::new()));

        loop {
            tokio::select! {
                _ = tick.tick() => run_cycle(job.as_ref()).await,
                _ = trigger.notified() => {
                    debug!(job = job.name(), "Periodic job triggered");
                    run_cycle(job.as_ref()).await;
                }
                _ = shutdown.cancelled() => {
                    info!(job = job.name(), "Shutdown signal received, stopping periodic job");
                    break;
                }
            }
        }
    }))
}

async fn run_cycle(job: &dyn PeriodicJob) {
    match job.run_once().await {
        Ok(count) => debug!(job = job.name(), count, "Periodic job cycle completed"),
        Err(e) => {
            metrics::counter!("partner_agent_job_failures_total", "job" => job.name()).increment(1);
            warn!(job = job.name(), error = %e, "Periodic job cycle failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Flaky {
        runs: AtomicUsize,
        trigger: Arc<Notify>,
    }

    #[async_trait]
    impl PeriodicJob for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn run_once(&self) -> Result<usize> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run == 0 {
                anyhow::bail!("first cycle fails");
            }
            Ok(run)
        }

        fn trigger(&self) -> Option<Arc<Notify>> {
            Some(self.trigger.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_does_not_stop_the_loop() {
        let job = Arc::new(Flaky {
            runs: AtomicUsize::new(0),
            trigger: Arc::new(Notify::new()),
        });
        let shutdown = CancellationToken::new();
        let handle = spawn_job(job.clone(), &JobSchedule::every(Duration::from_secs(60)), shutdown.clone()).unwrap();

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_runs_a_cycle_early() {
        let trigger = Arc::new(Notify::new());
        let job = Arc::new(Flaky {
            runs: AtomicUsize::new(0),
            trigger: trigger.clone(),
        });
        let shutdown = CancellationToken::new();
        let handle = spawn_job(job.clone(), &JobSchedule::every(Duration::from_secs(3600)), shutdown.clone()).unwrap();

        trigger.notify_one();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_disabled_schedule_spawns_nothing() {
        let job = Arc::new(Flaky {
            runs: AtomicUsize::new(0),
            trigger: Arc::new(Notify::new()),
        });
        let schedule = JobSchedule {
            enabled: false,
            interval: Duration::from_secs(1),
        };
        assert!(spawn_job(job, &schedule, CancellationToken::new()).is_none());
    }
}
