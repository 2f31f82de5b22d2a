// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Service wiring and HTTP server.
//!
//! Builds every service from the loaded configuration, starts the event subscribers and
//! periodic jobs, then serves the API until SIGINT/SIGTERM. On shutdown the jobs are
//! cancelled and awaited before the process exits.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use partner_agent_core::{
    application::{
        jobs::{
            spawn_job, ChannelPrune, CredentialTypeIndex, LivenessProbe, PeriodicJob, PingTracker, RevocationPoll,
            StaleConnectionPrune,
        },
        repository_factory::create_repositories,
        ActivityTracker, ConnectionReconciler, CredentialCore, EventDispatcher, HolderReconciler, IssuerReconciler,
        NotificationFanout, NotificationService, ProofReconciler, WebhookDispatcher, WebhookRegistry,
    },
    domain::{
        agent_config::{AgentConfigManifest, JobSchedule},
        repository::StorageBackend,
    },
    infrastructure::{
        agent_client::AgentAdminClient, channel_registry::ChannelRegistry, db::Database, event_bus::EventBus,
        webhook_client::WebhookClient,
    },
    presentation::{app, AppState},
};

pub async fn run(config: AgentConfigManifest, host: &str, port: u16) -> Result<()> {
    let spec = &config.spec;

    // Storage
    let backend = spec.storage.backend()?;
    let pool = match &backend {
        StorageBackend::PostgreSQL(pg) => {
            let database = Database::new(pg).await?;
            database.migrate().await?;
            info!("PostgreSQL storage ready");
            Some(database.get_pool().clone())
        }
        StorageBackend::InMemory => {
            warn!("Using in-memory storage; state is lost on restart");
            None
        }
    };
    let repos = create_repositories(&backend, pool)?;

    // Metrics
    if let Some(metrics_port) = spec.observability.as_ref().and_then(|o| o.metrics_port) {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], metrics_port)))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(port = metrics_port, "Prometheus exporter listening");
    }

    // External agent
    let gateway = Arc::new(
        AgentAdminClient::from_config(&spec.gateway).context("Failed to build external agent client")?,
    );
    info!(url = %spec.gateway.url, "External agent configured");

    let event_bus = Arc::new(EventBus::new(spec.event_bus.capacity));

    // Reconcilers
    let core = Arc::new(CredentialCore::new(
        repos.credentials.clone(),
        repos.partners.clone(),
        repos.schemas.clone(),
        gateway.clone(),
        event_bus.clone(),
    ));
    let connections = Arc::new(ConnectionReconciler::new(
        repos.partners.clone(),
        core.clone(),
        repos.proofs.clone(),
        gateway.clone(),
        gateway.clone(),
        event_bus.clone(),
        spec.credentials.did_prefix.clone(),
    ));
    let holder = Arc::new(HolderReconciler::new(core.clone()));
    let issuer = Arc::new(IssuerReconciler::new(
        core,
        repos.credential_definitions.clone(),
        spec.credentials.auto_respond_credential_request,
    ));
    let proofs = Arc::new(ProofReconciler::new(
        repos.proofs.clone(),
        repos.partners.clone(),
        gateway.clone(),
        event_bus.clone(),
        spec.proofs.auto_present,
    ));
    let pings = Arc::new(PingTracker::new());
    let dispatcher = Arc::new(EventDispatcher::new(
        connections.clone(),
        holder.clone(),
        issuer.clone(),
        proofs.clone(),
        pings.clone(),
    ));

    // Event subscribers
    let activities = Arc::new(ActivityTracker::new(
        repos.activities.clone(),
        event_bus.clone(),
        spec.activity.clone(),
    ));
    let notifications = Arc::new(NotificationService::new(
        Arc::new(ChannelRegistry::new()),
        repos.notifications.clone(),
    ));
    let fanout = Arc::new(NotificationFanout::new(
        notifications.clone(),
        repos.partners.clone(),
        event_bus.clone(),
        spec.activity.clone(),
    ));
    let webhook_dispatcher = Arc::new(WebhookDispatcher::new(
        repos.webhooks.clone(),
        WebhookClient::new(spec.webhooks.timeout)?,
        event_bus.clone(),
    ));

    activities.clone().start();
    fanout.start();
    webhook_dispatcher.start();

    // Periodic jobs
    let shutdown = CancellationToken::new();
    let jobs: Vec<(Arc<dyn PeriodicJob>, &JobSchedule)> = vec![
        (
            Arc::new(LivenessProbe::new(
                repos.partners.clone(),
                gateway.clone(),
                connections.clone(),
                pings,
            )) as Arc<dyn PeriodicJob>,
            &spec.jobs.liveness_probe,
        ),
        (
            Arc::new(RevocationPoll::new(holder.clone())) as Arc<dyn PeriodicJob>,
            &spec.jobs.revocation_poll,
        ),
        (
            Arc::new(StaleConnectionPrune::new(repos.partners.clone(), gateway.clone())) as Arc<dyn PeriodicJob>,
            &spec.jobs.stale_connection_prune,
        ),
        (
            Arc::new(CredentialTypeIndex::new(
                repos.schemas.clone(),
                repos.partners.clone(),
                gateway.clone(),
                connections.clone(),
                spec.credentials.did_prefix.clone(),
            )) as Arc<dyn PeriodicJob>,
            &spec.jobs.credential_type_index,
        ),
        (
            Arc::new(ChannelPrune::new(notifications.clone())) as Arc<dyn PeriodicJob>,
            &spec.jobs.channel_prune,
        ),
    ];
    let job_handles: Vec<_> = jobs
        .into_iter()
        .filter_map(|(job, schedule)| spawn_job(job, schedule, shutdown.clone()))
        .collect();

    // HTTP
    let state = Arc::new(AppState {
        dispatcher,
        connections,
        holder,
        issuer,
        proofs,
        activities,
        webhooks: Arc::new(WebhookRegistry::new(repos.webhooks.clone())),
        notifications,
        started_at: Instant::now(),
    });

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Partner agent listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Stopping periodic jobs");
    shutdown.cancel();
    for handle in job_handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Periodic job ended abnormally");
        }
    }

    info!("Partner agent shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
