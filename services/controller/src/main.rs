//! shoal controller
//!
//! The controller is the API layer in front of the cluster scheduler. It
//! keeps formations at their desired size and runs one-shot jobs, streaming
//! attached jobs over a hijacked HTTP connection.

use std::sync::Arc;

use anyhow::{Context, Result};
use shoal_controller::{
    api,
    attach::AttachClient,
    cluster::{HostRuntime, HttpScheduler, InMemoryCluster, Scheduler, UnsupportedHostRuntime},
    config,
    registry::StaticRegistry,
    scheduler::{FormationReconciler, JobLauncher},
    state::AppState,
};
use shoal_reconcile::{policy_from_name, PlacementPolicy};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to SHOAL_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting shoal controller");
    info!(
        listen_addr = %config.listen_addr,
        dev_mode = config.dev_mode,
        max_formation_quantity = config.max_formation_quantity,
        "Configuration loaded"
    );

    let (scheduler, runtime): (Arc<dyn Scheduler>, Arc<dyn HostRuntime>) = if config.dev_mode {
        info!(hosts = config.dev_hosts.len(), "Using in-memory cluster (dev mode)");
        let cluster = Arc::new(InMemoryCluster::with_hosts(config.dev_hosts.clone()));
        let scheduler: Arc<dyn Scheduler> = cluster.clone();
        let runtime: Arc<dyn HostRuntime> = cluster;
        (scheduler, runtime)
    } else {
        let scheduler = HttpScheduler::new(&config.scheduler_url, config.scheduler_timeout)
            .context("failed to build scheduler client")?;
        info!(url = %config.scheduler_url, "Using scheduler service");
        let scheduler: Arc<dyn Scheduler> = Arc::new(scheduler);
        warn!("No host runtime configured; formation scale-down and job logs are unavailable");
        let runtime: Arc<dyn HostRuntime> = Arc::new(UnsupportedHostRuntime);
        (scheduler, runtime)
    };

    if config.attach_addrs.is_empty() {
        warn!("No attach agents configured; attached runs will fail");
    }
    let registry = Arc::new(StaticRegistry::for_attach(
        &config.attach.service,
        &config.attach_addrs,
    ));
    let attach = AttachClient::new(registry, config.attach.clone());

    let formation_placement: Arc<dyn PlacementPolicy> =
        Arc::from(policy_from_name(&config.formation_placement)?);
    let run_placement: Arc<dyn PlacementPolicy> = Arc::from(policy_from_name(&config.run_placement)?);
    info!(
        formation_placement = formation_placement.name(),
        run_placement = run_placement.name(),
        "Placement policies selected"
    );

    let reconciler = FormationReconciler::new(
        scheduler.clone(),
        runtime.clone(),
        formation_placement,
        config.jobs.formation_template(),
    )
    .with_max_quantity(config.max_formation_quantity);
    let launcher = JobLauncher::new(
        scheduler.clone(),
        attach,
        run_placement,
        config.jobs.run_image.clone(),
    );

    // Create application state
    let state = AppState::new(scheduler, runtime, reconciler, launcher);

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
        })
        .await;

    match result {
        Ok(()) => info!("Controller shutdown complete"),
        Err(e) => {
            error!(error = %e, "Server error");
            return Err(e.into());
        }
    }
    Ok(())
}
