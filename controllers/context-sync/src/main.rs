//! Context Sync Controller
//!
//! Watches every context in the local kubeconfig, keeps one informer set per
//! reachable cluster, and logs connectivity and resource-count changes as they
//! happen. The kubeconfig is re-read on a fixed cadence, so contexts added,
//! changed or removed on disk are picked up without a restart.

use anyhow::Context as _;
use kube::config::Kubeconfig;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use sync_engine::{
    standard_factories, ContextsManager, HttpReadinessProbe, ManagerSettings,
    SelfSubjectAccessReviewChecker, SyncEvent,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|value| value.parse().ok())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting context sync controller");

    // Load configuration from environment variables
    let refresh_secs = env_u64("KUBECONFIG_REFRESH_SECS").unwrap_or(30);
    let mut settings = ManagerSettings::default();
    if let Some(timeout_ms) = env_u64("HEALTH_CHECK_TIMEOUT_MS") {
        settings.health_check_timeout = Duration::from_millis(timeout_ms);
    }
    if let Some(interval_secs) = env_u64("PROBE_INTERVAL_SECS") {
        settings.probe_interval = Duration::from_secs(interval_secs);
    }

    info!("Configuration:");
    info!("  Kubeconfig refresh: {}s", refresh_secs);
    info!("  Health check timeout: {:?}", settings.health_check_timeout);
    info!("  Probe interval: {:?}", settings.probe_interval);

    let probe = Arc::new(HttpReadinessProbe::new().context("building readiness probe")?);
    let manager = ContextsManager::new(
        standard_factories(),
        Arc::new(SelfSubjectAccessReviewChecker::new()),
        probe,
        settings,
    );

    // Log every published state change
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::ConnectivityChanged {
                    context,
                    connectivity,
                }) => {
                    info!(
                        context = %context,
                        checking = connectivity.checking,
                        reachable = connectivity.reachable,
                        "connectivity changed"
                    );
                }
                Ok(SyncEvent::GeneralStateChanged { context, state }) => {
                    info!(
                        context = %context,
                        reachable = state.reachable,
                        resources = ?state.resources,
                        "state changed"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Re-apply the kubeconfig on a fixed cadence until shutdown
    let mut ticker = tokio::time::interval(Duration::from_secs(refresh_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match Kubeconfig::read() {
                    Ok(kubeconfig) => {
                        if let Err(error) = manager.apply_kubeconfig(&kubeconfig).await {
                            warn!(%error, "failed to apply kubeconfig");
                        }
                    }
                    Err(error) => warn!(%error, "failed to read kubeconfig"),
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for shutdown signal")?;
                break;
            }
        }
    }

    info!("Shutting down");
    manager.dispose().await;
    Ok(())
}
