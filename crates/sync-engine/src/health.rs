//! Per-context readiness probing.
//!
//! A [`HealthChecker`] issues one readiness probe per call against a cluster's
//! health endpoint; the caller (the per-context loop) drives the cadence. The
//! checker holds one cancellation flag for its whole lifetime: a probe aborted
//! by disposal emits nothing, so tearing down a context mid-probe is never
//! misreported as a reachability failure.

use crate::error::SyncError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Issues one readiness check against a cluster's API server.
///
/// The production implementation is [`HttpReadinessProbe`]; tests inject
/// scripted probes.
#[async_trait::async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Probe the server's readiness endpoint.
    ///
    /// `Ok(true)` means the endpoint answered healthy, `Ok(false)` unhealthy.
    /// Errors are treated by the caller as not ready.
    async fn probe(&self, server_url: &str, timeout: Duration) -> Result<bool, SyncError>;
}

/// Periodic readiness checker for one context, cancellable.
///
/// Two states only: idle and (transiently) checking. There is no internal
/// timer; the owning loop calls [`HealthChecker::check_readiness`] on its own
/// schedule.
pub struct HealthChecker {
    server_url: String,
    probe: Arc<dyn ReadinessProbe>,
    readiness_tx: mpsc::UnboundedSender<bool>,
    cancel_tx: watch::Sender<bool>,
}

impl HealthChecker {
    /// Create a checker probing `server_url`, emitting outcomes on `readiness_tx`.
    #[must_use]
    pub fn new(
        server_url: String,
        probe: Arc<dyn ReadinessProbe>,
        readiness_tx: mpsc::UnboundedSender<bool>,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            server_url,
            probe,
            readiness_tx,
            cancel_tx,
        }
    }

    /// Issue one readiness probe with the given timeout.
    ///
    /// On success the probe's boolean outcome is emitted; a timeout or any
    /// probe error emits `false`; a cancellation (disposal mid-probe) emits
    /// nothing at all - the check is moot, not failed.
    pub async fn check_readiness(&self, timeout: Duration) {
        let mut cancel_rx = self.cancel_tx.subscribe();
        if *cancel_rx.borrow() {
            return;
        }

        tokio::select! {
            outcome = tokio::time::timeout(timeout, self.probe.probe(&self.server_url, timeout)) => {
                let ready = match outcome {
                    Ok(Ok(ready)) => ready,
                    Ok(Err(error)) => {
                        debug!(server = %self.server_url, %error, "readiness probe failed");
                        false
                    }
                    Err(_) => {
                        debug!(server = %self.server_url, ?timeout, "readiness probe timed out");
                        false
                    }
                };
                let _ = self.readiness_tx.send(ready);
            }
            _ = cancel_rx.changed() => {
                debug!(server = %self.server_url, "readiness probe cancelled");
            }
        }
    }

    /// Cancel the checker, aborting any in-flight probe. Disposal is sticky:
    /// later `check_readiness` calls are no-ops too.
    pub fn dispose(&self) {
        // send() does not store the value while no probe is subscribed
        self.cancel_tx.send_replace(true);
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("server_url", &self.server_url)
            .finish_non_exhaustive()
    }
}

/// HTTP readiness probe against the cluster's `/readyz` endpoint.
///
/// Accepts invalid and self-signed certificates; many clusters use them, and
/// the probe only cares whether the API server answers at all.
#[derive(Debug, Clone)]
pub struct HttpReadinessProbe {
    client: reqwest::Client,
}

impl HttpReadinessProbe {
    /// Build the probe with its dedicated HTTP client.
    pub fn new() -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ReadinessProbe for HttpReadinessProbe {
    async fn probe(&self, server_url: &str, timeout: Duration) -> Result<bool, SyncError> {
        let url = format!("{}/readyz", server_url.trim_end_matches('/'));
        let response = self.client.get(&url).timeout(timeout).send().await?;
        Ok(response.status().is_success())
    }
}
