//! Engine-specific error types.
//!
//! Operational failures (unreachable clusters, denied permissions) never surface
//! through this enum to consumers; they are absorbed into connectivity state.
//! The variants here are either invariant violations in the orchestrator
//! (`ContextNotInitialized`) or failures building clients and projections.

use thiserror::Error;

/// Errors that can occur in the synchronization engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Requested context does not exist in the kubeconfig
    #[error("context not found in kubeconfig: {0}")]
    ContextNotFound(String),

    /// Context exists but cannot be projected into a usable single-context config
    #[error("invalid context {context}: {reason}")]
    InvalidContext {
        /// Name of the offending context
        context: String,
        /// What made the context unusable
        reason: String,
    },

    /// A resource informer was attached before the context's informer map was
    /// initialized. This is an ordering bug in the caller, not an operational
    /// condition.
    #[error("context has no informer map (call set_informers first): {0}")]
    ContextNotInitialized(String),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubeconfig parsing or client-construction error
    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// HTTP error from the readiness probe
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error while canonicalizing a kubeconfig projection
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
