//! Collaborator contracts.
//!
//! The orchestrator treats the watch transport and the RBAC service as opaque
//! collaborators behind these traits. The production implementations live in
//! the [`crate::adapters`] module; tests substitute mocks.

use crate::error::SyncError;
use crate::kubeconfig::KubeConfigSingleContext;
use crate::resources::ResourceName;
use serde::Serialize;
use tokio::sync::mpsc;

/// One RBAC check the manager must pass before creating an informer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequest {
    /// API group, empty string for the core group
    pub group: String,
    /// Lowercase plural resource name
    pub resource: String,
    /// Verb to check, `"watch"` for informers
    pub verb: String,
}

/// Outcome of a single permission request. Deny-by-default: a request no
/// authorizer opined on comes back with `permitted: false`.
#[derive(Debug, Clone)]
pub struct PermissionVerdict {
    /// Whether the verb is allowed
    pub permitted: bool,
    /// Optional human-readable explanation, informational only
    pub reason: Option<String>,
}

/// Kind of change an informer observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResourceEventKind {
    /// Object added or updated (initial listing included)
    Applied,
    /// Object deleted
    Deleted,
}

/// A change event emitted by an informer's watch stream.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    /// Context the informer belongs to
    pub context: String,
    /// Watched resource kind
    pub resource: ResourceName,
    /// What happened
    pub kind: ResourceEventKind,
    /// `namespace/name` key of the affected object
    pub object: String,
}

/// A live watch subscription for one resource kind in one context.
///
/// Opaque beyond `stop()`; change events flow through the channel handed to
/// [`ResourceFactory::create_informer`].
///
/// Implementations must also release the underlying watch when the handle is
/// dropped without `stop()` having been called; the orchestrator discards
/// handles it could not install (context torn down concurrently) by dropping
/// them. `stop()` additionally lets callers await full termination.
#[async_trait::async_trait]
pub trait InformerHandle: Send + Sync {
    /// Stop the watch stream. No event may be delivered after this resolves.
    async fn stop(&self);
}

/// Describes one watchable resource kind and builds informers for it.
#[async_trait::async_trait]
pub trait ResourceFactory: Send + Sync {
    /// The resource kind this factory watches.
    fn resource(&self) -> ResourceName;

    /// RBAC checks that must all pass before `create_informer` is called.
    fn permissions(&self) -> Vec<PermissionRequest>;

    /// Start a watch for this kind in the given context, forwarding change
    /// events into `events`.
    async fn create_informer(
        &self,
        config: &KubeConfigSingleContext,
        events: mpsc::UnboundedSender<ResourceEvent>,
    ) -> Result<Box<dyn InformerHandle>, SyncError>;
}

/// Decides which resources are watchable in a context.
#[async_trait::async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Evaluate the given requests against the context's RBAC rules,
    /// one verdict per request, in order.
    async fn can_watch(
        &self,
        config: &KubeConfigSingleContext,
        requests: &[PermissionRequest],
    ) -> Result<Vec<PermissionVerdict>, SyncError>;
}
