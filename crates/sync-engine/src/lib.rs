//! Multi-context Kubernetes state synchronization engine
//!
//! Concurrently watches resources across an arbitrary, dynamically-changing set of
//! kubeconfig contexts, tracks each context's reachability, reconnects with
//! exponential backoff, and publishes aggregated state snapshots to consumers.
//!
//! The engine is organized around one orchestrator and its collaborators:
//!
//! - [`ContextsManager`] reconciles the live informer/connectivity state against
//!   the contexts found in a kubeconfig, one independent loop per context.
//! - [`KubeConfigSingleContext`] projects a full kubeconfig down to exactly one
//!   context/cluster/user triple; its value equality drives change detection.
//! - [`HealthChecker`] probes a cluster's readiness endpoint, cancellable.
//! - The registries ([`ContextsInformersRegistry`], [`ContextsConnectivityRegistry`],
//!   [`ContextResourceRegistry`]) hold the shared per-context state.
//! - The [`adapters`] module implements the collaborator contracts in
//!   [`contract`] on top of the kube client (informer factories, permission
//!   checks).
//!
//! No process-wide singletons: every registry is owned by one manager instance,
//! so multiple independent managers can coexist (as they do in the tests).

pub mod adapters;
pub mod backoff;
pub mod contract;
pub mod error;
pub mod events;
pub mod health;
pub mod kubeconfig;
pub mod manager;
pub mod registry;
pub mod resources;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
#[cfg(test)]
mod manager_test;

pub use adapters::{
    client_for, standard_factories, KubeResourceFactory, SelfSubjectAccessReviewChecker,
};
pub use backoff::Backoff;
pub use contract::{
    InformerHandle, PermissionChecker, PermissionRequest, PermissionVerdict, ResourceEvent,
    ResourceEventKind, ResourceFactory,
};
pub use error::SyncError;
pub use events::{EventBus, SyncEvent};
pub use health::{HealthChecker, HttpReadinessProbe, ReadinessProbe};
pub use kubeconfig::KubeConfigSingleContext;
pub use manager::{ContextGeneralState, ContextsManager, ManagerSettings};
pub use registry::connectivity::{ContextConnectivity, ContextsConnectivityRegistry};
pub use registry::informers::ContextsInformersRegistry;
pub use registry::resource::{ContextResourceRegistry, Details};
pub use resources::ResourceName;
