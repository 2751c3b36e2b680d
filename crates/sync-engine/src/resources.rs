//! Watchable resource kinds.
//!
//! Resources are partitioned into *primary* kinds, watched unconditionally for
//! every reachable context, and *secondary* kinds, watched only while a consumer
//! has registered interest. The partition bounds the default watch fan-out cost
//! across many contexts.

use kube::api::ApiResource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A watchable Kubernetes resource kind known to the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ResourceName {
    /// Pods (primary)
    Pods,
    /// Deployments (primary)
    Deployments,
    /// Services
    Services,
    /// Ingresses
    Ingresses,
    /// Secrets
    Secrets,
    /// ConfigMaps
    ConfigMaps,
    /// Nodes (cluster-scoped)
    Nodes,
    /// PersistentVolumeClaims
    PersistentVolumeClaims,
    /// StatefulSets
    StatefulSets,
    /// DaemonSets
    DaemonSets,
    /// Jobs
    Jobs,
    /// CronJobs
    CronJobs,
    /// Events
    Events,
}

impl ResourceName {
    /// All resource kinds the engine knows how to watch.
    pub const ALL: [ResourceName; 13] = [
        ResourceName::Pods,
        ResourceName::Deployments,
        ResourceName::Services,
        ResourceName::Ingresses,
        ResourceName::Secrets,
        ResourceName::ConfigMaps,
        ResourceName::Nodes,
        ResourceName::PersistentVolumeClaims,
        ResourceName::StatefulSets,
        ResourceName::DaemonSets,
        ResourceName::Jobs,
        ResourceName::CronJobs,
        ResourceName::Events,
    ];

    /// Whether this kind is watched unconditionally for every reachable context.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        matches!(self, ResourceName::Pods | ResourceName::Deployments)
    }

    /// The always-watched kinds.
    pub fn primary() -> impl Iterator<Item = ResourceName> {
        Self::ALL.into_iter().filter(ResourceName::is_primary)
    }

    /// The opt-in kinds.
    pub fn secondary() -> impl Iterator<Item = ResourceName> {
        Self::ALL.into_iter().filter(|r| !r.is_primary())
    }

    /// Whether objects of this kind live in a namespace.
    #[must_use]
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ResourceName::Nodes)
    }

    /// API group of this kind, empty string for the core group.
    #[must_use]
    pub fn group(&self) -> &'static str {
        match self {
            ResourceName::Deployments
            | ResourceName::StatefulSets
            | ResourceName::DaemonSets => "apps",
            ResourceName::Ingresses => "networking.k8s.io",
            ResourceName::Jobs | ResourceName::CronJobs => "batch",
            _ => "",
        }
    }

    /// Lowercase plural name used in API paths and RBAC rules.
    #[must_use]
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceName::Pods => "pods",
            ResourceName::Deployments => "deployments",
            ResourceName::Services => "services",
            ResourceName::Ingresses => "ingresses",
            ResourceName::Secrets => "secrets",
            ResourceName::ConfigMaps => "configmaps",
            ResourceName::Nodes => "nodes",
            ResourceName::PersistentVolumeClaims => "persistentvolumeclaims",
            ResourceName::StatefulSets => "statefulsets",
            ResourceName::DaemonSets => "daemonsets",
            ResourceName::Jobs => "jobs",
            ResourceName::CronJobs => "cronjobs",
            ResourceName::Events => "events",
        }
    }

    /// Singular kind name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceName::Pods => "Pod",
            ResourceName::Deployments => "Deployment",
            ResourceName::Services => "Service",
            ResourceName::Ingresses => "Ingress",
            ResourceName::Secrets => "Secret",
            ResourceName::ConfigMaps => "ConfigMap",
            ResourceName::Nodes => "Node",
            ResourceName::PersistentVolumeClaims => "PersistentVolumeClaim",
            ResourceName::StatefulSets => "StatefulSet",
            ResourceName::DaemonSets => "DaemonSet",
            ResourceName::Jobs => "Job",
            ResourceName::CronJobs => "CronJob",
            ResourceName::Events => "Event",
        }
    }

    /// API version within the group. All supported kinds are stable `v1`.
    #[must_use]
    pub fn version(&self) -> &'static str {
        "v1"
    }

    /// Dynamic-typing descriptor for building an `Api<DynamicObject>`.
    #[must_use]
    pub fn api_resource(&self) -> ApiResource {
        let group = self.group();
        let version = self.version();
        let api_version = if group.is_empty() {
            version.to_string()
        } else {
            format!("{group}/{version}")
        };
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version,
            kind: self.kind().to_string(),
            plural: self.plural().to_string(),
        }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}
