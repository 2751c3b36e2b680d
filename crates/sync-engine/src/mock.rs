//! Mock collaborators for unit testing.
//!
//! In-memory implementations of the contracts in [`crate::contract`] and
//! [`crate::health`], so the manager and registries can be exercised without a
//! cluster. State lives behind `Arc<Mutex<..>>` so tests can assert on it after
//! handing the mock to the engine.

use crate::contract::{
    InformerHandle, PermissionChecker, PermissionRequest, PermissionVerdict, ResourceEvent,
    ResourceEventKind, ResourceFactory,
};
use crate::error::SyncError;
use crate::health::ReadinessProbe;
use crate::kubeconfig::KubeConfigSingleContext;
use crate::resources::ResourceName;
use kube::config::{
    AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Informer handle that records whether `stop()` was called.
pub struct MockInformerHandle {
    stopped: Arc<AtomicBool>,
}

impl MockInformerHandle {
    /// Create a handle plus the shared flag its `stop()` sets.
    #[must_use]
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let stopped = Arc::new(AtomicBool::new(false));
        (
            Self {
                stopped: Arc::clone(&stopped),
            },
            stopped,
        )
    }
}

#[async_trait::async_trait]
impl InformerHandle for MockInformerHandle {
    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// One informer creation recorded by the [`InformerLedger`].
#[derive(Clone)]
pub struct CreatedInformer {
    /// Context the informer was created for
    pub context: String,
    /// Watched resource kind
    pub resource: ResourceName,
    /// Set once the informer's `stop()` ran
    pub stopped: Arc<AtomicBool>,
}

/// Shared record of every informer the mock factories created.
#[derive(Default)]
pub struct InformerLedger {
    created: Mutex<Vec<CreatedInformer>>,
}

impl InformerLedger {
    /// New empty ledger.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, context: &str, resource: ResourceName, stopped: Arc<AtomicBool>) {
        lock(&self.created).push(CreatedInformer {
            context: context.to_string(),
            resource,
            stopped,
        });
    }

    /// Total number of informers ever created.
    #[must_use]
    pub fn total_created(&self) -> usize {
        lock(&self.created).len()
    }

    /// Resource kinds with a created-and-not-stopped informer for `context`.
    #[must_use]
    pub fn live_for(&self, context: &str) -> Vec<ResourceName> {
        lock(&self.created)
            .iter()
            .filter(|entry| entry.context == context && !entry.stopped.load(Ordering::SeqCst))
            .map(|entry| entry.resource)
            .collect()
    }

    /// Every creation recorded for `context`, stopped or not.
    #[must_use]
    pub fn created_for(&self, context: &str) -> Vec<ResourceName> {
        lock(&self.created)
            .iter()
            .filter(|entry| entry.context == context)
            .map(|entry| entry.resource)
            .collect()
    }
}

/// Factory producing [`MockInformerHandle`]s and recording them in a ledger.
pub struct MockResourceFactory {
    resource: ResourceName,
    ledger: Arc<InformerLedger>,
    fail: bool,
    seed_objects: Vec<String>,
}

impl MockResourceFactory {
    /// Factory whose informers always start successfully.
    #[must_use]
    pub fn new(resource: ResourceName, ledger: Arc<InformerLedger>) -> Self {
        Self {
            resource,
            ledger,
            fail: false,
            seed_objects: Vec::new(),
        }
    }

    /// Factory whose `create_informer` always errors.
    #[must_use]
    pub fn failing(resource: ResourceName, ledger: Arc<InformerLedger>) -> Self {
        Self {
            resource,
            ledger,
            fail: true,
            seed_objects: Vec::new(),
        }
    }

    /// Emit an `Applied` event for each given object as soon as an informer
    /// starts, simulating the initial listing.
    #[must_use]
    pub fn with_objects(mut self, objects: &[&str]) -> Self {
        self.seed_objects = objects.iter().map(|s| (*s).to_string()).collect();
        self
    }
}

#[async_trait::async_trait]
impl ResourceFactory for MockResourceFactory {
    fn resource(&self) -> ResourceName {
        self.resource
    }

    fn permissions(&self) -> Vec<PermissionRequest> {
        vec![PermissionRequest {
            group: self.resource.group().to_string(),
            resource: self.resource.plural().to_string(),
            verb: "watch".to_string(),
        }]
    }

    async fn create_informer(
        &self,
        config: &KubeConfigSingleContext,
        events: mpsc::UnboundedSender<ResourceEvent>,
    ) -> Result<Box<dyn InformerHandle>, SyncError> {
        if self.fail {
            return Err(SyncError::InvalidConfig(format!(
                "mock informer for {} refused to start",
                self.resource
            )));
        }
        let (handle, stopped) = MockInformerHandle::new();
        self.ledger
            .record(config.context_name(), self.resource, stopped);
        for object in &self.seed_objects {
            let _ = events.send(ResourceEvent {
                context: config.context_name().to_string(),
                resource: self.resource,
                kind: ResourceEventKind::Applied,
                object: object.clone(),
            });
        }
        Ok(Box::new(handle))
    }
}

/// Permission checker with a configurable deny-list of plural resource names.
#[derive(Default)]
pub struct MockPermissionChecker {
    denied: Mutex<HashSet<String>>,
}

impl MockPermissionChecker {
    /// Checker that permits everything.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Deny `watch` on the given plural resource name.
    pub fn deny(&self, resource: &str) {
        lock(&self.denied).insert(resource.to_string());
    }
}

#[async_trait::async_trait]
impl PermissionChecker for MockPermissionChecker {
    async fn can_watch(
        &self,
        _config: &KubeConfigSingleContext,
        requests: &[PermissionRequest],
    ) -> Result<Vec<PermissionVerdict>, SyncError> {
        let denied = lock(&self.denied);
        Ok(requests
            .iter()
            .map(|request| {
                let permitted = !denied.contains(&request.resource);
                PermissionVerdict {
                    permitted,
                    reason: (!permitted).then(|| "denied by mock RBAC".to_string()),
                }
            })
            .collect())
    }
}

/// What a [`ScriptedProbe`] does when asked about a server.
pub enum ProbeBehavior {
    /// Always answer with this readiness value
    Ready(bool),
    /// Always return a probe error
    Fail,
    /// Never resolve (exercises timeouts and cancellation)
    Hang,
    /// Pop answers from the front, then fall back to the given value
    Sequence(VecDeque<bool>, bool),
}

/// Readiness probe driven by per-server scripts.
pub struct ScriptedProbe {
    default: Mutex<ProbeBehavior>,
    servers: Mutex<HashMap<String, ProbeBehavior>>,
    calls: Mutex<HashMap<String, u64>>,
}

impl ScriptedProbe {
    fn with_default(default: ProbeBehavior) -> Self {
        Self {
            default: Mutex::new(default),
            servers: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Probe answering every server with the same readiness value.
    #[must_use]
    pub fn always(ready: bool) -> Self {
        Self::with_default(ProbeBehavior::Ready(ready))
    }

    /// Probe erroring on every call.
    #[must_use]
    pub fn failing() -> Self {
        Self::with_default(ProbeBehavior::Fail)
    }

    /// Probe that never resolves.
    #[must_use]
    pub fn hanging() -> Self {
        Self::with_default(ProbeBehavior::Hang)
    }

    /// Script a specific server's behavior; other servers use the default.
    pub fn set_server(&self, server_url: &str, behavior: ProbeBehavior) {
        lock(&self.servers).insert(server_url.to_string(), behavior);
    }

    /// Number of probes issued against `server_url` so far.
    #[must_use]
    pub fn probe_count(&self, server_url: &str) -> u64 {
        lock(&self.calls).get(server_url).copied().unwrap_or(0)
    }

    fn next_outcome(&self, server_url: &str) -> Result<Option<bool>, SyncError> {
        *lock(&self.calls).entry(server_url.to_string()).or_insert(0) += 1;

        let mut servers = lock(&self.servers);
        if let Some(behavior) = servers.get_mut(server_url) {
            return Self::eval(behavior, server_url);
        }
        drop(servers);
        Self::eval(&mut lock(&self.default), server_url)
    }

    fn eval(behavior: &mut ProbeBehavior, server_url: &str) -> Result<Option<bool>, SyncError> {
        match behavior {
            ProbeBehavior::Ready(ready) => Ok(Some(*ready)),
            ProbeBehavior::Fail => Err(SyncError::InvalidConfig(format!(
                "scripted probe failure for {server_url}"
            ))),
            ProbeBehavior::Hang => Ok(None),
            ProbeBehavior::Sequence(queue, fallback) => {
                Ok(Some(queue.pop_front().unwrap_or(*fallback)))
            }
        }
    }
}

#[async_trait::async_trait]
impl ReadinessProbe for ScriptedProbe {
    async fn probe(&self, server_url: &str, _timeout: Duration) -> Result<bool, SyncError> {
        match self.next_outcome(server_url)? {
            Some(ready) => Ok(ready),
            None => {
                // Hang until the caller times out or cancels
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
        }
    }
}

/// Build an in-memory kubeconfig with one `(name, server_url)` context per entry.
#[must_use]
pub fn kubeconfig_with_contexts(contexts: &[(&str, &str)]) -> Kubeconfig {
    let mut config = Kubeconfig {
        current_context: contexts.first().map(|(name, _)| (*name).to_string()),
        ..Kubeconfig::default()
    };
    for (name, server) in contexts {
        let cluster_name = format!("{name}-cluster");
        let user_name = format!("{name}-user");
        config.clusters.push(NamedCluster {
            name: cluster_name.clone(),
            cluster: Some(Cluster {
                server: Some((*server).to_string()),
                ..Cluster::default()
            }),
        });
        config.auth_infos.push(NamedAuthInfo {
            name: user_name.clone(),
            auth_info: Some(AuthInfo::default()),
        });
        config.contexts.push(NamedContext {
            name: (*name).to_string(),
            context: Some(Context {
                cluster: cluster_name,
                user: Some(user_name),
                ..Context::default()
            }),
        });
    }
    config
}
