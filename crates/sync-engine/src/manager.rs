//! Contexts manager: the orchestrator.
//!
//! Given a full kubeconfig, the manager makes the live informer and
//! connectivity state match the desired state, continuously, as both the
//! kubeconfig and the consumers' resource interest change over time.
//!
//! One reconciliation loop runs per context, independently: a slow or
//! unreachable cluster never delays its siblings. Within one context the loop
//! is an actor - health check, backoff wait, informer management and interest
//! commands are all serialized through it, so a context's state transitions
//! are totally ordered. Probe results and registry writes from a superseded
//! incarnation of a context (rapid remove-and-re-add) are discarded via a
//! per-context generation counter.

use crate::backoff::Backoff;
use crate::contract::{PermissionChecker, ResourceEvent, ResourceEventKind, ResourceFactory};
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::health::{HealthChecker, ReadinessProbe};
use crate::kubeconfig::KubeConfigSingleContext;
use crate::registry::connectivity::{ContextConnectivity, ContextsConnectivityRegistry};
use crate::registry::informers::ContextsInformersRegistry;
use crate::registry::resource::ContextResourceRegistry;
use crate::resources::ResourceName;
use kube::config::Kubeconfig;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Externally-visible aggregate state of one context.
///
/// Derived and recomputed on every relevant state change; consumers receive
/// owned snapshots and never mutate them in place.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextGeneralState {
    /// A readiness probe is currently in flight
    pub checking: bool,
    /// The context's cluster answered its last probe
    pub reachable: bool,
    /// Informational description of the last readiness failure, if any
    pub error: Option<String>,
    /// Object counts per currently watched resource kind
    pub resources: BTreeMap<ResourceName, u64>,
}

/// Tunables for the manager's probe and backoff cycle.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Timeout applied to each readiness probe
    pub health_check_timeout: Duration,
    /// Re-probe cadence while a context is reachable
    pub probe_interval: Duration,
    /// Initial reconnect backoff in milliseconds
    pub backoff_initial_ms: u64,
    /// Backoff growth factor
    pub backoff_multiplier: u64,
    /// Backoff ceiling in milliseconds
    pub backoff_max_ms: u64,
    /// Upper bound (exclusive) of the random jitter added to each backoff step
    pub backoff_jitter_ms: u64,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            health_check_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_secs(10),
            backoff_initial_ms: 1000,
            backoff_multiplier: 2,
            backoff_max_ms: 60_000,
            backoff_jitter_ms: 300,
        }
    }
}

enum ContextCommand {
    ResourceInterestChanged,
}

struct ContextRuntime {
    config: KubeConfigSingleContext,
    commands: mpsc::UnboundedSender<ContextCommand>,
    task: JoinHandle<()>,
}

/// Orchestrates per-context watch lifecycles across a multi-context kubeconfig.
pub struct ContextsManager {
    inner: Arc<ManagerInner>,
    contexts: tokio::sync::Mutex<HashMap<String, ContextRuntime>>,
    aggregator: Mutex<Option<JoinHandle<()>>>,
}

struct ManagerInner {
    informers: ContextsInformersRegistry,
    connectivity: ContextsConnectivityRegistry,
    resources: ContextResourceRegistry<BTreeSet<String>>,
    factories: Vec<Arc<dyn ResourceFactory>>,
    permissions: Arc<dyn PermissionChecker>,
    probe: Arc<dyn ReadinessProbe>,
    bus: EventBus,
    settings: ManagerSettings,
    // Secondary resources a consumer currently cares about
    subscriptions: Mutex<BTreeSet<ResourceName>>,
    // Monotonic per-context incarnation counters; stale loops compare against
    // these before every shared-state write
    generations: Mutex<HashMap<String, u64>>,
    // Last readiness failure per context, feeding ContextGeneralState::error
    errors: Mutex<HashMap<String, String>>,
    events_tx: mpsc::UnboundedSender<ResourceEvent>,
}

impl ContextsManager {
    /// Create a manager with its own registries and event bus.
    ///
    /// Must be called within a tokio runtime; the manager spawns an internal
    /// task that folds informer change events into per-resource counts.
    #[must_use]
    pub fn new(
        factories: Vec<Arc<dyn ResourceFactory>>,
        permissions: Arc<dyn PermissionChecker>,
        probe: Arc<dyn ReadinessProbe>,
        settings: ManagerSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ManagerInner {
            informers: ContextsInformersRegistry::new(),
            connectivity: ContextsConnectivityRegistry::new(),
            resources: ContextResourceRegistry::new(),
            factories,
            permissions,
            probe,
            bus: EventBus::default(),
            settings,
            subscriptions: Mutex::new(BTreeSet::new()),
            generations: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            events_tx,
        });
        let aggregator = tokio::spawn(run_event_aggregator(Arc::clone(&inner), events_rx));
        Self {
            inner,
            contexts: tokio::sync::Mutex::new(HashMap::new()),
            aggregator: Mutex::new(Some(aggregator)),
        }
    }

    /// Subscribe to state-change events published by this manager.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.bus.subscribe()
    }

    /// Reconcile the live context set against `kubeconfig`.
    ///
    /// Contexts are diffed by single-context value equality, not by name
    /// alone: a context whose cluster, user or namespace changed is torn down
    /// and recreated, while reordering or unrelated edits leave it untouched.
    /// Unusable contexts (dangling cluster/user references) are skipped with a
    /// warning rather than failing the whole pass.
    pub async fn apply_kubeconfig(&self, kubeconfig: &Kubeconfig) -> Result<(), SyncError> {
        let mut desired: HashMap<String, KubeConfigSingleContext> = HashMap::new();
        for named in &kubeconfig.contexts {
            match KubeConfigSingleContext::new(kubeconfig, &named.name) {
                Ok(single) => {
                    desired.insert(named.name.clone(), single);
                }
                Err(error) => {
                    warn!(context = %named.name, %error, "skipping unusable context");
                }
            }
        }

        let mut contexts = self.contexts.lock().await;

        let existing: Vec<String> = contexts.keys().cloned().collect();
        for name in existing {
            let unchanged = desired.get(&name).is_some_and(|single| {
                contexts
                    .get(&name)
                    .is_some_and(|runtime| runtime.config == *single)
            });
            if unchanged {
                desired.remove(&name);
            } else if desired.contains_key(&name) {
                info!(context = %name, "context changed, recreating");
                self.remove_context(&mut contexts, &name).await;
            } else {
                info!(context = %name, "context removed from kubeconfig");
                self.remove_context(&mut contexts, &name).await;
            }
        }

        for (name, single) in desired {
            info!(context = %name, server = %single.server_url(), "context added");
            self.start_context(&mut contexts, name, single);
        }
        Ok(())
    }

    /// Register or withdraw consumer interest in a secondary resource.
    ///
    /// Primary resources are always watched; calls naming one are ignored.
    /// Interest changes do not trigger a full reconciliation pass - each
    /// reachable context adjusts just the affected informers, serialized
    /// through its own loop.
    pub async fn set_resource_interest(&self, resource: ResourceName, interested: bool) {
        if resource.is_primary() {
            debug!(%resource, "primary resources are always watched");
            return;
        }
        let changed = {
            let mut subscriptions = lock(&self.inner.subscriptions);
            if interested {
                subscriptions.insert(resource)
            } else {
                subscriptions.remove(&resource)
            }
        };
        if !changed {
            return;
        }
        info!(%resource, interested, "resource interest changed");
        let contexts = self.contexts.lock().await;
        for runtime in contexts.values() {
            let _ = runtime.commands.send(ContextCommand::ResourceInterestChanged);
        }
    }

    /// Connectivity snapshot for a context (all-false when unknown).
    #[must_use]
    pub fn connectivity(&self, context: &str) -> ContextConnectivity {
        self.inner.connectivity.get(context)
    }

    /// Aggregated general state for a context.
    #[must_use]
    pub fn general_state(&self, context: &str) -> ContextGeneralState {
        self.inner.general_state(context)
    }

    /// General state of every managed context, keyed by context name.
    #[must_use]
    pub fn general_states(&self) -> BTreeMap<String, ContextGeneralState> {
        self.inner
            .informers
            .context_names()
            .into_iter()
            .map(|name| {
                let state = self.inner.general_state(&name);
                (name, state)
            })
            .collect()
    }

    /// Names of all currently managed contexts.
    #[must_use]
    pub fn context_names(&self) -> Vec<String> {
        self.inner.informers.context_names()
    }

    /// Whether an informer is currently live for the given slot.
    #[must_use]
    pub fn is_watched(&self, context: &str, resource: ResourceName) -> bool {
        self.inner.informers.has_informer(context, resource)
    }

    #[cfg(test)]
    pub(crate) fn resource_events_sender(&self) -> mpsc::UnboundedSender<ResourceEvent> {
        self.inner.events_tx.clone()
    }

    /// Tear down every context: cancel in-flight probes, stop all informers,
    /// and drop all registry entries.
    pub async fn dispose(&self) {
        if let Some(task) = lock(&self.aggregator).take() {
            task.abort();
        }
        let mut contexts = self.contexts.lock().await;
        let names: Vec<String> = contexts.keys().cloned().collect();
        for name in names {
            self.remove_context(&mut contexts, &name).await;
        }
    }

    fn start_context(
        &self,
        contexts: &mut HashMap<String, ContextRuntime>,
        name: String,
        config: KubeConfigSingleContext,
    ) {
        let generation = self.inner.next_generation(&name);
        self.inner.informers.set_informers(&name, Some(HashMap::new()));
        self.inner.connectivity.set_checking(&name, true);
        self.inner.publish_connectivity(&name);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_context_loop(
            Arc::clone(&self.inner),
            name.clone(),
            generation,
            config.clone(),
            commands_rx,
        ));
        contexts.insert(
            name,
            ContextRuntime {
                config,
                commands: commands_tx,
                task,
            },
        );
    }

    async fn remove_context(&self, contexts: &mut HashMap<String, ContextRuntime>, name: &str) {
        let Some(runtime) = contexts.remove(name) else {
            return;
        };
        // Invalidate the loop's generation first so any interleaved write from
        // it is discarded, then cancel the loop itself
        self.inner.bump_generation(name);
        runtime.task.abort();
        let _ = runtime.task.await;
        self.inner.informers.delete_context_informers(name).await;
        self.inner.connectivity.remove(name);
        self.inner.resources.delete_context(name);
        lock(&self.inner.errors).remove(name);
        // Subscribers observe the teardown as the documented all-false default
        self.inner.publish_connectivity(name);
    }
}

impl std::fmt::Debug for ContextsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextsManager")
            .field("contexts", &self.inner.informers.context_names())
            .finish_non_exhaustive()
    }
}

impl ManagerInner {
    fn next_generation(&self, name: &str) -> u64 {
        let mut generations = lock(&self.generations);
        let entry = generations.entry(name.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn bump_generation(&self, name: &str) {
        let mut generations = lock(&self.generations);
        *generations.entry(name.to_string()).or_insert(0) += 1;
    }

    fn is_current(&self, name: &str, generation: u64) -> bool {
        lock(&self.generations).get(name).copied() == Some(generation)
    }

    fn subscriptions_snapshot(&self) -> BTreeSet<ResourceName> {
        lock(&self.subscriptions).clone()
    }

    fn error_of(&self, name: &str) -> Option<String> {
        lock(&self.errors).get(name).cloned()
    }

    fn general_state(&self, name: &str) -> ContextGeneralState {
        let connectivity = self.connectivity.get(name);
        let mut resources = BTreeMap::new();
        for details in self.resources.get_all() {
            if details.context_name == name {
                resources.insert(details.resource_name, details.value.len() as u64);
            }
        }
        ContextGeneralState {
            checking: connectivity.checking,
            reachable: connectivity.reachable,
            error: self.error_of(name),
            resources,
        }
    }

    fn publish_connectivity(&self, name: &str) {
        self.bus.publish(SyncEvent::ConnectivityChanged {
            context: name.to_string(),
            connectivity: self.connectivity.get(name),
        });
    }

    fn publish_general_state(&self, name: &str) {
        self.bus.publish(SyncEvent::GeneralStateChanged {
            context: name.to_string(),
            state: self.general_state(name),
        });
    }

    /// Guarded `checking := true`. Returns false when the loop is stale.
    fn mark_checking(&self, name: &str, generation: u64) -> bool {
        {
            let generations = lock(&self.generations);
            if generations.get(name).copied() != Some(generation) {
                return false;
            }
            self.connectivity.set_checking(name, true);
        }
        self.publish_connectivity(name);
        true
    }

    /// Guarded recording of a probe outcome. Returns false when stale.
    fn mark_probe_result(&self, name: &str, generation: u64, reachable: bool) -> bool {
        {
            let generations = lock(&self.generations);
            if generations.get(name).copied() != Some(generation) {
                return false;
            }
            self.connectivity.set_reachable(name, reachable);
            self.connectivity.set_checking(name, false);
        }
        if reachable {
            lock(&self.errors).remove(name);
        } else {
            lock(&self.errors).insert(name.to_string(), "readiness check failed".to_string());
        }
        self.publish_connectivity(name);
        true
    }

    /// Create the primary informers plus any subscribed secondaries for a
    /// freshly reachable context. Returns false when the loop is stale.
    async fn ensure_informers(
        &self,
        name: &str,
        generation: u64,
        config: &KubeConfigSingleContext,
        permitted: &mut HashMap<ResourceName, bool>,
    ) -> bool {
        let subscribed = self.subscriptions_snapshot();
        for factory in &self.factories {
            let resource = factory.resource();
            if !resource.is_primary() && !subscribed.contains(&resource) {
                continue;
            }
            if !self.is_current(name, generation) {
                return false;
            }
            self.ensure_informer(name, config, factory, permitted).await;
        }
        self.is_current(name, generation)
    }

    /// Converge a context's secondary informers onto the current subscription
    /// set. Returns false when the loop is stale.
    async fn sync_secondary_informers(
        &self,
        name: &str,
        generation: u64,
        config: &KubeConfigSingleContext,
        permitted: &mut HashMap<ResourceName, bool>,
    ) -> bool {
        let subscribed = self.subscriptions_snapshot();
        let stale: Vec<ResourceName> = self
            .informers
            .resource_names(name)
            .into_iter()
            .filter(|resource| !resource.is_primary() && !subscribed.contains(resource))
            .collect();
        if !stale.is_empty() {
            self.informers.dispose_secondary_informers(name).await;
            for resource in &stale {
                self.resources.delete(name, *resource);
            }
        }
        for factory in &self.factories {
            let resource = factory.resource();
            if resource.is_primary() || !subscribed.contains(&resource) {
                continue;
            }
            if !self.is_current(name, generation) {
                return false;
            }
            self.ensure_informer(name, config, factory, permitted).await;
        }
        self.publish_general_state(name);
        self.is_current(name, generation)
    }

    /// Create and install one informer if the slot is empty and the RBAC check
    /// passes. Failures are isolated per (context, resource) pair: an error
    /// here never prevents other resources from being watched.
    async fn ensure_informer(
        &self,
        name: &str,
        config: &KubeConfigSingleContext,
        factory: &Arc<dyn ResourceFactory>,
        permitted: &mut HashMap<ResourceName, bool>,
    ) {
        let resource = factory.resource();
        if self.informers.has_informer(name, resource) {
            return;
        }

        // Permission checks run once per context incarnation; RBAC rarely
        // changes mid-session, so denials are not retried
        let allowed = match permitted.get(&resource) {
            Some(allowed) => *allowed,
            None => {
                let allowed = match self.permissions.can_watch(config, &factory.permissions()).await
                {
                    Ok(verdicts) => {
                        let allowed =
                            !verdicts.is_empty() && verdicts.iter().all(|v| v.permitted);
                        if !allowed {
                            let reason = verdicts.iter().find_map(|v| v.reason.clone());
                            info!(context = name, %resource, ?reason, "watch not permitted");
                        }
                        allowed
                    }
                    Err(error) => {
                        warn!(context = name, %resource, %error, "permission check failed, skipping resource");
                        false
                    }
                };
                permitted.insert(resource, allowed);
                allowed
            }
        };
        if !allowed {
            return;
        }

        match factory.create_informer(config, self.events_tx.clone()).await {
            Ok(informer) => {
                match self.informers.set_resource_informer(name, resource, informer) {
                    Ok(Some(previous)) => previous.stop().await,
                    Ok(None) => {}
                    Err(error) => {
                        // Context was torn down between creation and install;
                        // dropping the handle releases its watch (InformerHandle
                        // contract)
                        debug!(context = name, %resource, %error, "discarding informer for removed context");
                    }
                }
            }
            Err(error) => {
                warn!(context = name, %resource, %error, "failed to create informer");
            }
        }
    }
}

/// One reconciliation loop per context: probe, then either watch or back off.
async fn run_context_loop(
    inner: Arc<ManagerInner>,
    name: String,
    generation: u64,
    config: KubeConfigSingleContext,
    mut commands: mpsc::UnboundedReceiver<ContextCommand>,
) {
    let (readiness_tx, mut readiness_rx) = mpsc::unbounded_channel();
    let checker = HealthChecker::new(
        config.server_url().to_string(),
        Arc::clone(&inner.probe),
        readiness_tx,
    );
    let mut backoff = Backoff::new(
        inner.settings.backoff_initial_ms,
        inner.settings.backoff_multiplier,
        inner.settings.backoff_max_ms,
        inner.settings.backoff_jitter_ms,
    );
    let mut permitted: HashMap<ResourceName, bool> = HashMap::new();

    loop {
        if !inner.mark_checking(&name, generation) {
            break;
        }
        checker
            .check_readiness(inner.settings.health_check_timeout)
            .await;
        let Some(ready) = readiness_rx.recv().await else {
            break;
        };
        if !inner.mark_probe_result(&name, generation, ready) {
            break;
        }

        if ready {
            debug!(context = %name, "cluster reachable");
            if !inner
                .ensure_informers(&name, generation, &config, &mut permitted)
                .await
            {
                break;
            }
            backoff.reset();
            inner.publish_general_state(&name);

            // Idle until the next probe tick, serving interest changes
            let sleep = tokio::time::sleep(inner.settings.probe_interval);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    () = &mut sleep => break,
                    command = commands.recv() => match command {
                        None => {
                            checker.dispose();
                            return;
                        }
                        Some(ContextCommand::ResourceInterestChanged) => {
                            if !inner
                                .sync_secondary_informers(&name, generation, &config, &mut permitted)
                                .await
                            {
                                checker.dispose();
                                return;
                            }
                        }
                    }
                }
            }
        } else {
            // Stale watches on an unreachable cluster are assumed invalid
            inner.informers.clear_context_informers(&name).await;
            inner.resources.delete_context(&name);
            inner.publish_general_state(&name);

            let delay = Duration::from_millis(backoff.get());
            debug!(context = %name, ?delay, "cluster not reachable, retrying after backoff");
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    () = &mut sleep => break,
                    command = commands.recv() => match command {
                        None => {
                            checker.dispose();
                            return;
                        }
                        // Picked up from the subscription set on the next
                        // successful probe
                        Some(ContextCommand::ResourceInterestChanged) => {}
                    }
                }
            }
        }
    }
    checker.dispose();
}

/// Folds informer change events into per-resource object sets and republishes
/// the affected context's general state.
async fn run_event_aggregator(
    inner: Arc<ManagerInner>,
    mut events: mpsc::UnboundedReceiver<ResourceEvent>,
) {
    while let Some(event) = events.recv().await {
        // Events racing a context teardown are dropped, as are events still
        // queued from informers that were stopped when the context went
        // unreachable; those must not re-insert counts the loop just deleted.
        if !inner.informers.has_context(&event.context)
            || !inner.connectivity.get(&event.context).reachable
        {
            continue;
        }
        let mut objects = inner
            .resources
            .get(&event.context, event.resource)
            .unwrap_or_default();
        match event.kind {
            ResourceEventKind::Applied => {
                objects.insert(event.object);
            }
            ResourceEventKind::Deleted => {
                objects.remove(&event.object);
            }
        }
        inner.resources.set(&event.context, event.resource, objects);
        inner.publish_general_state(&event.context);
    }
}
