//! Ownership registry for live informers.
//!
//! Owns the `context -> resource -> informer` map and is the single place
//! informers are installed, replaced, and torn down. A context must be
//! initialized with an informer map (even an empty one) before individual
//! resource informers can be attached; attaching first is an ordering bug in
//! the orchestrator and fails fast. Every disposal path awaits each informer's
//! `stop()` before the context is considered torn down, so no watch callback
//! fires after a context is reported gone.

use crate::contract::InformerHandle;
use crate::error::SyncError;
use crate::resources::ResourceName;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

type InformerMap = HashMap<ResourceName, Box<dyn InformerHandle>>;

/// Registry of live informers per context and resource kind.
///
/// At most one informer exists per (context, resource) slot; installing into an
/// occupied slot hands the previous handle back to the caller, which must stop
/// it to avoid duplicate watch streams.
#[derive(Default)]
pub struct ContextsInformersRegistry {
    contexts: Mutex<HashMap<String, InformerMap>>,
}

impl ContextsInformersRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, InformerMap>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the context has an informer map (possibly empty).
    #[must_use]
    pub fn has_context(&self, context: &str) -> bool {
        self.lock().contains_key(context)
    }

    /// Whether an informer is live for the given slot.
    #[must_use]
    pub fn has_informer(&self, context: &str, resource: ResourceName) -> bool {
        self.lock()
            .get(context)
            .is_some_and(|informers| informers.contains_key(&resource))
    }

    /// Names of all registered contexts.
    #[must_use]
    pub fn context_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Resource kinds with a live informer in `context`.
    #[must_use]
    pub fn resource_names(&self, context: &str) -> Vec<ResourceName> {
        self.lock()
            .get(context)
            .map(|informers| informers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Install a whole per-context informer map.
    ///
    /// Passing `None` is a no-op: a guard against accidentally clearing a
    /// context's informers.
    pub fn set_informers(&self, context: &str, informers: Option<InformerMap>) {
        if let Some(informers) = informers {
            self.lock().insert(context.to_string(), informers);
        }
    }

    /// Attach one resource informer to an already-initialized context.
    ///
    /// Returns the previously installed handle for that slot, if any; the
    /// caller must stop it. Fails with [`SyncError::ContextNotInitialized`]
    /// when the context has no informer map yet.
    pub fn set_resource_informer(
        &self,
        context: &str,
        resource: ResourceName,
        informer: Box<dyn InformerHandle>,
    ) -> Result<Option<Box<dyn InformerHandle>>, SyncError> {
        let mut contexts = self.lock();
        match contexts.get_mut(context) {
            Some(informers) => Ok(informers.insert(resource, informer)),
            None => Err(SyncError::ContextNotInitialized(context.to_string())),
        }
    }

    /// Stop and remove only the secondary-resource informers of a context,
    /// leaving primary ones running. Used when the consumer that needed the
    /// secondary resources goes away, without tearing down the baseline watch.
    pub async fn dispose_secondary_informers(&self, context: &str) {
        let handles = {
            let mut contexts = self.lock();
            let Some(informers) = contexts.get_mut(context) else {
                return;
            };
            let secondary: Vec<ResourceName> = informers
                .keys()
                .copied()
                .filter(|resource| !resource.is_primary())
                .collect();
            let mut handles = Vec::with_capacity(secondary.len());
            for resource in secondary {
                if let Some(handle) = informers.remove(&resource) {
                    handles.push(handle);
                }
            }
            handles
        };
        for handle in &handles {
            handle.stop().await;
        }
    }

    /// Stop and remove every informer of a context, keeping its (now empty)
    /// informer map. Used when a context becomes unreachable: its watches are
    /// assumed stale, but the context itself is still present.
    pub async fn clear_context_informers(&self, context: &str) {
        let handles: Vec<Box<dyn InformerHandle>> = {
            let mut contexts = self.lock();
            match contexts.get_mut(context) {
                Some(informers) => informers.drain().map(|(_, handle)| handle).collect(),
                None => return,
            }
        };
        for handle in &handles {
            handle.stop().await;
        }
    }

    /// Stop every informer of a context and remove the context entry entirely.
    /// Used when the context is removed from the kubeconfig.
    pub async fn delete_context_informers(&self, context: &str) {
        let handles: Vec<Box<dyn InformerHandle>> = {
            let mut contexts = self.lock();
            match contexts.remove(context) {
                Some(informers) => informers.into_values().collect(),
                None => return,
            }
        };
        for handle in &handles {
            handle.stop().await;
        }
    }
}

impl std::fmt::Debug for ContextsInformersRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextsInformersRegistry")
            .field("contexts", &self.context_names())
            .finish()
    }
}
