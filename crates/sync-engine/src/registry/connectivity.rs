//! Per-context connectivity state.
//!
//! Mutated exclusively by the connectivity probe cycle; read-only to every
//! other component. A context absent from the registry reads as all-false,
//! never as a null/undefined ambiguity.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Connectivity snapshot of one context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextConnectivity {
    /// A readiness probe is currently in flight
    pub checking: bool,
    /// The last completed probe reported the cluster reachable
    pub reachable: bool,
}

/// Registry of `{checking, reachable}` records keyed by context name.
#[derive(Debug, Default)]
pub struct ContextsConnectivityRegistry {
    entries: Mutex<HashMap<String, ContextConnectivity>>,
}

impl ContextsConnectivityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ContextConnectivity>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Update only the `checking` flag, preserving `reachable`.
    pub fn set_checking(&self, context: &str, checking: bool) {
        self.lock().entry(context.to_string()).or_default().checking = checking;
    }

    /// Update only the `reachable` flag, preserving `checking`.
    pub fn set_reachable(&self, context: &str, reachable: bool) {
        self.lock()
            .entry(context.to_string())
            .or_default()
            .reachable = reachable;
    }

    /// Current snapshot for `context`; all-false when the context is unknown.
    #[must_use]
    pub fn get(&self, context: &str) -> ContextConnectivity {
        self.lock().get(context).copied().unwrap_or_default()
    }

    /// Drop a context's record. Called by the orchestrator when the context
    /// leaves the kubeconfig so renamed or ephemeral contexts don't accumulate.
    pub fn remove(&self, context: &str) {
        self.lock().remove(context);
    }

    /// Names of all contexts with a recorded entry.
    #[must_use]
    pub fn context_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}
