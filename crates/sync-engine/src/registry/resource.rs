//! Generic per-(context, resource) value store.
//!
//! No resource-specific knowledge and no eviction policy beyond explicit
//! overwrite; the orchestrator removes stale entries when a context is torn
//! down.

use crate::resources::ResourceName;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One entry of the registry, used for bulk enumeration via
/// [`ContextResourceRegistry::get_all`].
#[derive(Debug, Clone)]
pub struct Details<T> {
    /// Owning context
    pub context_name: String,
    /// Resource kind the value belongs to
    pub resource_name: ResourceName,
    /// Stored value
    pub value: T,
}

/// Two-level map `(context, resource) -> T`.
#[derive(Debug)]
pub struct ContextResourceRegistry<T> {
    entries: Mutex<HashMap<String, HashMap<ResourceName, T>>>,
}

impl<T: Clone> ContextResourceRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<ResourceName, T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` for the given context and resource, overwriting any
    /// previous value.
    pub fn set(&self, context: &str, resource: ResourceName, value: T) {
        self.lock()
            .entry(context.to_string())
            .or_default()
            .insert(resource, value);
    }

    /// Point lookup.
    #[must_use]
    pub fn get(&self, context: &str, resource: ResourceName) -> Option<T> {
        self.lock()
            .get(context)
            .and_then(|resources| resources.get(&resource))
            .cloned()
    }

    /// Flatten the two-level map into a list of entries.
    #[must_use]
    pub fn get_all(&self) -> Vec<Details<T>> {
        self.lock()
            .iter()
            .flat_map(|(context, resources)| {
                resources.iter().map(|(resource, value)| Details {
                    context_name: context.clone(),
                    resource_name: *resource,
                    value: value.clone(),
                })
            })
            .collect()
    }

    /// Remove one entry.
    pub fn delete(&self, context: &str, resource: ResourceName) {
        if let Some(resources) = self.lock().get_mut(context) {
            resources.remove(&resource);
        }
    }

    /// Remove every entry belonging to `context`.
    pub fn delete_context(&self, context: &str) {
        self.lock().remove(context);
    }
}

impl<T: Clone> Default for ContextResourceRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
