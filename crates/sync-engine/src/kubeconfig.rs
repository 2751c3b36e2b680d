//! Single-context kubeconfig projection.
//!
//! [`KubeConfigSingleContext`] narrows a full kubeconfig down to exactly one
//! context with its one cluster and one user, suitable for building an API
//! client scoped to that context. Its value equality is the load-bearing
//! primitive for change detection during reconciliation: re-reading a
//! kubeconfig with contexts reordered, or with unrelated contexts added or
//! removed, must not tear down and recreate a context's informers.

use crate::error::SyncError;
use kube::config::{Kubeconfig, NamedContext};

/// Immutable projection of a kubeconfig down to one context/cluster/user triple.
#[derive(Debug, Clone)]
pub struct KubeConfigSingleContext {
    context_name: String,
    namespace: String,
    server_url: String,
    filtered: Kubeconfig,
    // Serialized form of `filtered`; the basis for value equality
    canonical: serde_json::Value,
}

impl KubeConfigSingleContext {
    /// Project `kubeconfig` down to the context named `context_name`.
    ///
    /// The context's namespace defaults to `"default"` when unset. Fails when
    /// the context does not exist, or when it references a cluster or user
    /// missing from the kubeconfig, or when the cluster has no server URL.
    pub fn new(kubeconfig: &Kubeconfig, context_name: &str) -> Result<Self, SyncError> {
        let named = kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .ok_or_else(|| SyncError::ContextNotFound(context_name.to_string()))?;
        let mut context = named.context.clone().ok_or_else(|| SyncError::InvalidContext {
            context: context_name.to_string(),
            reason: "context stanza is empty".to_string(),
        })?;

        let cluster = kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .cloned()
            .ok_or_else(|| SyncError::InvalidContext {
                context: context_name.to_string(),
                reason: format!("references unknown cluster {:?}", context.cluster),
            })?;
        let server_url = cluster
            .cluster
            .as_ref()
            .and_then(|c| c.server.clone())
            .ok_or_else(|| SyncError::InvalidContext {
                context: context_name.to_string(),
                reason: format!("cluster {:?} has no server URL", cluster.name),
            })?;

        // A context without a user is legal (anonymous access); a dangling
        // user reference is not.
        let auth_infos = match context.user.as_deref() {
            None | Some("") => Vec::new(),
            Some(user_name) => {
                let user = kubeconfig
                    .auth_infos
                    .iter()
                    .find(|u| u.name == user_name)
                    .cloned()
                    .ok_or_else(|| SyncError::InvalidContext {
                        context: context_name.to_string(),
                        reason: format!("references unknown user {user_name:?}"),
                    })?;
                vec![user]
            }
        };

        let namespace = context
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        context.namespace = Some(namespace.clone());

        let filtered = Kubeconfig {
            current_context: Some(context_name.to_string()),
            contexts: vec![NamedContext {
                name: context_name.to_string(),
                context: Some(context),
            }],
            clusters: vec![cluster],
            auth_infos,
            ..Kubeconfig::default()
        };
        let canonical = serde_json::to_value(&filtered)?;

        Ok(Self {
            context_name: context_name.to_string(),
            namespace,
            server_url,
            filtered,
            canonical,
        })
    }

    /// Name of the projected context.
    #[must_use]
    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    /// Namespace of the context, defaulted to `"default"`.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// API server URL of the context's cluster.
    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// The filtered kubeconfig, suitable for building an API client.
    #[must_use]
    pub fn kubeconfig(&self) -> &Kubeconfig {
        &self.filtered
    }
}

/// Deep value equality over the filtered, serialized representation.
///
/// Independent of object identity and of the source kubeconfig's ordering or
/// unrelated contexts.
impl PartialEq for KubeConfigSingleContext {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for KubeConfigSingleContext {}
