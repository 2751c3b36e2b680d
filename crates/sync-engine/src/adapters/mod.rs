//! kube-client implementations of the engine's collaborator contracts.
//!
//! Everything here builds on a client scoped to exactly one context via
//! [`client_for`]; the engine never talks to a cluster through the ambient
//! in-cluster or default-context configuration.

mod informer;
mod permissions;

pub use informer::{KubeInformerHandle, KubeResourceFactory};
pub use permissions::SelfSubjectAccessReviewChecker;

use crate::contract::ResourceFactory;
use crate::error::SyncError;
use crate::kubeconfig::KubeConfigSingleContext;
use crate::resources::ResourceName;
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use std::sync::Arc;

/// Build an API client for one context from its filtered kubeconfig.
pub async fn client_for(config: &KubeConfigSingleContext) -> Result<Client, SyncError> {
    let options = KubeConfigOptions {
        context: Some(config.context_name().to_string()),
        ..KubeConfigOptions::default()
    };
    let client_config =
        Config::from_custom_kubeconfig(config.kubeconfig().clone(), &options).await?;
    Ok(Client::try_from(client_config)?)
}

/// One [`KubeResourceFactory`] per resource kind the engine knows about.
#[must_use]
pub fn standard_factories() -> Vec<Arc<dyn ResourceFactory>> {
    ResourceName::ALL
        .into_iter()
        .map(|resource| Arc::new(KubeResourceFactory::new(resource)) as Arc<dyn ResourceFactory>)
        .collect()
}
