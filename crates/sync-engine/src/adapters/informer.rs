//! Watch-based informers over dynamically-typed APIs.
//!
//! One informer is one spawned task driving a `watcher` stream over
//! `Api<DynamicObject>`. Using the dynamic API keeps the factory generic over
//! every [`ResourceName`] without a per-kind type parameter, at the cost of
//! carrying the `ApiResource` descriptor explicitly.

use crate::contract::{
    InformerHandle, PermissionRequest, ResourceEvent, ResourceEventKind, ResourceFactory,
};
use crate::error::SyncError;
use crate::kubeconfig::KubeConfigSingleContext;
use crate::resources::ResourceName;
use futures::{StreamExt, TryStreamExt};
use kube::api::{Api, DynamicObject};
use kube::ResourceExt;
use kube_runtime::{watcher, WatchStreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Factory creating watch streams for one resource kind.
#[derive(Debug, Clone, Copy)]
pub struct KubeResourceFactory {
    resource: ResourceName,
}

impl KubeResourceFactory {
    /// Factory for the given kind.
    #[must_use]
    pub fn new(resource: ResourceName) -> Self {
        Self { resource }
    }
}

#[async_trait::async_trait]
impl ResourceFactory for KubeResourceFactory {
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
        let client = super::client_for(config).await?;
        let api_resource = self.resource.api_resource();
        let api: Api<DynamicObject> = if self.resource.is_namespaced() {
            Api::namespaced_with(client, config.namespace(), &api_resource)
        } else {
            Api::all_with(client, &api_resource)
        };

        let context = config.context_name().to_string();
        let resource = self.resource;
        let task = tokio::spawn(async move {
            // Transient watch errors back off and resubscribe inside the
            // stream; the task only ends when it is stopped or the event
            // receiver goes away.
            let mut stream = watcher(api, watcher::Config::default())
                .default_backoff()
                .boxed();
            loop {
                match stream.try_next().await {
                    Ok(Some(event)) => {
                        if !forward(&context, resource, event, &events) {
                            debug!(context = %context, %resource, "event receiver gone, stopping watch");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!(context = %context, %resource, %error, "watch stream error");
                    }
                }
            }
        });
        Ok(Box::new(KubeInformerHandle::new(task)))
    }
}

/// Translate one watcher event into engine events. Returns false once the
/// receiver side of the channel is gone.
fn forward(
    context: &str,
    resource: ResourceName,
    event: watcher::Event<DynamicObject>,
    events: &mpsc::UnboundedSender<ResourceEvent>,
) -> bool {
    let (kind, object) = match event {
        watcher::Event::Apply(object) | watcher::Event::InitApply(object) => {
            (ResourceEventKind::Applied, object)
        }
        watcher::Event::Delete(object) => (ResourceEventKind::Deleted, object),
        watcher::Event::Init | watcher::Event::InitDone => return true,
    };
    let key = match object.namespace() {
        Some(namespace) => format!("{namespace}/{}", object.name_any()),
        None => object.name_any(),
    };
    events
        .send(ResourceEvent {
            context: context.to_string(),
            resource,
            kind,
            object: key,
        })
        .is_ok()
}

/// Handle to one running watch task.
pub struct KubeInformerHandle {
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl KubeInformerHandle {
    fn new(task: JoinHandle<()>) -> Self {
        Self {
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }
}

#[async_trait::async_trait]
impl InformerHandle for KubeInformerHandle {
    async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

// A handle dropped without stop() (e.g. created for a context that was torn
// down concurrently) must not leak its watch task.
impl Drop for KubeInformerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for KubeInformerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeInformerHandle").finish_non_exhaustive()
    }
}
