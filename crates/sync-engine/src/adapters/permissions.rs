//! RBAC checks via `SelfSubjectAccessReview`.

use crate::contract::{PermissionChecker, PermissionRequest, PermissionVerdict};
use crate::error::SyncError;
use crate::kubeconfig::KubeConfigSingleContext;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::{Api, PostParams};
use tracing::debug;

/// Asks the target cluster itself whether the engine's credentials may watch
/// each requested resource.
///
/// Deny-by-default on every failure path: an errored or unanswered review is a
/// denial with the error as the reason, never a crash of the reconciliation
/// pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfSubjectAccessReviewChecker;

impl SelfSubjectAccessReviewChecker {
    /// Create the checker.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl PermissionChecker for SelfSubjectAccessReviewChecker {
    async fn can_watch(
        &self,
        config: &KubeConfigSingleContext,
        requests: &[PermissionRequest],
    ) -> Result<Vec<PermissionVerdict>, SyncError> {
        let client = super::client_for(config).await?;
        let api: Api<SelfSubjectAccessReview> = Api::all(client);

        let mut verdicts = Vec::with_capacity(requests.len());
        for request in requests {
            let review = SelfSubjectAccessReview {
                spec: SelfSubjectAccessReviewSpec {
                    resource_attributes: Some(ResourceAttributes {
                        group: Some(request.group.clone()),
                        resource: Some(request.resource.clone()),
                        verb: Some(request.verb.clone()),
                        namespace: Some(config.namespace().to_string()),
                        ..ResourceAttributes::default()
                    }),
                    ..SelfSubjectAccessReviewSpec::default()
                },
                ..SelfSubjectAccessReview::default()
            };
            match api.create(&PostParams::default(), &review).await {
                Ok(response) => {
                    let status = response.status.unwrap_or_default();
                    debug!(
                        context = config.context_name(),
                        resource = %request.resource,
                        verb = %request.verb,
                        allowed = status.allowed,
                        "access review answered"
                    );
                    verdicts.push(PermissionVerdict {
                        permitted: status.allowed,
                        reason: status.reason,
                    });
                }
                Err(error) => {
                    debug!(
                        context = config.context_name(),
                        resource = %request.resource,
                        %error,
                        "access review failed, denying"
                    );
                    verdicts.push(PermissionVerdict {
                        permitted: false,
                        reason: Some(format!("access review failed: {error}")),
                    });
                }
            }
        }
        Ok(verdicts)
    }
}
