//! End-to-end manager scenarios against mock probes, factories and RBAC.

use crate::contract::{ResourceEvent, ResourceEventKind, ResourceFactory};
use crate::events::SyncEvent;
use crate::manager::{ContextsManager, ManagerSettings};
use crate::mock::{
    kubeconfig_with_contexts, InformerLedger, MockPermissionChecker, MockResourceFactory,
    ProbeBehavior, ScriptedProbe,
};
use crate::resources::ResourceName;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const CTX1_SERVER: &str = "https://one.example:6443";
const CTX2_SERVER: &str = "https://two.example:6443";

// Long enough for a probe round-trip plus informer creation, short enough to
// keep the suite fast.
const SETTLE: Duration = Duration::from_millis(150);

fn quick_settings() -> ManagerSettings {
    ManagerSettings {
        health_check_timeout: Duration::from_millis(500),
        probe_interval: Duration::from_secs(5),
        backoff_initial_ms: 30,
        backoff_multiplier: 2,
        backoff_max_ms: 200,
        backoff_jitter_ms: 10,
    }
}

fn primary_factories(ledger: &Arc<InformerLedger>) -> Vec<Arc<dyn ResourceFactory>> {
    vec![
        Arc::new(MockResourceFactory::new(
            ResourceName::Pods,
            Arc::clone(ledger),
        )),
        Arc::new(MockResourceFactory::new(
            ResourceName::Deployments,
            Arc::clone(ledger),
        )),
    ]
}

fn manager(
    factories: Vec<Arc<dyn ResourceFactory>>,
    permissions: MockPermissionChecker,
    probe: Arc<ScriptedProbe>,
) -> ContextsManager {
    ContextsManager::new(factories, Arc::new(permissions), probe, quick_settings())
}

#[tokio::test]
async fn test_reachable_context_gets_primary_informers() {
    let ledger = InformerLedger::new();
    let factories: Vec<Arc<dyn ResourceFactory>> = vec![
        Arc::new(
            MockResourceFactory::new(ResourceName::Pods, Arc::clone(&ledger))
                .with_objects(&["default/web-1", "default/web-2"]),
        ),
        Arc::new(MockResourceFactory::new(
            ResourceName::Deployments,
            Arc::clone(&ledger),
        )),
    ];
    let probe = Arc::new(ScriptedProbe::always(true));
    let manager = manager(factories, MockPermissionChecker::allow_all(), probe);

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;

    let connectivity = manager.connectivity("ctx1");
    assert!(connectivity.reachable);
    assert!(manager.is_watched("ctx1", ResourceName::Pods));
    assert!(manager.is_watched("ctx1", ResourceName::Deployments));

    let state = manager.general_state("ctx1");
    assert!(state.reachable);
    assert_eq!(state.error, None);
    assert_eq!(state.resources.get(&ResourceName::Pods), Some(&2));

    manager.dispose().await;
}

#[tokio::test]
async fn test_unreachable_context_backs_off_and_retries() {
    let ledger = InformerLedger::new();
    let probe = Arc::new(ScriptedProbe::always(true));
    probe.set_server(CTX2_SERVER, ProbeBehavior::Ready(false));
    let manager = manager(
        primary_factories(&ledger),
        MockPermissionChecker::allow_all(),
        Arc::clone(&probe),
    );

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[
            ("ctx1", CTX1_SERVER),
            ("ctx2", CTX2_SERVER),
        ]))
        .await
        .expect("apply should succeed");
    sleep(Duration::from_millis(400)).await;

    // The healthy sibling is unaffected
    assert!(manager.connectivity("ctx1").reachable);
    assert!(manager.is_watched("ctx1", ResourceName::Pods));

    // The unreachable one keeps retrying on its backoff schedule
    assert!(!manager.connectivity("ctx2").reachable);
    assert!(!manager.is_watched("ctx2", ResourceName::Pods));
    assert!(probe.probe_count(CTX2_SERVER) >= 3);
    assert_eq!(
        manager.general_state("ctx2").error.as_deref(),
        Some("readiness check failed")
    );

    manager.dispose().await;
}

#[tokio::test]
async fn test_recovery_after_transient_failures() {
    let ledger = InformerLedger::new();
    let probe = Arc::new(ScriptedProbe::always(true));
    probe.set_server(
        CTX1_SERVER,
        ProbeBehavior::Sequence([false, false].into(), true),
    );
    let manager = manager(
        primary_factories(&ledger),
        MockPermissionChecker::allow_all(),
        Arc::clone(&probe),
    );

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]))
        .await
        .expect("apply should succeed");
    sleep(Duration::from_millis(400)).await;

    let state = manager.general_state("ctx1");
    assert!(state.reachable);
    assert_eq!(state.error, None);
    assert!(manager.is_watched("ctx1", ResourceName::Pods));

    manager.dispose().await;
}

#[tokio::test]
async fn test_context_removal_tears_everything_down() {
    let ledger = InformerLedger::new();
    let probe = Arc::new(ScriptedProbe::always(true));
    let manager = manager(
        primary_factories(&ledger),
        MockPermissionChecker::allow_all(),
        probe,
    );

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[
            ("ctx1", CTX1_SERVER),
            ("ctx2", CTX2_SERVER),
        ]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;
    assert!(manager.is_watched("ctx2", ResourceName::Pods));

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;

    assert_eq!(manager.context_names(), vec!["ctx1".to_string()]);
    assert!(ledger.live_for("ctx2").is_empty(), "ctx2 informers must be stopped");
    assert_eq!(manager.connectivity("ctx2"), Default::default());
    assert!(manager.general_state("ctx2").resources.is_empty());

    // The surviving context is untouched
    assert!(manager.is_watched("ctx1", ResourceName::Pods));

    manager.dispose().await;
}

#[tokio::test]
async fn test_reorder_and_unrelated_changes_do_not_churn() {
    let ledger = InformerLedger::new();
    let probe = Arc::new(ScriptedProbe::always(true));
    let manager = manager(
        primary_factories(&ledger),
        MockPermissionChecker::allow_all(),
        probe,
    );

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[
            ("ctx1", CTX1_SERVER),
            ("ctx2", CTX2_SERVER),
        ]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;
    let created = ledger.total_created();
    assert_eq!(created, 4);

    // Same contexts, different order, plus an unrelated new sibling
    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[
            ("ctx3", "https://three.example:6443"),
            ("ctx2", CTX2_SERVER),
            ("ctx1", CTX1_SERVER),
        ]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;

    assert_eq!(ledger.created_for("ctx1").len(), 2, "ctx1 must not be recreated");
    assert_eq!(ledger.created_for("ctx2").len(), 2, "ctx2 must not be recreated");
    assert_eq!(ledger.total_created(), created + 2);
    assert!(manager.is_watched("ctx3", ResourceName::Pods));

    manager.dispose().await;
}

#[tokio::test]
async fn test_changed_server_recreates_the_context() {
    let ledger = InformerLedger::new();
    let probe = Arc::new(ScriptedProbe::always(true));
    let manager = manager(
        primary_factories(&ledger),
        MockPermissionChecker::allow_all(),
        Arc::clone(&probe),
    );

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;

    let moved = "https://moved.example:6443";
    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", moved)]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;

    // Old informers stopped, fresh ones created against the new server
    assert_eq!(ledger.created_for("ctx1").len(), 4);
    assert_eq!(ledger.live_for("ctx1").len(), 2);
    assert!(probe.probe_count(moved) >= 1);

    manager.dispose().await;
}

#[tokio::test]
async fn test_secondary_interest_lifecycle() {
    let ledger = InformerLedger::new();
    let factories: Vec<Arc<dyn ResourceFactory>> = vec![
        Arc::new(MockResourceFactory::new(
            ResourceName::Pods,
            Arc::clone(&ledger),
        )),
        Arc::new(
            MockResourceFactory::new(ResourceName::Services, Arc::clone(&ledger))
                .with_objects(&["default/api"]),
        ),
    ];
    let probe = Arc::new(ScriptedProbe::always(true));
    let manager = manager(factories, MockPermissionChecker::allow_all(), probe);

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;
    assert!(!manager.is_watched("ctx1", ResourceName::Services));

    manager
        .set_resource_interest(ResourceName::Services, true)
        .await;
    sleep(SETTLE).await;
    assert!(manager.is_watched("ctx1", ResourceName::Services));
    assert_eq!(
        manager
            .general_state("ctx1")
            .resources
            .get(&ResourceName::Services),
        Some(&1)
    );

    manager
        .set_resource_interest(ResourceName::Services, false)
        .await;
    sleep(SETTLE).await;
    assert!(!manager.is_watched("ctx1", ResourceName::Services));
    assert!(manager.is_watched("ctx1", ResourceName::Pods), "primary must survive");
    assert_eq!(
        manager
            .general_state("ctx1")
            .resources
            .get(&ResourceName::Services),
        None,
        "counts of an unwatched resource must be dropped"
    );

    manager.dispose().await;
}

#[tokio::test]
async fn test_primary_interest_calls_are_ignored() {
    let ledger = InformerLedger::new();
    let probe = Arc::new(ScriptedProbe::always(true));
    let manager = manager(
        primary_factories(&ledger),
        MockPermissionChecker::allow_all(),
        probe,
    );

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;

    manager.set_resource_interest(ResourceName::Pods, false).await;
    sleep(SETTLE).await;

    assert!(manager.is_watched("ctx1", ResourceName::Pods));

    manager.dispose().await;
}

#[tokio::test]
async fn test_denied_resource_is_not_watched() {
    let ledger = InformerLedger::new();
    let factories: Vec<Arc<dyn ResourceFactory>> = vec![
        Arc::new(MockResourceFactory::new(
            ResourceName::Pods,
            Arc::clone(&ledger),
        )),
        Arc::new(MockResourceFactory::new(
            ResourceName::Secrets,
            Arc::clone(&ledger),
        )),
    ];
    let permissions = MockPermissionChecker::allow_all();
    permissions.deny("secrets");
    let probe = Arc::new(ScriptedProbe::always(true));
    let manager = manager(factories, permissions, probe);

    manager
        .set_resource_interest(ResourceName::Secrets, true)
        .await;
    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;

    assert!(manager.is_watched("ctx1", ResourceName::Pods));
    assert!(!manager.is_watched("ctx1", ResourceName::Secrets));
    assert!(!ledger.created_for("ctx1").contains(&ResourceName::Secrets));

    manager.dispose().await;
}

#[tokio::test]
async fn test_failing_factory_does_not_block_others() {
    let ledger = InformerLedger::new();
    let factories: Vec<Arc<dyn ResourceFactory>> = vec![
        Arc::new(MockResourceFactory::failing(
            ResourceName::Pods,
            Arc::clone(&ledger),
        )),
        Arc::new(MockResourceFactory::new(
            ResourceName::Deployments,
            Arc::clone(&ledger),
        )),
    ];
    let probe = Arc::new(ScriptedProbe::always(true));
    let manager = manager(factories, MockPermissionChecker::allow_all(), probe);

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;

    assert!(!manager.is_watched("ctx1", ResourceName::Pods));
    assert!(manager.is_watched("ctx1", ResourceName::Deployments));

    manager.dispose().await;
}

#[tokio::test]
async fn test_unusable_context_is_skipped_not_fatal() {
    let ledger = InformerLedger::new();
    let probe = Arc::new(ScriptedProbe::always(true));
    let manager = manager(
        primary_factories(&ledger),
        MockPermissionChecker::allow_all(),
        probe,
    );

    let mut config = kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]);
    config.contexts.push(kube::config::NamedContext {
        name: "broken".to_string(),
        context: Some(kube::config::Context {
            cluster: "ghost".to_string(),
            user: Some("nobody".to_string()),
            ..kube::config::Context::default()
        }),
    });

    manager
        .apply_kubeconfig(&config)
        .await
        .expect("broken sibling must not fail the pass");
    sleep(SETTLE).await;

    assert_eq!(manager.context_names(), vec!["ctx1".to_string()]);
    assert!(manager.is_watched("ctx1", ResourceName::Pods));

    manager.dispose().await;
}

#[tokio::test]
async fn test_events_are_published_on_state_changes() {
    let ledger = InformerLedger::new();
    let probe = Arc::new(ScriptedProbe::always(true));
    let manager = manager(
        primary_factories(&ledger),
        MockPermissionChecker::allow_all(),
        probe,
    );
    let mut events = manager.subscribe();

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;

    let mut saw_checking = false;
    let mut saw_reachable = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::ConnectivityChanged { context, connectivity } => {
                assert_eq!(context, "ctx1");
                saw_checking |= connectivity.checking;
                saw_reachable |= connectivity.reachable;
            }
            SyncEvent::GeneralStateChanged { context, .. } => {
                assert_eq!(context, "ctx1");
            }
        }
    }
    assert!(saw_checking, "a checking transition must be published");
    assert!(saw_reachable, "a reachable transition must be published");

    manager.dispose().await;
}

#[tokio::test]
async fn test_rapid_remove_and_readd_does_not_resurrect_state() {
    let ledger = InformerLedger::new();
    let probe = Arc::new(ScriptedProbe::always(true));
    probe.set_server(CTX1_SERVER, ProbeBehavior::Hang);
    let manager = manager(
        primary_factories(&ledger),
        MockPermissionChecker::allow_all(),
        Arc::clone(&probe),
    );

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]))
        .await
        .expect("apply should succeed");
    sleep(Duration::from_millis(50)).await;

    // First incarnation is mid-probe
    let connectivity = manager.connectivity("ctx1");
    assert!(connectivity.checking);
    assert!(!connectivity.reachable);

    // Remove while that probe is still hanging
    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[]))
        .await
        .expect("apply should succeed");
    assert!(manager.context_names().is_empty());
    assert_eq!(manager.connectivity("ctx1"), Default::default());

    // Re-add immediately; the cluster now answers
    probe.set_server(CTX1_SERVER, ProbeBehavior::Ready(true));
    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;

    // Only the second incarnation's outcome is visible
    let state = manager.general_state("ctx1");
    assert!(state.reachable);
    assert!(!state.checking);
    assert_eq!(state.error, None);
    assert!(manager.is_watched("ctx1", ResourceName::Pods));
    assert_eq!(ledger.created_for("ctx1").len(), 2, "only the new incarnation creates informers");

    manager.dispose().await;
}

#[tokio::test]
async fn test_late_events_after_unreachable_do_not_reinsert_counts() {
    let ledger = InformerLedger::new();
    let factories: Vec<Arc<dyn ResourceFactory>> = vec![Arc::new(
        MockResourceFactory::new(ResourceName::Pods, Arc::clone(&ledger))
            .with_objects(&["default/web-1"]),
    )];
    let probe = Arc::new(ScriptedProbe::always(true));
    // Reachable once, then the cluster goes dark on the next probe tick
    probe.set_server(
        CTX1_SERVER,
        ProbeBehavior::Sequence([true].into(), false),
    );
    let mut settings = quick_settings();
    settings.probe_interval = Duration::from_millis(200);
    let manager = ContextsManager::new(
        factories,
        Arc::new(MockPermissionChecker::allow_all()),
        probe,
        settings,
    );

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[("ctx1", CTX1_SERVER)]))
        .await
        .expect("apply should succeed");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        manager.general_state("ctx1").resources.get(&ResourceName::Pods),
        Some(&1)
    );

    sleep(Duration::from_millis(300)).await;
    assert!(!manager.connectivity("ctx1").reachable);
    assert!(manager.general_state("ctx1").resources.is_empty());

    // A change event still queued from the stopped informer arrives late
    let events = manager.resource_events_sender();
    events
        .send(ResourceEvent {
            context: "ctx1".to_string(),
            resource: ResourceName::Pods,
            kind: ResourceEventKind::Applied,
            object: "default/web-1".to_string(),
        })
        .expect("aggregator should still be running");
    sleep(Duration::from_millis(50)).await;

    assert!(
        manager.general_state("ctx1").resources.is_empty(),
        "a late event must not re-insert counts for an unreachable context"
    );

    manager.dispose().await;
}

#[tokio::test]
async fn test_dispose_stops_everything() {
    let ledger = InformerLedger::new();
    let probe = Arc::new(ScriptedProbe::always(true));
    let manager = manager(
        primary_factories(&ledger),
        MockPermissionChecker::allow_all(),
        probe,
    );

    manager
        .apply_kubeconfig(&kubeconfig_with_contexts(&[
            ("ctx1", CTX1_SERVER),
            ("ctx2", CTX2_SERVER),
        ]))
        .await
        .expect("apply should succeed");
    sleep(SETTLE).await;

    manager.dispose().await;

    assert!(manager.context_names().is_empty());
    assert!(ledger.live_for("ctx1").is_empty());
    assert!(ledger.live_for("ctx2").is_empty());
}
