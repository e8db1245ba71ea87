//! Manager behaviour across several engines, using in-memory engines.

use std::sync::Arc;
use std::time::Duration;

use enginehub_engine::{
    ContainerEngine, EngineError, EngineKind, EngineManager, EngineOptions, EngineTarget,
    MockEngine, WorkloadSpec, WorkloadStatus, DEFAULT_STOP_TIMEOUT,
};

async fn two_engines() -> (EngineManager, Arc<MockEngine>, Arc<MockEngine>) {
    let manager = EngineManager::new();
    let a = Arc::new(MockEngine::new(EngineKind::Docker));
    let b = Arc::new(MockEngine::new(EngineKind::Podman));
    manager
        .register_adapter("a", EngineTarget::local(), a.clone())
        .await
        .unwrap();
    manager
        .register_adapter("b", EngineTarget::remote("10.0.0.2").with_port(8080), b.clone())
        .await
        .unwrap();
    (manager, a, b)
}

#[tokio::test]
async fn calls_route_to_default_or_named_engine() {
    let (manager, a, b) = two_engines().await;

    assert!(manager.stop_workload("w1", DEFAULT_STOP_TIMEOUT, None).await.is_ok());
    assert!(a.calls().contains(&"stop:w1".to_string()));
    assert!(!b.calls().contains(&"stop:w1".to_string()));

    manager
        .stop_workload("w1", DEFAULT_STOP_TIMEOUT, Some("b"))
        .await
        .unwrap();
    assert!(b.calls().contains(&"stop:w1".to_string()));

    let err = manager
        .stop_workload("w1", DEFAULT_STOP_TIMEOUT, Some("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EngineNotFound(_)));
}

#[tokio::test]
async fn full_lifecycle_through_the_manager() {
    let (manager, _, _) = two_engines().await;
    let spec = WorkloadSpec::new("web", "nginx:1.25")
        .with_port("80/tcp", "8080")
        .with_memory_limit("256MB");

    let id = manager.create_workload(&spec, Some("b")).await.unwrap();
    assert_eq!(
        manager.inspect_workload(&id, Some("b")).await.unwrap().status,
        WorkloadStatus::Created
    );

    assert!(manager.start_workload(&id, Some("b")).await.unwrap());
    let snap = manager.inspect_workload(&id, Some("b")).await.unwrap();
    assert_eq!(snap.status, WorkloadStatus::Running);
    assert_eq!(snap.port(80, "tcp").unwrap().host_port, Some(8080));

    let exec = manager.exec(&id, "echo ready", Some("b")).await.unwrap();
    assert!(exec.success());
    assert_eq!(exec.output, "ready\n");

    assert!(manager
        .restart_workload(&id, Duration::from_secs(1), Some("b"))
        .await
        .unwrap());
    assert!(!manager.remove_workload(&id, false, Some("b")).await.unwrap());
    assert!(manager.remove_workload(&id, true, Some("b")).await.unwrap());

    let err = manager.inspect_workload(&id, Some("b")).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkloadNotFound { .. }));
}

#[tokio::test]
async fn one_unreachable_engine_does_not_hide_the_others() {
    let (manager, _, b) = two_engines().await;
    for name in ["one", "two"] {
        manager
            .create_workload(&WorkloadSpec::new(name, "alpine"), Some("a"))
            .await
            .unwrap();
    }
    manager
        .create_workload(&WorkloadSpec::new("three", "alpine"), Some("b"))
        .await
        .unwrap();
    b.set_reachable(false);

    let all = manager.list_all_workloads(true).await;
    assert_eq!(all.len(), 2);
    assert_eq!(all["a"].len(), 2);
    assert!(all["b"].is_empty());

    let images = manager.list_all_images().await;
    assert_eq!(images["a"].len(), 1);
    assert!(images["b"].is_empty());

    let health = manager.health_check_all().await;
    assert_eq!(health.get("a"), Some(&true));
    assert_eq!(health.get("b"), Some(&false));
}

#[tokio::test]
async fn engine_summaries_report_default_and_state() {
    let (manager, _, b) = two_engines().await;
    b.set_reachable(false);

    let engines = manager.list_engines().await;
    assert_eq!(engines.len(), 2);
    assert_eq!(engines[0].name, "a");
    assert!(engines[0].is_default && engines[0].connected);
    assert_eq!(engines[1].target, "10.0.0.2:8080");
    assert!(!engines[1].connected);
    assert_eq!(engines[1].state.as_str(), "degraded");
}

#[tokio::test]
async fn failed_probe_through_register_stores_nothing() {
    let manager = EngineManager::new();
    let options = EngineOptions::default().with_lxc_binary("/nonexistent/lxc");

    assert!(
        !manager
            .add_engine("lxc", EngineKind::Lxc, EngineTarget::local(), &options)
            .await
    );
    assert!(manager.engine_names().await.is_empty());
    assert!(manager.resolve(Some("lxc")).await.is_err());
}

#[tokio::test]
async fn adapters_are_usable_as_trait_objects() {
    let engine: Arc<dyn ContainerEngine> = Arc::new(MockEngine::new(EngineKind::Lxc));
    assert_eq!(engine.kind(), EngineKind::Lxc);
    assert!(engine.ping().await.is_ok());
    assert!(engine.list_workloads(true).await.is_empty());
}
