// ABOUTME: Integration tests for resource health checks, metrics history and sweeps
// ABOUTME: Covers fleet health aggregation, alerts and retirement of vanished instances

mod common;

use common::{eventually, harness, harness_with, request};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use stratus_config::EngineConfig;
use stratus_core::PlatformEvent;
use stratus_orchestrator::{Actor, OrchestratorError, SystemStatus};
use stratus_storage::{
    BackupPolicy, InMemoryRegistry, MonitoringPolicy, Registry, ResourceStatus, TaskStatus,
};

async fn fleet(h: &common::Harness, count: usize) -> Vec<String> {
    let mut ids = Vec::new();
    for n in 0..count {
        let resource = h
            .orchestrator
            .deploy(&Actor::System, request("user-1", &format!("db-{}", n)))
            .await
            .unwrap();
        ids.push(resource.id);
    }
    ids
}

#[tokio::test]
async fn test_health_check_reports_and_stamps_the_record() {
    let h = harness().await;
    let ids = fleet(&h, 1).await;

    let check = h
        .orchestrator
        .health_check(&Actor::user("user-1"), &ids[0])
        .await
        .unwrap();
    assert!(check.healthy);
    assert!(check.message.is_none());

    let stored = h.registry.get_resource(&ids[0]).await.unwrap();
    assert_eq!(stored.metadata.last_health_check_at, Some(check.checked_at));

    assert!(matches!(
        h.orchestrator
            .health_check(&Actor::user("user-2"), &ids[0])
            .await,
        Err(OrchestratorError::AccessDenied(_))
    ));
}

#[tokio::test]
async fn test_system_health_is_degraded_with_one_unhealthy_of_four() {
    let h = harness().await;
    fleet(&h, 4).await;
    h.provider.set_unhealthy("inst-2");

    let health = h.orchestrator.get_system_health().await.unwrap();
    assert_eq!(health.status, SystemStatus::Degraded);
    assert_eq!(health.total, 4);
    assert_eq!(health.healthy, 3);
    assert_eq!(health.unhealthy, 1);
    assert_eq!(health.checks.len(), 4);
}

#[tokio::test]
async fn test_system_health_is_unhealthy_with_three_of_four_down() {
    let h = harness().await;
    fleet(&h, 4).await;
    h.provider.set_unhealthy("inst-1");
    h.provider.set_unhealthy("inst-2");
    // A check that errors counts against the fleet too
    h.provider.vanish("inst-3");

    let health = h.orchestrator.get_system_health().await.unwrap();
    assert_eq!(health.status, SystemStatus::Unhealthy);
    assert_eq!(health.unhealthy, 3);
    assert_eq!(health.healthy, 1);

    let errored = health
        .checks
        .iter()
        .find(|c| c.response_time_ms == 0 && c.message.as_deref().unwrap_or("").contains("inst-3"));
    assert!(errored.is_some());
}

#[tokio::test]
async fn test_system_health_skips_destroyed_resources() {
    let h = harness().await;
    let ids = fleet(&h, 2).await;
    h.orchestrator.destroy(&Actor::System, &ids[0]).await.unwrap();

    let health = h.orchestrator.get_system_health().await.unwrap();
    assert_eq!(health.status, SystemStatus::Healthy);
    assert_eq!(health.total, 1);
}

#[tokio::test]
async fn test_health_sweep_alerts_on_unhealthy_resources() {
    let h = harness().await;
    let ids = fleet(&h, 3).await;

    // Opted out of alerts
    let mut quiet = request("user-1", "quiet");
    quiet.config.monitoring = Some(MonitoringPolicy {
        enabled: true,
        alert_on_unhealthy: false,
        maintenance_schedule: None,
    });
    let quiet = h.orchestrator.deploy(&Actor::System, quiet).await.unwrap();

    h.provider.set_unhealthy("inst-2");
    h.provider.set_unhealthy("inst-4");
    let mut rx = h.events.subscribe();

    let report = h.orchestrator.run_health_sweep().await.unwrap();
    assert_eq!(report.checked, 4);
    assert_eq!(report.unhealthy.len(), 2);
    assert!(report.errors.is_empty());

    let mut alerts = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        if let PlatformEvent::HealthAlert {
            resource_id,
            message,
        } = envelope.event
        {
            alerts.push((resource_id, message));
        }
    }
    assert_eq!(
        alerts,
        vec![(ids[1].clone(), "replication lag too high".to_string())]
    );
    assert!(report.unhealthy.contains(&quiet.id));
}

#[tokio::test]
async fn test_metrics_history_is_bounded() {
    let mut config = EngineConfig::default();
    config.orchestrator.metrics_history = 3;
    let h = harness_with(config, Arc::new(InMemoryRegistry::new())).await;
    let ids = fleet(&h, 2).await;
    h.provider.set_cpu("inst-1", 81.5);

    for _ in 0..5 {
        assert_eq!(h.orchestrator.collect_metrics().await.unwrap(), 2);
    }

    let history = h.orchestrator.recent_metrics(&ids[0]).await;
    assert_eq!(history.len(), 3);
    assert!(history
        .windows(2)
        .all(|w| w[0].collected_at <= w[1].collected_at));
    assert_eq!(history[2].metrics.cpu_percent, 81.5);

    h.orchestrator.destroy(&Actor::System, &ids[0]).await.unwrap();
    assert!(h.orchestrator.recent_metrics(&ids[0]).await.is_empty());
    assert_eq!(h.orchestrator.recent_metrics(&ids[1]).await.len(), 3);
}

#[tokio::test]
async fn test_cleanup_retires_resources_whose_instance_vanished() {
    let h = harness().await;
    let mut req = request("user-1", "orders");
    req.config.backup = Some(BackupPolicy::default());
    let orphan = h.orchestrator.deploy(&Actor::System, req).await.unwrap();
    let ids = fleet(&h, 1).await;

    h.provider.vanish("inst-1");
    let mut rx = h.events.subscribe();

    let summary = h.orchestrator.cleanup_orphans().await.unwrap();
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.retired, vec![orphan.id.clone()]);
    assert!(summary.errors.is_empty());

    let stored = h.registry.get_resource(&orphan.id).await.unwrap();
    assert_eq!(stored.status, ResourceStatus::Destroyed);
    assert_eq!(
        h.registry.get_resource(&ids[0]).await.unwrap().status,
        ResourceStatus::Running
    );

    let tasks = h
        .orchestrator
        .scheduler()
        .get_scheduled_tasks(&orphan.id)
        .await
        .unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Cancelled));

    let mut destroyed = false;
    while let Ok(envelope) = rx.try_recv() {
        destroyed |= envelope.event
            == PlatformEvent::ResourceDestroyed {
                resource_id: orphan.id.clone(),
            };
    }
    assert!(destroyed);
}

#[tokio::test]
async fn test_cleanup_collects_lookup_errors_and_keeps_going() {
    let h = harness().await;
    fleet(&h, 2).await;
    h.provider.fail("exists");

    let summary = h.orchestrator.cleanup_orphans().await.unwrap();
    assert_eq!(summary.scanned, 2);
    assert!(summary.retired.is_empty());
    assert_eq!(summary.errors.len(), 2);
}

#[tokio::test]
async fn test_background_loops_run_until_shutdown() {
    let mut config = EngineConfig::default();
    config.orchestrator.metrics_interval = Duration::from_millis(20);
    config.orchestrator.health_check_interval = Duration::from_millis(20);
    let h = harness_with(config, Arc::new(InMemoryRegistry::new())).await;
    let ids = fleet(&h, 1).await;

    h.orchestrator.start();
    let orchestrator = h.orchestrator.clone();
    let id = ids[0].clone();
    assert!(
        eventually(|| {
            let orchestrator = orchestrator.clone();
            let id = id.clone();
            async move { orchestrator.recent_metrics(&id).await.len() >= 2 }
        })
        .await
    );
    assert!(h.provider.calls("health") >= 1);

    h.orchestrator.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = h.provider.calls("metrics");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.provider.calls("metrics"), calls);
}
