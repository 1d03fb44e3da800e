// ABOUTME: Integration tests for the sandbox deploy, monitor, reclaim and cancel lifecycle
// ABOUTME: Runs the manager against a fake provider and the in-memory registry

mod common;

use common::{flaky_harness, harness, harness_with};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::time::Duration;
use stratus_config::SandboxSettings;
use stratus_core::{Coded, ErrorCode, PlatformEvent};
use stratus_sandbox::providers::{LABEL_DEPLOYMENT_ID, LABEL_USER_ID};
use stratus_sandbox::{
    CleanupPolicy, DeployOptions, DeployStage, ErrorContext, HealthStatus, ManagerError,
    ReclaimReason, SandboxState, SourceFile,
};
use stratus_storage::{DeploymentFilter, DeploymentStatus, Registry};

fn app_files() -> Vec<SourceFile> {
    vec![
        SourceFile::new("package.json", r#"{"scripts":{"start":"node index.js"}}"#),
        SourceFile::new("index.js", "require('http').createServer().listen(3000)"),
    ]
}

fn with_quota(max: usize) -> SandboxSettings {
    SandboxSettings {
        max_sandboxes_per_user: max,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_deploy_valid_files_reaches_running() {
    let h = harness();
    let mut events = h.events.subscribe();

    let outcome = h
        .manager
        .deploy("user-1", app_files(), DeployOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, DeploymentStatus::Running);
    assert!(!outcome.url.is_empty());
    assert!(!outcome.sandbox_id.is_empty());
    assert!(outcome.url.starts_with("https://3000-"));

    let record = h.registry.get_deployment(&outcome.deployment_id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Running);
    assert_eq!(record.sandbox_id.as_deref(), Some(outcome.sandbox_id.as_str()));
    assert!(record.started_at.is_some());

    assert_eq!(
        h.provider.files(&outcome.sandbox_id),
        vec![
            "/home/user/app/package.json".to_string(),
            "/home/user/app/index.js".to_string()
        ]
    );
    let commands = h.provider.commands(&outcome.sandbox_id);
    assert_eq!(commands.len(), 2);
    assert!(commands[0].ends_with("npm install"));
    assert!(commands[1].contains("nohup sh -c 'npm start'"));

    let envelope = events.recv().await.unwrap();
    assert!(matches!(
        envelope.event,
        PlatformEvent::DeploymentCreated { ref deployment_id, .. } if *deployment_id == outcome.deployment_id
    ));
    assert_eq!(h.manager.active_count(Some("user-1")).await, 1);
}

#[tokio::test]
async fn test_deploy_with_failing_install_leaves_nothing_running() {
    let h = harness();
    h.provider.fail_install(true);

    let err = h
        .manager
        .deploy("user-1", app_files(), DeployOptions::default())
        .await
        .unwrap_err();

    let deployment_id = match &err {
        ManagerError::Deployment {
            deployment_id,
            stage,
            ..
        } => {
            assert_eq!(*stage, DeployStage::Install);
            deployment_id.clone()
        }
        other => panic!("expected deployment error, got {:?}", other),
    };
    assert_eq!(err.code(), ErrorCode::ProviderError);

    assert_eq!(h.provider.alive(), 0);
    assert_eq!(h.provider.killed().len(), 1);
    assert_eq!(h.manager.active_count(None).await, 0);

    let record = h.registry.get_deployment(&deployment_id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert!(record.error_message.unwrap().starts_with("install"));

    let running = h
        .registry
        .list_deployments(&DeploymentFilter {
            status: Some(DeploymentStatus::Running),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(running.is_empty());
}

#[tokio::test]
async fn test_invalid_input_is_rejected_before_any_provider_call() {
    let h = harness();

    let err = h
        .manager
        .deploy("user-1", vec![], DeployOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let err = h
        .manager
        .deploy(
            "user-1",
            vec![SourceFile::new("../../etc/shadow", "x")],
            DeployOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Validation(_)));

    assert_eq!(h.provider.alive(), 0);
    assert!(h
        .registry
        .list_deployments(&DeploymentFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_quota_reclaims_exactly_the_least_recently_active_sandbox() {
    let h = harness_with(with_quota(3));

    let mut deployed = Vec::new();
    for _ in 0..3 {
        let outcome = h
            .manager
            .deploy("user-1", app_files(), DeployOptions::default())
            .await
            .unwrap();
        deployed.push(outcome);
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    // A different user's sandbox is never touched
    h.manager
        .deploy("user-2", app_files(), DeployOptions::default())
        .await
        .unwrap();

    // First sandbox becomes the most recently active, second is now the LRU
    h.manager.record_activity(&deployed[0].sandbox_id).await;

    let fourth = h
        .manager
        .deploy("user-1", app_files(), DeployOptions::default())
        .await
        .unwrap();

    assert_eq!(h.provider.killed(), vec![deployed[1].sandbox_id.clone()]);
    assert_eq!(h.manager.active_count(Some("user-1")).await, 3);
    assert_eq!(h.manager.active_count(Some("user-2")).await, 1);
    assert!(h.manager.get_handle(&fourth.sandbox_id).await.is_some());

    let reclaimed = h
        .registry
        .get_deployment(&deployed[1].deployment_id)
        .await
        .unwrap();
    assert_eq!(reclaimed.status, DeploymentStatus::Destroyed);
}

#[tokio::test]
async fn test_cleanup_max_idle_terminates_exactly_idle_sandboxes() {
    let h = harness();
    let mut ids = Vec::new();
    for user in ["user-1", "user-2", "user-3"] {
        let outcome = h
            .manager
            .deploy(user, app_files(), DeployOptions::default())
            .await
            .unwrap();
        ids.push(outcome.sandbox_id);
    }

    tokio::time::sleep(Duration::from_millis(250)).await;
    h.manager.record_activity(&ids[2]).await;

    let before = h.manager.active_count(None).await;
    let report = h
        .manager
        .cleanup(&CleanupPolicy::idle(Duration::from_millis(120)))
        .await
        .unwrap();
    let after = h.manager.active_count(None).await;

    assert_eq!(report.scanned, 3);
    assert_eq!(report.terminated, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(before - after, report.terminated);
    assert!(report.items.iter().all(|i| i.reason == ReclaimReason::Idle));

    let mut reclaimed: Vec<_> = report.items.iter().map(|i| i.sandbox_id.clone()).collect();
    reclaimed.sort();
    let mut expected = vec![ids[0].clone(), ids[1].clone()];
    expected.sort();
    assert_eq!(reclaimed, expected);
    assert!(h.provider.is_alive(&ids[2]));
}

#[tokio::test]
async fn test_cleanup_records_failures_and_continues() {
    let h = harness();
    let a = h
        .manager
        .deploy("user-1", app_files(), DeployOptions::default())
        .await
        .unwrap();
    let b = h
        .manager
        .deploy("user-2", app_files(), DeployOptions::default())
        .await
        .unwrap();
    h.provider.fail_kill_for(&a.sandbox_id);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let report = h
        .manager
        .cleanup(&CleanupPolicy::idle(Duration::from_millis(1)))
        .await
        .unwrap();

    assert_eq!(report.terminated, 1);
    assert_eq!(report.failed, 1);
    let failed = report.items.iter().find(|i| !i.terminated).unwrap();
    assert_eq!(failed.sandbox_id, a.sandbox_id);
    assert!(failed.error.is_some());
    assert!(!h.provider.is_alive(&b.sandbox_id));
    assert_eq!(h.manager.active_count(None).await, 1);
}

#[tokio::test]
async fn test_resync_adopts_labelled_sandboxes_and_cleanup_reclaims_orphans() {
    let h = harness();
    let mut labels = HashMap::new();
    labels.insert(LABEL_USER_ID.to_string(), "user-9".to_string());
    labels.insert(LABEL_DEPLOYMENT_ID.to_string(), "dep_gone".to_string());
    let orphan = h.provider.spawn_external(labels);
    let foreign = h.provider.spawn_external(HashMap::new());

    let report = h.manager.resync().await.unwrap();
    assert_eq!(report.adopted, 1);
    assert_eq!(report.tracked, 1);
    assert_eq!(h.manager.find_for_user("user-9", None).await.unwrap().id, orphan);

    let cleanup = h
        .manager
        .cleanup(&CleanupPolicy {
            reclaim_orphaned: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(cleanup.terminated, 1);
    assert_eq!(cleanup.items[0].reason, ReclaimReason::Orphaned);
    assert!(!h.provider.is_alive(&orphan));
    assert!(h.provider.is_alive(&foreign));
}

#[tokio::test]
async fn test_list_active_tolerates_provider_failure() {
    let h = harness();
    h.manager
        .deploy("user-1", app_files(), DeployOptions::default())
        .await
        .unwrap();
    assert_eq!(h.manager.list_active().await.len(), 1);

    h.provider.fail_list(true);
    assert!(h.manager.list_active().await.is_empty());
}

#[tokio::test]
async fn test_find_for_user_is_project_scoped() {
    let h = harness();
    assert!(h.manager.find_for_user("user-1", None).await.is_none());

    let alpha = h
        .manager
        .deploy(
            "user-1",
            app_files(),
            DeployOptions {
                project_id: Some("alpha".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let beta = h
        .manager
        .deploy(
            "user-1",
            app_files(),
            DeployOptions {
                project_id: Some("beta".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let latest = h.manager.find_for_user("user-1", None).await.unwrap();
    assert_eq!(latest.id, beta.sandbox_id);
    let scoped = h.manager.find_for_user("user-1", Some("alpha")).await.unwrap();
    assert_eq!(scoped.id, alpha.sandbox_id);
    assert!(h.manager.find_for_user("user-1", Some("gamma")).await.is_none());
}

#[tokio::test]
async fn test_monitor_reports_health_and_logs() {
    let h = harness();
    let outcome = h
        .manager
        .deploy("user-1", app_files(), DeployOptions::default())
        .await
        .unwrap();

    let report = h.manager.monitor(&outcome.deployment_id).await.unwrap();
    assert_eq!(report.status, DeploymentStatus::Running);
    assert_eq!(report.health, HealthStatus::Healthy);
    assert_eq!(report.logs, vec!["listening on 3000", "GET / 200"]);

    h.provider
        .set_state(&outcome.sandbox_id, SandboxState::Error("oom".to_string()));
    let report = h.manager.monitor(&outcome.deployment_id).await.unwrap();
    assert_eq!(report.health, HealthStatus::Unhealthy);

    let err = h.manager.monitor("dep_missing").await.unwrap_err();
    assert!(matches!(err, ManagerError::NotFound(_)));
}

#[tokio::test]
async fn test_cancel_destroys_record_and_is_idempotent() {
    let h = harness();
    let outcome = h
        .manager
        .deploy("user-1", app_files(), DeployOptions::default())
        .await
        .unwrap();

    let record = h.manager.cancel(&outcome.deployment_id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Destroyed);
    assert!(!h.provider.is_alive(&outcome.sandbox_id));
    assert_eq!(h.manager.active_count(None).await, 0);

    let again = h.manager.cancel(&outcome.deployment_id).await.unwrap();
    assert_eq!(again.status, DeploymentStatus::Destroyed);
}

#[tokio::test]
async fn test_restart_and_execute_keep_deployment_running() {
    let h = harness();
    let outcome = h
        .manager
        .deploy("user-1", app_files(), DeployOptions::default())
        .await
        .unwrap();
    let before = h
        .manager
        .get_handle(&outcome.sandbox_id)
        .await
        .unwrap()
        .last_activity_at;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let output = h
        .manager
        .execute(&outcome.deployment_id, "ls -la")
        .await
        .unwrap();
    assert!(output.success());
    let after = h
        .manager
        .get_handle(&outcome.sandbox_id)
        .await
        .unwrap()
        .last_activity_at;
    assert!(after > before);

    let record = h.manager.restart(&outcome.deployment_id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Running);
    assert!(h
        .provider
        .commands(&outcome.sandbox_id)
        .iter()
        .any(|c| c.starts_with("pkill -f")));

    h.manager.cancel(&outcome.deployment_id).await.unwrap();
    let err = h.manager.restart(&outcome.deployment_id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
}

#[tokio::test]
async fn test_restart_relaunches_the_deployed_start_command() {
    let h = harness();
    let options = DeployOptions {
        runtime: "python".to_string(),
        start_command: Some("python app.py".to_string()),
        port: Some(8000),
        skip_install: true,
        ..Default::default()
    };
    let outcome = h
        .manager
        .deploy("user-1", vec![SourceFile::new("app.py", "print('hi')")], options)
        .await
        .unwrap();

    let stored = h.registry.get_deployment(&outcome.deployment_id).await.unwrap();
    let launch = stored.launch.unwrap();
    assert_eq!(launch.start_command, "python app.py");
    assert_eq!(launch.port, 8000);

    h.manager.restart(&outcome.deployment_id).await.unwrap();
    let commands = h.provider.commands(&outcome.sandbox_id);
    let restart = commands.last().unwrap();
    assert_eq!(
        restart,
        "pkill -f 'python app.py' ; cd '/home/user/app' && nohup sh -c 'python app.py' > /tmp/stratus-app.log 2>&1 &"
    );
    assert!(!commands.iter().any(|c| c.contains("npm start")));
}

#[tokio::test]
async fn test_unrecorded_deploy_fails_the_record_and_kills_the_sandbox() {
    let h = flaky_harness();
    let mut rx = h.events.subscribe();
    h.registry.refuse_running_writes(true);

    let err = h
        .manager
        .deploy("user-1", app_files(), DeployOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let records = h
        .registry
        .list_deployments(&DeploymentFilter::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DeploymentStatus::Failed);
    assert!(records[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("disk full"));
    assert_eq!(h.provider.alive(), 0);
    assert_eq!(h.manager.active_count(None).await, 0);

    let mut failed = false;
    while let Ok(envelope) = rx.try_recv() {
        failed |= matches!(envelope.event, PlatformEvent::DeploymentFailed { .. });
    }
    assert!(failed);

    // A failed record can still be retired
    let retired = h.manager.cancel(&records[0].id).await.unwrap();
    assert_eq!(retired.status, DeploymentStatus::Destroyed);
}

#[tokio::test]
async fn test_handle_error_uses_configured_base_delay() {
    let h = harness_with(SandboxSettings {
        retry_base_delay: Duration::from_millis(500),
        ..Default::default()
    });
    let error = ManagerError::Provider(stratus_core::ProviderError::Network("reset".into()));

    let decision = h.manager.handle_error(
        "dep_1",
        &error,
        &ErrorContext {
            stage: "start".to_string(),
            retry_count: 1,
            max_retries: 3,
        },
    );
    assert_eq!(
        decision,
        stratus_sandbox::ErrorDecision::Retry {
            delay: Duration::from_secs(2),
            class: stratus_sandbox::ErrorClass::Network,
        }
    );
}

#[tokio::test]
async fn test_background_cleanup_task_reclaims_orphans() {
    let h = harness();
    let mut labels = HashMap::new();
    labels.insert(LABEL_USER_ID.to_string(), "user-1".to_string());
    let orphan = h.provider.spawn_external(labels);
    h.manager.resync().await.unwrap();

    let task = h.manager.clone().start_cleanup_task(
        Duration::from_millis(20),
        CleanupPolicy {
            reclaim_orphaned: true,
            ..Default::default()
        },
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    task.abort();

    assert!(!h.provider.is_alive(&orphan));
    assert_eq!(h.manager.active_count(None).await, 0);
}
