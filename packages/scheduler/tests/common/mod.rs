// ABOUTME: Shared fixtures for scheduler integration tests
// ABOUTME: Recording ResourceActions fake with scriptable failures, panics and missing resources

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stratus_config::SchedulerSettings;
use stratus_core::EventBus;
use stratus_scheduler::{ActionError, ActionResult, ResourceActions, TaskScheduler};
use stratus_storage::{
    BackupTaskConfig, ColdStorageTaskConfig, DestructionTaskConfig, InMemoryRegistry,
    MaintenanceTaskConfig, OptimizationTaskConfig, ScalingTaskConfig,
};

#[derive(Default)]
struct FakeState {
    missing: HashSet<String>,
    failing: HashSet<&'static str>,
    panicking: HashSet<&'static str>,
    calls: Vec<(&'static str, String)>,
}

#[derive(Default)]
pub struct FakeActions {
    state: Mutex<FakeState>,
}

impl FakeActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove_resource(&self, resource_id: &str) {
        self.state
            .lock()
            .unwrap()
            .missing
            .insert(resource_id.to_string());
    }

    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.remove(operation);
    }

    pub fn panic_on(&self, operation: &'static str) {
        self.state.lock().unwrap().panicking.insert(operation);
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    fn record(&self, operation: &'static str, resource_id: &str) -> ActionResult {
        let (fail, panic) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push((operation, resource_id.to_string()));
            (
                state.failing.contains(operation),
                state.panicking.contains(operation),
            )
        };
        if panic {
            panic!("{} exploded", operation);
        }
        if fail {
            return Err(ActionError::Failed(format!("{} failed", operation)));
        }
        Ok(format!("{} done for {}", operation, resource_id))
    }
}

#[async_trait]
impl ResourceActions for FakeActions {
    async fn exists(&self, resource_id: &str) -> Result<bool, ActionError> {
        Ok(!self.state.lock().unwrap().missing.contains(resource_id))
    }

    async fn backup(&self, resource_id: &str, _config: &BackupTaskConfig) -> ActionResult {
        self.record("backup", resource_id)
    }

    async fn maintain(&self, resource_id: &str, _config: &MaintenanceTaskConfig) -> ActionResult {
        self.record("maintain", resource_id)
    }

    async fn scale(&self, resource_id: &str, _config: &ScalingTaskConfig) -> ActionResult {
        self.record("scale", resource_id)
    }

    async fn optimize(&self, resource_id: &str, _config: &OptimizationTaskConfig) -> ActionResult {
        self.record("optimize", resource_id)
    }

    async fn migrate_to_cold_storage(
        &self,
        resource_id: &str,
        _config: &ColdStorageTaskConfig,
    ) -> ActionResult {
        self.record("cold_storage", resource_id)
    }

    async fn destroy(&self, resource_id: &str, _config: &DestructionTaskConfig) -> ActionResult {
        self.record("destroy", resource_id)
    }
}

pub struct Harness {
    pub scheduler: Arc<TaskScheduler>,
    pub actions: Arc<FakeActions>,
    pub registry: Arc<InMemoryRegistry>,
    pub events: EventBus,
}

pub fn harness_with(settings: SchedulerSettings) -> Harness {
    let actions = Arc::new(FakeActions::new());
    let registry = Arc::new(InMemoryRegistry::new());
    let events = EventBus::new(64);
    let scheduler = TaskScheduler::new(
        registry.clone(),
        actions.clone(),
        events.clone(),
        settings,
    );
    Harness {
        scheduler,
        actions,
        registry,
        events,
    }
}

pub fn harness() -> Harness {
    harness_with(SchedulerSettings {
        retry_backoff: Duration::from_secs(60 * 60),
        ..SchedulerSettings::default()
    })
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
