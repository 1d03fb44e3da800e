// ABOUTME: Shared fixtures for sandbox integration tests
// ABOUTME: In-memory fake sandbox provider with scriptable failures and call recording

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use stratus_config::SandboxSettings;
use stratus_core::{EventBus, ProviderError};
use stratus_sandbox::providers::Result as ProviderResult;
use stratus_sandbox::{CommandOutput, SandboxInfo, SandboxManager, SandboxProvider, SandboxSpec, SandboxState};
use stratus_storage::{
    DeploymentFilter, DeploymentRecord, DeploymentStatus, InMemoryRegistry, ManagedResource,
    Registry, ResourceFilter, ScheduledTask, StorageError, TaskFilter,
};

#[derive(Default)]
struct FakeState {
    sandboxes: HashMap<String, SandboxInfo>,
    files: HashMap<String, Vec<String>>,
    commands: Vec<(String, String)>,
    killed: Vec<String>,
    next_id: u32,
    fail_install: bool,
    fail_list: bool,
    fail_kill: HashSet<String>,
}

#[derive(Default)]
pub struct FakeSandboxProvider {
    state: Mutex<FakeState>,
}

impl FakeSandboxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_install(&self, fail: bool) {
        self.state.lock().unwrap().fail_install = fail;
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.lock().unwrap().fail_list = fail;
    }

    pub fn fail_kill_for(&self, sandbox_id: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_kill
            .insert(sandbox_id.to_string());
    }

    /// Start a sandbox behind the manager's back
    pub fn spawn_external(&self, labels: HashMap<String, String>) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("sbx-ext-{}", state.next_id);
        state.sandboxes.insert(
            id.clone(),
            SandboxInfo {
                id: id.clone(),
                state: SandboxState::Running,
                started_at: Utc::now(),
                metadata: labels,
            },
        );
        id
    }

    pub fn set_state(&self, sandbox_id: &str, sandbox_state: SandboxState) {
        if let Some(info) = self.state.lock().unwrap().sandboxes.get_mut(sandbox_id) {
            info.state = sandbox_state;
        }
    }

    pub fn alive(&self) -> usize {
        self.state.lock().unwrap().sandboxes.len()
    }

    pub fn is_alive(&self, sandbox_id: &str) -> bool {
        self.state.lock().unwrap().sandboxes.contains_key(sandbox_id)
    }

    pub fn killed(&self) -> Vec<String> {
        self.state.lock().unwrap().killed.clone()
    }

    pub fn files(&self, sandbox_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(sandbox_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn commands(&self, sandbox_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|(id, _)| id == sandbox_id)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }
}

#[async_trait]
impl SandboxProvider for FakeSandboxProvider {
    async fn create(&self, spec: &SandboxSpec) -> ProviderResult<SandboxInfo> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let info = SandboxInfo {
            id: format!("sbx-{}", state.next_id),
            state: SandboxState::Running,
            started_at: Utc::now(),
            metadata: spec.labels.clone(),
        };
        state.sandboxes.insert(info.id.clone(), info.clone());
        Ok(info)
    }

    async fn write_file(&self, sandbox_id: &str, path: &str, _content: &[u8]) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.sandboxes.contains_key(sandbox_id) {
            return Err(ProviderError::NotFound(sandbox_id.to_string()));
        }
        state
            .files
            .entry(sandbox_id.to_string())
            .or_default()
            .push(path.to_string());
        Ok(())
    }

    async fn run_command(&self, sandbox_id: &str, command: &str) -> ProviderResult<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        if !state.sandboxes.contains_key(sandbox_id) {
            return Err(ProviderError::NotFound(sandbox_id.to_string()));
        }
        state
            .commands
            .push((sandbox_id.to_string(), command.to_string()));

        if state.fail_install && command.contains("npm install") {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: "npm ERR! missing script".to_string(),
                exit_code: 1,
            });
        }
        if command.starts_with("tail -n") {
            return Ok(CommandOutput {
                stdout: "listening on 3000\nGET / 200".to_string(),
                stderr: String::new(),
                exit_code: 0,
            });
        }
        Ok(CommandOutput::default())
    }

    async fn get_host(&self, sandbox_id: &str, port: u16) -> ProviderResult<String> {
        Ok(format!("{}-{}.sandbox.test", port, sandbox_id))
    }

    async fn get_info(&self, sandbox_id: &str) -> ProviderResult<SandboxInfo> {
        self.state
            .lock()
            .unwrap()
            .sandboxes
            .get(sandbox_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(sandbox_id.to_string()))
    }

    async fn kill(&self, sandbox_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_kill.contains(sandbox_id) {
            return Err(ProviderError::Internal("kill refused".to_string()));
        }
        match state.sandboxes.remove(sandbox_id) {
            Some(_) => {
                state.killed.push(sandbox_id.to_string());
                Ok(())
            }
            None => Err(ProviderError::NotFound(sandbox_id.to_string())),
        }
    }

    async fn list(&self) -> ProviderResult<Vec<SandboxInfo>> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(ProviderError::Network("connection reset".to_string()));
        }
        Ok(state.sandboxes.values().cloned().collect())
    }

    async fn connect(&self, sandbox_id: &str) -> ProviderResult<SandboxInfo> {
        self.get_info(sandbox_id).await
    }
}

pub struct Harness {
    pub manager: Arc<SandboxManager>,
    pub provider: Arc<FakeSandboxProvider>,
    pub registry: Arc<InMemoryRegistry>,
    pub events: EventBus,
}

pub fn harness_with(settings: SandboxSettings) -> Harness {
    let provider = Arc::new(FakeSandboxProvider::new());
    let registry = Arc::new(InMemoryRegistry::new());
    let events = EventBus::new(64);
    let manager = Arc::new(SandboxManager::new(
        provider.clone(),
        registry.clone(),
        events.clone(),
        settings,
    ));
    Harness {
        manager,
        provider,
        registry,
        events,
    }
}

pub fn harness() -> Harness {
    harness_with(SandboxSettings::default())
}

/// Registry that can refuse writes marking a deployment running
#[derive(Default)]
pub struct FlakyRegistry {
    inner: InMemoryRegistry,
    refuse_running: AtomicBool,
}

impl FlakyRegistry {
    pub fn refuse_running_writes(&self, refuse: bool) {
        self.refuse_running.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Registry for FlakyRegistry {
    async fn insert_resource(&self, resource: &ManagedResource) -> stratus_storage::Result<()> {
        self.inner.insert_resource(resource).await
    }
    async fn get_resource(&self, id: &str) -> stratus_storage::Result<ManagedResource> {
        self.inner.get_resource(id).await
    }
    async fn update_resource(&self, resource: &ManagedResource) -> stratus_storage::Result<()> {
        self.inner.update_resource(resource).await
    }
    async fn delete_resource(&self, id: &str) -> stratus_storage::Result<()> {
        self.inner.delete_resource(id).await
    }
    async fn list_resources(
        &self,
        filter: &ResourceFilter,
    ) -> stratus_storage::Result<Vec<ManagedResource>> {
        self.inner.list_resources(filter).await
    }
    async fn insert_deployment(&self, record: &DeploymentRecord) -> stratus_storage::Result<()> {
        self.inner.insert_deployment(record).await
    }
    async fn get_deployment(&self, id: &str) -> stratus_storage::Result<DeploymentRecord> {
        self.inner.get_deployment(id).await
    }
    async fn update_deployment(&self, record: &DeploymentRecord) -> stratus_storage::Result<()> {
        if record.status == DeploymentStatus::Running && self.refuse_running.load(Ordering::SeqCst)
        {
            return Err(StorageError::InvalidStatus("disk full".to_string()));
        }
        self.inner.update_deployment(record).await
    }
    async fn list_deployments(
        &self,
        filter: &DeploymentFilter,
    ) -> stratus_storage::Result<Vec<DeploymentRecord>> {
        self.inner.list_deployments(filter).await
    }
    async fn insert_task(&self, task: &ScheduledTask) -> stratus_storage::Result<()> {
        self.inner.insert_task(task).await
    }
    async fn get_task(&self, id: &str) -> stratus_storage::Result<ScheduledTask> {
        self.inner.get_task(id).await
    }
    async fn update_task(&self, task: &ScheduledTask) -> stratus_storage::Result<()> {
        self.inner.update_task(task).await
    }
    async fn delete_task(&self, id: &str) -> stratus_storage::Result<()> {
        self.inner.delete_task(id).await
    }
    async fn list_tasks(&self, filter: &TaskFilter) -> stratus_storage::Result<Vec<ScheduledTask>> {
        self.inner.list_tasks(filter).await
    }
}

pub struct FlakyHarness {
    pub manager: Arc<SandboxManager>,
    pub provider: Arc<FakeSandboxProvider>,
    pub registry: Arc<FlakyRegistry>,
    pub events: EventBus,
}

/// Manager over a registry whose running writes can be refused
pub fn flaky_harness() -> FlakyHarness {
    let provider = Arc::new(FakeSandboxProvider::new());
    let registry = Arc::new(FlakyRegistry::default());
    let events = EventBus::new(64);
    let manager = Arc::new(SandboxManager::new(
        provider.clone(),
        registry.clone(),
        events.clone(),
        SandboxSettings::default(),
    ));
    FlakyHarness {
        manager,
        provider,
        registry,
        events,
    }
}
