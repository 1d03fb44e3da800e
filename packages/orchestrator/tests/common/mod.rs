// ABOUTME: Shared fixtures for orchestrator and engine integration tests
// ABOUTME: Scriptable fake resource provider, a minimal sandbox provider and an engine harness

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stratus_config::EngineConfig;
use stratus_core::{EventBus, ProviderError};
use stratus_orchestrator::{
    BackupInfo, DeployRequest, Engine, InstanceHealth, PlacementTarget, ProvisionedInstance,
    ResourceMetrics, ResourceOrchestrator, ResourceProvider,
};
use stratus_sandbox::providers::Result as SandboxResult;
use stratus_sandbox::{CommandOutput, SandboxInfo, SandboxProvider, SandboxSpec, SandboxState};
use stratus_storage::{
    BackupTaskConfig, ConnectionInfo, DeploymentFilter, DeploymentRecord, InMemoryRegistry,
    MaintenanceTaskConfig, ManagedResource, Registry, ResourceConfig, ResourceFilter,
    ResourceStatus, ResourceType, ScheduledTask, StorageError, TaskFilter, TenantRecord,
};

type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[derive(Default)]
struct FakeState {
    instances: HashMap<String, u32>,
    unhealthy: HashSet<String>,
    cpu: HashMap<String, f64>,
    failing: HashSet<&'static str>,
    panicking: HashSet<&'static str>,
    calls: Vec<(&'static str, String)>,
    next_id: u32,
    next_backup: u32,
    backup_configs: Vec<BackupTaskConfig>,
}

/// In-memory engine provider. Operations are named by the call they fake:
/// deploy, scale, destroy, backup, restore, health, metrics, create_tenant,
/// remove_tenant, migrate_tenant, exists, failover, maintenance.
pub struct FakeResourceProvider {
    resource_type: ResourceType,
    state: Mutex<FakeState>,
}

impl FakeResourceProvider {
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            state: Mutex::new(FakeState::default()),
        }
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

    pub fn set_unhealthy(&self, instance_id: &str) {
        self.state
            .lock()
            .unwrap()
            .unhealthy
            .insert(instance_id.to_string());
    }

    pub fn set_cpu(&self, instance_id: &str, cpu_percent: f64) {
        self.state
            .lock()
            .unwrap()
            .cpu
            .insert(instance_id.to_string(), cpu_percent);
    }

    /// Drop an instance behind the orchestrator's back
    pub fn vanish(&self, instance_id: &str) {
        self.state.lock().unwrap().instances.remove(instance_id);
    }

    pub fn replicas(&self, instance_id: &str) -> Option<u32> {
        self.state.lock().unwrap().instances.get(instance_id).copied()
    }

    pub fn backup_configs(&self) -> Vec<BackupTaskConfig> {
        self.state.lock().unwrap().backup_configs.clone()
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

    fn enter(&self, operation: &'static str, subject: &str) -> ProviderResult<()> {
        let (fail, panic) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push((operation, subject.to_string()));
            (
                state.failing.contains(operation),
                state.panicking.contains(operation),
            )
        };
        if panic {
            panic!("{} exploded", operation);
        }
        if fail {
            return Err(ProviderError::Rejected(format!("{} refused", operation)));
        }
        Ok(())
    }

    fn known(&self, instance_id: &str) -> ProviderResult<()> {
        if self.state.lock().unwrap().instances.contains_key(instance_id) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(instance_id.to_string()))
        }
    }
}

#[async_trait]
impl ResourceProvider for FakeResourceProvider {
    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    async fn deploy_template(
        &self,
        config: &ResourceConfig,
        target: &PlacementTarget,
    ) -> ProviderResult<ProvisionedInstance> {
        self.enter("deploy", &config.name)?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let instance_id = format!("inst-{}", state.next_id);
        state.instances.insert(instance_id.clone(), config.replicas);

        let primary = format!("db://{}.{}:5432/{}", instance_id, target.region, config.name);
        let mut endpoints = BTreeMap::new();
        endpoints.insert("primary".to_string(), primary.clone());
        Ok(ProvisionedInstance {
            instance_id,
            connection: ConnectionInfo {
                primary_url: Some(primary),
                endpoints,
            },
        })
    }

    async fn scale_instance(&self, instance_id: &str, replicas: u32) -> ProviderResult<()> {
        self.enter("scale", instance_id)?;
        self.known(instance_id)?;
        self.state
            .lock()
            .unwrap()
            .instances
            .insert(instance_id.to_string(), replicas);
        Ok(())
    }

    async fn destroy_instance(&self, instance_id: &str) -> ProviderResult<()> {
        self.enter("destroy", instance_id)?;
        self.known(instance_id)?;
        self.vanish(instance_id);
        Ok(())
    }

    async fn create_backup(
        &self,
        instance_id: &str,
        config: &BackupTaskConfig,
    ) -> ProviderResult<BackupInfo> {
        self.enter("backup", instance_id)?;
        self.known(instance_id)?;
        let mut state = self.state.lock().unwrap();
        state.backup_configs.push(config.clone());
        state.next_backup += 1;
        Ok(BackupInfo {
            backup_id: format!("bk-{}", state.next_backup),
            size_bytes: 4096,
            created_at: Utc::now(),
        })
    }

    async fn restore_from_backup(&self, instance_id: &str, backup_id: &str) -> ProviderResult<()> {
        self.enter("restore", instance_id)?;
        self.known(instance_id)?;
        if !backup_id.starts_with("bk-") {
            return Err(ProviderError::Rejected(format!("unknown backup {}", backup_id)));
        }
        Ok(())
    }

    async fn check_health(&self, instance_id: &str) -> ProviderResult<InstanceHealth> {
        self.enter("health", instance_id)?;
        self.known(instance_id)?;
        if self.state.lock().unwrap().unhealthy.contains(instance_id) {
            Ok(InstanceHealth::unhealthy("replication lag too high"))
        } else {
            Ok(InstanceHealth::healthy())
        }
    }

    async fn get_metrics(&self, instance_id: &str) -> ProviderResult<ResourceMetrics> {
        self.enter("metrics", instance_id)?;
        self.known(instance_id)?;
        let cpu = self
            .state
            .lock()
            .unwrap()
            .cpu
            .get(instance_id)
            .copied()
            .unwrap_or(50.0);
        Ok(ResourceMetrics {
            cpu_percent: cpu,
            memory_percent: 40.0,
            storage_used_gb: 1.5,
            connections: 12,
            ops_per_second: 250.0,
        })
    }

    async fn create_tenant(&self, instance_id: &str, _tenant: &TenantRecord) -> ProviderResult<()> {
        self.enter("create_tenant", instance_id)?;
        self.known(instance_id)
    }

    async fn remove_tenant(&self, instance_id: &str, _tenant: &TenantRecord) -> ProviderResult<()> {
        self.enter("remove_tenant", instance_id)?;
        self.known(instance_id)
    }

    async fn migrate_tenant(
        &self,
        instance_id: &str,
        _current: &TenantRecord,
        _target: &TenantRecord,
    ) -> ProviderResult<()> {
        self.enter("migrate_tenant", instance_id)?;
        self.known(instance_id)
    }

    async fn instance_exists(&self, instance_id: &str) -> ProviderResult<bool> {
        self.enter("exists", instance_id)?;
        Ok(self.state.lock().unwrap().instances.contains_key(instance_id))
    }

    async fn failover(&self, instance_id: &str) -> ProviderResult<ConnectionInfo> {
        self.enter("failover", instance_id)?;
        self.known(instance_id)?;
        self.state.lock().unwrap().unhealthy.remove(instance_id);
        Ok(ConnectionInfo {
            primary_url: Some(format!("db://{}-replica:5432", instance_id)),
            endpoints: BTreeMap::new(),
        })
    }

    async fn run_maintenance(
        &self,
        instance_id: &str,
        config: &MaintenanceTaskConfig,
    ) -> ProviderResult<String> {
        self.enter("maintenance", instance_id)?;
        self.known(instance_id)?;
        Ok(format!("ran {} maintenance operations", config.operations.len()))
    }
}

/// Sandbox provider that accepts everything and records kills
#[derive(Default)]
pub struct QuietSandboxProvider {
    killed: Mutex<Vec<String>>,
}

impl QuietSandboxProvider {
    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxProvider for QuietSandboxProvider {
    async fn create(&self, spec: &SandboxSpec) -> SandboxResult<SandboxInfo> {
        Ok(SandboxInfo {
            id: "sbx-new".to_string(),
            state: SandboxState::Running,
            started_at: Utc::now(),
            metadata: spec.labels.clone(),
        })
    }

    async fn write_file(&self, _sandbox_id: &str, _path: &str, _content: &[u8]) -> SandboxResult<()> {
        Ok(())
    }

    async fn run_command(&self, _sandbox_id: &str, _command: &str) -> SandboxResult<CommandOutput> {
        Ok(CommandOutput::default())
    }

    async fn get_host(&self, sandbox_id: &str, port: u16) -> SandboxResult<String> {
        Ok(format!("{}-{}.sandbox.test", port, sandbox_id))
    }

    async fn get_info(&self, sandbox_id: &str) -> SandboxResult<SandboxInfo> {
        Err(ProviderError::NotFound(sandbox_id.to_string()))
    }

    async fn kill(&self, sandbox_id: &str) -> SandboxResult<()> {
        self.killed.lock().unwrap().push(sandbox_id.to_string());
        Ok(())
    }

    async fn list(&self) -> SandboxResult<Vec<SandboxInfo>> {
        Ok(Vec::new())
    }

    async fn connect(&self, sandbox_id: &str) -> SandboxResult<SandboxInfo> {
        Err(ProviderError::NotFound(sandbox_id.to_string()))
    }
}

/// In-memory registry with switchable write faults
#[derive(Default)]
pub struct FaultyRegistry {
    inner: InMemoryRegistry,
    reject_tasks: AtomicBool,
    running_writes_to_fail: AtomicUsize,
}

impl FaultyRegistry {
    /// The task table refuses new rows
    pub fn rejecting_tasks() -> Self {
        let registry = Self::default();
        registry.reject_tasks.store(true, Ordering::SeqCst);
        registry
    }

    /// The next `count` writes that mark a resource running fail
    pub fn fail_running_writes(&self, count: usize) {
        self.running_writes_to_fail.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Registry for FaultyRegistry {
    async fn insert_resource(&self, resource: &ManagedResource) -> stratus_storage::Result<()> {
        self.inner.insert_resource(resource).await
    }
    async fn get_resource(&self, id: &str) -> stratus_storage::Result<ManagedResource> {
        self.inner.get_resource(id).await
    }
    async fn update_resource(&self, resource: &ManagedResource) -> stratus_storage::Result<()> {
        if resource.status == ResourceStatus::Running
            && self
                .running_writes_to_fail
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StorageError::InvalidStatus("disk full".to_string()));
        }
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
        self.inner.update_deployment(record).await
    }
    async fn list_deployments(
        &self,
        filter: &DeploymentFilter,
    ) -> stratus_storage::Result<Vec<DeploymentRecord>> {
        self.inner.list_deployments(filter).await
    }
    async fn insert_task(&self, task: &ScheduledTask) -> stratus_storage::Result<()> {
        if self.reject_tasks.load(Ordering::SeqCst) {
            return Err(StorageError::InvalidStatus("task table is read-only".to_string()));
        }
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

pub struct Harness {
    pub engine: Engine,
    pub orchestrator: Arc<ResourceOrchestrator>,
    pub provider: Arc<FakeResourceProvider>,
    pub sandboxes: Arc<QuietSandboxProvider>,
    pub registry: Arc<dyn Registry>,
    pub events: EventBus,
}

pub async fn harness() -> Harness {
    harness_with(EngineConfig::default(), Arc::new(InMemoryRegistry::new())).await
}

pub async fn harness_with(config: EngineConfig, registry: Arc<dyn Registry>) -> Harness {
    stratus_config::init_test_tracing();
    let provider = Arc::new(FakeResourceProvider::new(ResourceType::Relational));
    let sandboxes = Arc::new(QuietSandboxProvider::default());
    let engine = Engine::builder(config)
        .registry(registry.clone())
        .sandbox_provider(sandboxes.clone())
        .resource_provider(provider.clone())
        .build()
        .await
        .unwrap();
    Harness {
        orchestrator: engine.orchestrator().clone(),
        events: engine.events().clone(),
        engine,
        provider,
        sandboxes,
        registry,
    }
}

pub fn request(owner_id: &str, name: &str) -> DeployRequest {
    DeployRequest::new(
        ResourceType::Relational,
        owner_id,
        ResourceConfig::new(name, "16"),
    )
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
