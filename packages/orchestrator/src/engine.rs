// ABOUTME: Engine wiring the registry, event bus, sandbox manager, scheduler and orchestrator
// ABOUTME: Routes scheduled task actions to the sandbox manager or the resource orchestrator

use crate::error::{OrchestratorError, Result};
use crate::orchestrator::{Actor, ResourceOrchestrator};
use crate::placement::PlacementStrategy;
use crate::provider::ResourceProvider;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use stratus_config::EngineConfig;
use stratus_core::{EventBus, ProviderError, ID_PREFIX_DEPLOYMENT};
use stratus_sandbox::{ManagerError, ResyncReport, SandboxManager, SandboxProvider};
use stratus_scheduler::{ActionError, ActionResult, ResourceActions, TaskScheduler};
use stratus_storage::{
    BackupTaskConfig, ColdStorageTaskConfig, DeploymentStatus, DestructionTaskConfig,
    InMemoryRegistry, MaintenanceTaskConfig, OptimizationTaskConfig, Registry, ResourceStatus,
    ScalingPolicy, ScalingTaskConfig, ScheduledTask, SqliteRegistry, StorageError,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

fn is_deployment(id: &str) -> bool {
    id.strip_prefix(ID_PREFIX_DEPLOYMENT)
        .is_some_and(|rest| rest.starts_with('_'))
}

fn action_error(err: OrchestratorError) -> ActionError {
    match &err {
        OrchestratorError::NotFound(id) => ActionError::NotFound(id.clone()),
        OrchestratorError::Provider {
            source: ProviderError::Unsupported(what),
            ..
        } => ActionError::Unsupported(what.clone()),
        OrchestratorError::Sandbox(ManagerError::NotFound(id)) => ActionError::NotFound(id.clone()),
        _ => ActionError::Failed(err.to_string()),
    }
}

/// Scheduler-facing actions backed by the orchestrator and the sandbox manager
struct EngineActions {
    orchestrator: Weak<ResourceOrchestrator>,
    sandboxes: Arc<SandboxManager>,
    registry: Arc<dyn Registry>,
}

impl EngineActions {
    fn orchestrator(&self) -> std::result::Result<Arc<ResourceOrchestrator>, ActionError> {
        self.orchestrator
            .upgrade()
            .ok_or_else(|| ActionError::Failed("engine is shutting down".to_string()))
    }
}

#[async_trait]
impl ResourceActions for EngineActions {
    async fn exists(&self, resource_id: &str) -> std::result::Result<bool, ActionError> {
        let lookup = if is_deployment(resource_id) {
            self.registry
                .get_deployment(resource_id)
                .await
                .map(|d| d.status != DeploymentStatus::Destroyed)
        } else {
            self.registry
                .get_resource(resource_id)
                .await
                .map(|r| r.status != ResourceStatus::Destroyed)
        };
        match lookup {
            Ok(alive) => Ok(alive),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(ActionError::Failed(e.to_string())),
        }
    }

    async fn backup(&self, resource_id: &str, config: &BackupTaskConfig) -> ActionResult {
        let info = self
            .orchestrator()?
            .backup_with(&Actor::System, resource_id, config)
            .await
            .map_err(action_error)?;
        Ok(format!("backup {} ({} bytes)", info.backup_id, info.size_bytes))
    }

    async fn maintain(&self, resource_id: &str, config: &MaintenanceTaskConfig) -> ActionResult {
        self.orchestrator()?
            .maintain(&Actor::System, resource_id, config)
            .await
            .map_err(action_error)
    }

    async fn scale(&self, resource_id: &str, config: &ScalingTaskConfig) -> ActionResult {
        let policy = ScalingPolicy {
            min_replicas: config.min_replicas,
            max_replicas: config.max_replicas,
            target_cpu_percent: config.target_cpu_percent,
            ..ScalingPolicy::default()
        };
        let outcome = self
            .orchestrator()?
            .auto_scale(&Actor::System, resource_id, &policy)
            .await
            .map_err(action_error)?;
        Ok(format!(
            "replicas {} -> {} at {:.1}% CPU",
            outcome.previous_replicas, outcome.replicas, outcome.cpu_percent
        ))
    }

    async fn optimize(&self, resource_id: &str, config: &OptimizationTaskConfig) -> ActionResult {
        self.orchestrator()?
            .optimize(&Actor::System, resource_id, config)
            .await
            .map_err(action_error)
    }

    async fn migrate_to_cold_storage(
        &self,
        resource_id: &str,
        config: &ColdStorageTaskConfig,
    ) -> ActionResult {
        self.orchestrator()?
            .archive_to_cold_storage(&Actor::System, resource_id, config)
            .await
            .map_err(action_error)
    }

    async fn destroy(&self, resource_id: &str, config: &DestructionTaskConfig) -> ActionResult {
        if is_deployment(resource_id) {
            self.sandboxes
                .cancel(resource_id)
                .await
                .map_err(|e| action_error(e.into()))?;
        } else {
            self.orchestrator()?
                .destroy(&Actor::System, resource_id)
                .await
                .map_err(action_error)?;
        }
        Ok(format!("destroyed {} ({})", resource_id, config.reason))
    }
}

/// What `Engine::start` recovered from a previous run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StartReport {
    pub sandboxes: Option<ResyncReport>,
    pub rearmed_tasks: usize,
}

pub struct EngineBuilder {
    config: EngineConfig,
    registry: Option<Arc<dyn Registry>>,
    sandbox_provider: Option<Arc<dyn SandboxProvider>>,
    resource_providers: Vec<Arc<dyn ResourceProvider>>,
    placement: Option<Arc<dyn PlacementStrategy>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: None,
            sandbox_provider: None,
            resource_providers: Vec::new(),
            placement: None,
        }
    }

    /// Use this registry instead of the one `database_url` selects
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn sandbox_provider(mut self, provider: Arc<dyn SandboxProvider>) -> Self {
        self.sandbox_provider = Some(provider);
        self
    }

    pub fn resource_provider(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.resource_providers.push(provider);
        self
    }

    pub fn placement(mut self, placement: Arc<dyn PlacementStrategy>) -> Self {
        self.placement = Some(placement);
        self
    }

    pub async fn build(self) -> Result<Engine> {
        let sandbox_provider = self.sandbox_provider.ok_or_else(|| {
            OrchestratorError::Validation("a sandbox provider is required".to_string())
        })?;

        let registry: Arc<dyn Registry> = match (self.registry, &self.config.database_url) {
            (Some(registry), _) => registry,
            (None, Some(url)) => Arc::new(SqliteRegistry::connect(url).await?),
            (None, None) => Arc::new(InMemoryRegistry::new()),
        };
        let events = EventBus::new(self.config.event_channel_size);

        let sandboxes = Arc::new(SandboxManager::new(
            sandbox_provider,
            registry.clone(),
            events.clone(),
            self.config.sandbox.clone(),
        ));

        let providers = self.resource_providers;
        let placement = self.placement;
        let orchestrator = Arc::new_cyclic(|me: &Weak<ResourceOrchestrator>| {
            let actions = Arc::new(EngineActions {
                orchestrator: me.clone(),
                sandboxes: sandboxes.clone(),
                registry: registry.clone(),
            });
            let scheduler = TaskScheduler::new(
                registry.clone(),
                actions,
                events.clone(),
                self.config.scheduler.clone(),
            );

            let mut orchestrator = ResourceOrchestrator::new(
                registry.clone(),
                scheduler,
                events.clone(),
                self.config.orchestrator.clone(),
            );
            for provider in providers {
                orchestrator = orchestrator.with_provider(provider);
            }
            if let Some(placement) = placement {
                orchestrator = orchestrator.with_placement(placement);
            }
            orchestrator
        });
        let restored = orchestrator.restore_placements().await?;
        if restored > 0 {
            info!("Restored placement capacity of {} resources", restored);
        }

        Ok(Engine {
            scheduler: orchestrator.scheduler().clone(),
            config: self.config,
            registry,
            events,
            sandboxes,
            orchestrator,
            sandbox_cleanup: Mutex::new(None),
        })
    }
}

/// Fully wired control plane
pub struct Engine {
    config: EngineConfig,
    registry: Arc<dyn Registry>,
    events: EventBus,
    sandboxes: Arc<SandboxManager>,
    scheduler: Arc<TaskScheduler>,
    orchestrator: Arc<ResourceOrchestrator>,
    sandbox_cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn sandboxes(&self) -> &Arc<SandboxManager> {
        &self.sandboxes
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn orchestrator(&self) -> &Arc<ResourceOrchestrator> {
        &self.orchestrator
    }

    /// Recover state from the registry and providers, then start every background loop
    pub async fn start(&self) -> Result<StartReport> {
        let sandboxes = match self.sandboxes.resync().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Sandbox resync failed, continuing without it: {}", e);
                None
            }
        };
        let rearmed_tasks = self.scheduler.start().await?;
        self.orchestrator.start();

        let cleanup = self.sandboxes.clone().start_cleanup_task(
            self.config.sandbox.cleanup_interval,
            self.sandboxes.default_cleanup_policy(),
        );
        let mut slot = self
            .sandbox_cleanup
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(cleanup) {
            previous.abort();
        }

        info!("Engine started ({} scheduled tasks re-armed)", rearmed_tasks);
        Ok(StartReport {
            sandboxes,
            rearmed_tasks,
        })
    }

    pub fn shutdown(&self) {
        if let Some(cleanup) = self
            .sandbox_cleanup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            cleanup.abort();
        }
        self.orchestrator.shutdown();
        self.scheduler.shutdown();
        info!("Engine stopped");
    }

    /// Destroy a sandbox deployment once `ttl` has elapsed
    pub async fn schedule_deployment_ttl(
        &self,
        deployment_id: &str,
        ttl: Duration,
    ) -> Result<ScheduledTask> {
        let deployment = self.registry.get_deployment(deployment_id).await?;
        if deployment.status == DeploymentStatus::Destroyed {
            return Err(OrchestratorError::Validation(format!(
                "deployment {} is already destroyed",
                deployment_id
            )));
        }
        Ok(self
            .scheduler
            .schedule_destruction(deployment_id, ttl, None)
            .await?)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
