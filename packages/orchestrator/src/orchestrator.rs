// ABOUTME: Resource orchestrator driving managed data-engine instances through their lifecycle
// ABOUTME: Deploy, scale, destroy, tenants, backup and restore with per-resource serialization

use crate::error::{OrchestratorError, Result};
use crate::monitoring::MetricsSnapshot;
use crate::placement::{required_units, units_for, CapacityAwarePlacement, PlacementStrategy};
use crate::provider::{self, BackupInfo, ResourceProvider};
use futures::FutureExt;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use stratus_config::OrchestratorSettings;
use stratus_core::{EventBus, KeyedLock, PlatformEvent, ProviderError};
use stratus_scheduler::{Schedule, TaskScheduler};
use stratus_storage::{
    BackupPolicy, BackupTaskConfig, ColdStorageTaskConfig, ManagedResource, MaintenanceTaskConfig,
    OptimizationTaskConfig, QuotaUsage, Registry, ResourceConfig, ResourceFilter, ResourceStatus,
    ResourceType, ScalingPolicy, ScalingTaskConfig, ScheduledTask, StorageError, TenantIsolation,
    TenantQuota, TenantRecord,
};
use tokio::sync::{OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Who is asking. Users may only touch resources they own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    User(String),
    System,
}

impl Actor {
    pub fn user(user_id: &str) -> Self {
        Self::User(user_id.to_string())
    }

    pub fn can_access(&self, owner_id: &str) -> bool {
        match self {
            Self::System => true,
            Self::User(id) => id == owner_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployRequest {
    pub resource_type: ResourceType,
    pub owner_id: String,
    pub project_id: Option<String>,
    pub tenant_id: Option<String>,
    pub environment: String,
    pub config: ResourceConfig,
}

impl DeployRequest {
    pub fn new(resource_type: ResourceType, owner_id: &str, config: ResourceConfig) -> Self {
        Self {
            resource_type,
            owner_id: owner_id.to_string(),
            project_id: None,
            tenant_id: None,
            environment: "production".to_string(),
            config,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TenantRequest {
    pub tenant_id: String,
    pub isolation: TenantIsolation,
    pub quota: Option<TenantQuota>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoScaleOutcome {
    pub previous_replicas: u32,
    pub replicas: u32,
    pub cpu_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailoverOutcome {
    NotNeeded,
    FailedOver { primary_url: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Scale,
    Destroy,
    Backup,
    Restore,
    CreateTenant,
    RemoveTenant,
    MigrateTenant,
    Failover,
    Maintenance,
    Optimization,
    ColdStorage,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Scale => "scale",
            Self::Destroy => "destroy",
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::CreateTenant => "create tenant",
            Self::RemoveTenant => "remove tenant",
            Self::MigrateTenant => "migrate tenant",
            Self::Failover => "failover",
            Self::Maintenance => "maintenance",
            Self::Optimization => "optimization",
            Self::ColdStorage => "cold storage migration",
        }
    }

    /// Status held while the provider call is in flight
    fn in_progress(&self) -> Option<ResourceStatus> {
        match self {
            Self::Scale => Some(ResourceStatus::Scaling),
            Self::Destroy => Some(ResourceStatus::Stopping),
            Self::Backup => Some(ResourceStatus::BackingUp),
            Self::Restore => Some(ResourceStatus::Restoring),
            Self::CreateTenant
            | Self::RemoveTenant
            | Self::MigrateTenant
            | Self::Failover
            | Self::ColdStorage => Some(ResourceStatus::Migrating),
            Self::Maintenance | Self::Optimization => None,
        }
    }

    /// Status after a successful provider call, if it changes
    fn settled(&self) -> Option<ResourceStatus> {
        match self {
            Self::Destroy => Some(ResourceStatus::Destroyed),
            _ => self.in_progress().map(|_| ResourceStatus::Running),
        }
    }

    fn allowed_from(&self, status: ResourceStatus) -> bool {
        match self {
            Self::Destroy => matches!(
                status,
                ResourceStatus::Running
                    | ResourceStatus::Failed
                    | ResourceStatus::Stopped
                    | ResourceStatus::Destroyed
            ),
            _ => status == ResourceStatus::Running,
        }
    }
}

/// An operation holding the resource lock between load and completion
struct InFlight {
    _guard: OwnedMutexGuard<()>,
    operation: Operation,
    resource: ManagedResource,
    provider: Arc<dyn ResourceProvider>,
}

impl InFlight {
    fn instance_id(&self) -> String {
        self.resource.metadata.instance_id.clone().unwrap_or_default()
    }
}

/// Run a provider call, turning a panic into an internal provider error
pub(crate) async fn guarded<T>(call: impl Future<Output = provider::Result<T>>) -> provider::Result<T> {
    AssertUnwindSafe(call)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(ProviderError::Internal("provider call panicked".to_string())))
}

pub(crate) fn backup_config(policy: Option<&BackupPolicy>) -> BackupTaskConfig {
    policy
        .map(|p| BackupTaskConfig {
            backup_type: p.backup_type,
            compression: p.compression,
            retention_days: p.retention_days,
        })
        .unwrap_or_default()
}

/// Replica count a scaling policy asks for at the observed CPU load
pub fn decide_replicas(current: u32, cpu_percent: f64, policy: &ScalingPolicy) -> u32 {
    let desired = if cpu_percent > policy.target_cpu_percent {
        current.saturating_add(1)
    } else if cpu_percent < policy.target_cpu_percent / 2.0 {
        current.saturating_sub(1)
    } else {
        current
    };
    let max = policy.max_replicas.max(policy.min_replicas);
    desired.max(policy.min_replicas).min(max)
}

fn tenant_supported(resource_type: ResourceType, isolation: TenantIsolation) -> bool {
    match isolation {
        TenantIsolation::Shared | TenantIsolation::Database => true,
        TenantIsolation::Schema => resource_type == ResourceType::Relational,
        TenantIsolation::KeyPrefix => resource_type == ResourceType::KeyValue,
    }
}

fn tenant_namespace(isolation: TenantIsolation, tenant_id: &str) -> String {
    match isolation {
        TenantIsolation::Shared => tenant_id.to_string(),
        TenantIsolation::Schema => format!("tenant_{}", tenant_id),
        TenantIsolation::Database => format!("db_{}", tenant_id),
        TenantIsolation::KeyPrefix => format!("{}:", tenant_id),
    }
}

fn validate_schedule(what: &str, expression: &str) -> Result<()> {
    Schedule::parse(expression)
        .map(|_| ())
        .map_err(|e| OrchestratorError::Validation(format!("{}: {}", what, e)))
}

fn validate_scaling_policy(policy: &ScalingPolicy) -> Result<()> {
    if policy.min_replicas == 0 || policy.min_replicas > policy.max_replicas {
        return Err(OrchestratorError::Validation(format!(
            "scaling bounds {}..{} are invalid",
            policy.min_replicas, policy.max_replicas
        )));
    }
    if !(policy.target_cpu_percent > 0.0 && policy.target_cpu_percent <= 100.0) {
        return Err(OrchestratorError::Validation(format!(
            "target CPU {}% is out of range",
            policy.target_cpu_percent
        )));
    }
    Ok(())
}

pub struct ResourceOrchestrator {
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) providers: HashMap<ResourceType, Arc<dyn ResourceProvider>>,
    placement: Arc<dyn PlacementStrategy>,
    scheduler: Arc<TaskScheduler>,
    pub(crate) events: EventBus,
    pub(crate) settings: OrchestratorSettings,
    pub(crate) locks: KeyedLock,
    owner_locks: KeyedLock,
    pub(crate) metrics: RwLock<HashMap<String, VecDeque<MetricsSnapshot>>>,
    pub(crate) loops: Mutex<Vec<JoinHandle<()>>>,
}

impl ResourceOrchestrator {
    pub fn new(
        registry: Arc<dyn Registry>,
        scheduler: Arc<TaskScheduler>,
        events: EventBus,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            providers: HashMap::new(),
            placement: Arc::new(CapacityAwarePlacement::default()),
            scheduler,
            events,
            settings,
            locks: KeyedLock::new(),
            owner_locks: KeyedLock::new(),
            metrics: RwLock::new(HashMap::new()),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Register the provider for its resource type, replacing any previous one
    pub fn with_provider(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.providers.insert(provider.resource_type(), provider);
        self
    }

    pub fn with_placement(mut self, placement: Arc<dyn PlacementStrategy>) -> Self {
        self.placement = placement;
        self
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub(crate) fn provider_for(
        &self,
        resource_type: ResourceType,
    ) -> Result<Arc<dyn ResourceProvider>> {
        self.providers.get(&resource_type).cloned().ok_or_else(|| {
            OrchestratorError::Validation(format!(
                "no provider registered for {} resources",
                resource_type.as_str()
            ))
        })
    }

    pub(crate) fn authorize(actor: &Actor, resource: &ManagedResource) -> Result<()> {
        if actor.can_access(&resource.owner_id) {
            Ok(())
        } else {
            Err(OrchestratorError::AccessDenied(resource.id.clone()))
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub async fn get_resource(&self, actor: &Actor, resource_id: &str) -> Result<ManagedResource> {
        let resource = self.registry.get_resource(resource_id).await?;
        Self::authorize(actor, &resource)?;
        Ok(resource)
    }

    /// List resources; users only ever see their own
    pub async fn list_resources(
        &self,
        actor: &Actor,
        mut filter: ResourceFilter,
    ) -> Result<Vec<ManagedResource>> {
        if let Actor::User(user_id) = actor {
            filter.owner_id = Some(user_id.clone());
        }
        Ok(self.registry.list_resources(&filter).await?)
    }

    // ------------------------------------------------------------------
    // Deploy
    // ------------------------------------------------------------------

    /// Check the request and return the capacity units it needs
    fn validate_request(&self, request: &DeployRequest) -> Result<u32> {
        let config = &request.config;
        if config.name.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "resource name must not be empty".to_string(),
            ));
        }
        if request.owner_id.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "owner id must not be empty".to_string(),
            ));
        }
        if config.replicas == 0 {
            return Err(OrchestratorError::Validation(
                "replicas must be at least 1".to_string(),
            ));
        }
        let units = required_units(config).ok_or_else(|| {
            OrchestratorError::Validation(format!(
                "{} replicas exceed the capacity a placement target can describe",
                config.replicas
            ))
        })?;
        if config.storage_gb == 0 {
            return Err(OrchestratorError::Validation(
                "storage must be at least 1 GB".to_string(),
            ));
        }
        if let Some(scaling) = &config.scaling {
            validate_scaling_policy(scaling)?;
            validate_schedule("scaling schedule", &scaling.schedule)?;
        }
        if let Some(backup) = config.backup.as_ref().filter(|b| b.enabled) {
            validate_schedule("backup schedule", &backup.schedule)?;
        }
        if let Some(expr) = config
            .monitoring
            .as_ref()
            .filter(|m| m.enabled)
            .and_then(|m| m.maintenance_schedule.as_deref())
        {
            validate_schedule("maintenance schedule", expr)?;
        }
        Ok(units)
    }

    /// Provision a new managed resource and wire its recurring work
    pub async fn deploy(&self, actor: &Actor, request: DeployRequest) -> Result<ManagedResource> {
        if !actor.can_access(&request.owner_id) {
            return Err(OrchestratorError::AccessDenied(format!(
                "owned by {}",
                request.owner_id
            )));
        }
        let units = self.validate_request(&request)?;
        let provider = self.provider_for(request.resource_type)?;

        let _owner = self.owner_locks.lock(&request.owner_id).await;
        let existing = self
            .registry
            .list_resources(&ResourceFilter::owner(&request.owner_id))
            .await?;
        let active = existing
            .iter()
            .filter(|r| r.status != ResourceStatus::Destroyed)
            .count();
        if active >= self.settings.max_resources_per_user {
            return Err(OrchestratorError::QuotaExceeded(format!(
                "user {} has {} resources (limit {})",
                request.owner_id, active, self.settings.max_resources_per_user
            )));
        }

        let target = self
            .placement
            .select(request.resource_type, &request.config)
            .ok_or_else(|| {
                OrchestratorError::NoCapacity(format!(
                    "{} {} units",
                    request.resource_type.as_str(),
                    units
                ))
            })?;

        let mut resource = ManagedResource::new(
            request.resource_type,
            &request.owner_id,
            &request.environment,
            request.config,
        );
        resource.project_id = request.project_id;
        resource.tenant_id = request.tenant_id;
        resource.metadata.placement_target = Some(target.id.clone());
        resource.metadata.quota_usage = QuotaUsage {
            storage_gb: resource.config.storage_gb,
            replicas: resource.config.replicas,
            tenants: 0,
        };

        let _guard = self.locks.lock(&resource.id).await;
        if let Err(e) = self.registry.insert_resource(&resource).await {
            self.placement.release(&target.id, units);
            return Err(e.into());
        }

        resource.set_status(ResourceStatus::Provisioning);
        if let Err(e) = self.registry.update_resource(&resource).await {
            self.placement.release(&target.id, units);
            if let Err(cleanup) = self.registry.delete_resource(&resource.id).await {
                warn!(
                    "Failed to remove unprovisioned resource {}: {}",
                    resource.id, cleanup
                );
            }
            return Err(e.into());
        }
        info!(
            "Provisioning {} resource {} '{}' for {} on {}",
            resource.resource_type.as_str(),
            resource.id,
            resource.config.name,
            resource.owner_id,
            target.id
        );

        match guarded(provider.deploy_template(&resource.config, &target)).await {
            Ok(instance) => {
                resource.metadata.instance_id = Some(instance.instance_id);
                resource.connection = instance.connection;
                resource.set_status(ResourceStatus::Running);
                if let Err(e) = self.registry.update_resource(&resource).await {
                    self.abandon_provisioned(
                        &mut resource,
                        provider.as_ref(),
                        &target.id,
                        units,
                        &e,
                    )
                    .await;
                    return Err(e.into());
                }
            }
            Err(source) => {
                self.placement.release(&target.id, units);
                resource.metadata.placement_target = None;
                resource.metadata.last_error = Some(source.to_string());
                resource.set_status(ResourceStatus::Failed);
                if let Err(e) = self.registry.update_resource(&resource).await {
                    warn!(
                        "Failed to record provisioning failure of resource {}: {}",
                        resource.id, e
                    );
                }

                error!("Provisioning of resource {} failed: {}", resource.id, source);
                self.events.publish(PlatformEvent::ResourceFailed {
                    resource_id: resource.id.clone(),
                    operation: "deploy".to_string(),
                    error: source.to_string(),
                });
                return Err(OrchestratorError::Provider {
                    resource_id: resource.id,
                    operation: "deploy".to_string(),
                    source,
                });
            }
        }

        info!("Resource {} is running", resource.id);
        self.events.publish(PlatformEvent::ResourceCreated {
            resource_id: resource.id.clone(),
            resource_type: resource.resource_type.as_str().to_string(),
            owner_id: resource.owner_id.clone(),
        });

        let failures = self.wire_recurring_work(&mut resource).await;
        if !failures.is_empty() {
            warn!(
                "Resource {} is running with {} setup failures",
                resource.id,
                failures.len()
            );
            return Err(OrchestratorError::PartiallyProvisioned {
                resource_id: resource.id,
                failures,
            });
        }
        Ok(resource)
    }

    /// The instance exists but the record could not say so: tear the instance
    /// down and leave the record failed, best effort.
    async fn abandon_provisioned(
        &self,
        resource: &mut ManagedResource,
        provider: &dyn ResourceProvider,
        target_id: &str,
        units: u32,
        cause: &StorageError,
    ) {
        error!(
            "Resource {} was provisioned but could not be recorded: {}",
            resource.id, cause
        );
        if let Some(instance) = resource.metadata.instance_id.take() {
            match guarded(provider.destroy_instance(&instance)).await {
                Ok(()) | Err(ProviderError::NotFound(_)) => {}
                Err(e) => {
                    warn!(
                        "Failed to tear down instance {} of resource {}: {}",
                        instance, resource.id, e
                    );
                    resource.metadata.instance_id = Some(instance);
                }
            }
        }
        self.placement.release(target_id, units);
        resource.metadata.placement_target = None;
        resource.metadata.last_error = Some(format!("provisioning not recorded: {}", cause));
        resource.set_status(ResourceStatus::Failed);
        if let Err(e) = self.registry.update_resource(resource).await {
            warn!("Failed to mark resource {} failed: {}", resource.id, e);
        }
        self.events.publish(PlatformEvent::ResourceFailed {
            resource_id: resource.id.clone(),
            operation: "deploy".to_string(),
            error: cause.to_string(),
        });
    }

    /// Register monitoring, backup and scaling tasks. Returns what could not be set up.
    async fn wire_recurring_work(&self, resource: &mut ManagedResource) -> Vec<String> {
        let mut failures = Vec::new();
        let id = resource.id.clone();

        if let Some(expr) = resource
            .config
            .monitoring
            .as_ref()
            .filter(|m| m.enabled)
            .and_then(|m| m.maintenance_schedule.clone())
        {
            if let Err(e) = self.scheduler.schedule_maintenance(&id, &expr, None).await {
                failures.push(format!("maintenance schedule: {}", e));
            }
        }

        if let Some(policy) = resource.config.backup.clone().filter(|b| b.enabled) {
            match self
                .scheduler
                .schedule_backup(&id, &policy.schedule, Some(backup_config(Some(&policy))))
                .await
            {
                Ok(task) => resource.metadata.next_backup_at = task.next_run_at,
                Err(e) => failures.push(format!("backup schedule: {}", e)),
            }
        }

        if let Some(policy) = resource.config.scaling.clone() {
            if let Err(e) = self
                .scheduler
                .schedule_scaling(&id, &policy.schedule, Some(ScalingTaskConfig::from(&policy)))
                .await
            {
                failures.push(format!("scaling schedule: {}", e));
            }
        }

        if resource.metadata.next_backup_at.is_some() {
            resource.updated_at = chrono::Utc::now();
            if let Err(e) = self.registry.update_resource(resource).await {
                failures.push(format!("record update: {}", e));
            }
        }
        failures
    }

    // ------------------------------------------------------------------
    // Operation plumbing
    // ------------------------------------------------------------------

    /// Lock, load, authorize and check the resource can take `operation`
    async fn begin(
        &self,
        actor: &Actor,
        resource_id: &str,
        operation: Operation,
    ) -> Result<InFlight> {
        let guard = self.locks.lock(resource_id).await;
        let resource = self.registry.get_resource(resource_id).await?;
        Self::authorize(actor, &resource)?;

        let invalid = || OrchestratorError::InvalidState {
            resource_id: resource.id.clone(),
            status: resource.status,
            operation: operation.as_str().to_string(),
        };
        if !operation.allowed_from(resource.status) {
            return Err(invalid());
        }
        if operation != Operation::Destroy && resource.metadata.instance_id.is_none() {
            return Err(invalid());
        }

        let provider = self.provider_for(resource.resource_type)?;
        Ok(InFlight {
            _guard: guard,
            operation,
            resource,
            provider,
        })
    }

    /// Persist the in-progress status for the operation
    async fn enter(&self, op: &mut InFlight) -> Result<()> {
        if let Some(status) = op.operation.in_progress() {
            op.resource.set_status(status);
            self.registry.update_resource(&op.resource).await?;
            debug!(
                "Resource {} is {} for {}",
                op.resource.id,
                status.as_str(),
                op.operation.as_str()
            );
        }
        Ok(())
    }

    /// Settle the resource after the provider call: success applies the outcome,
    /// failure marks the resource failed and re-raises the provider error.
    async fn complete<T>(
        &self,
        mut op: InFlight,
        outcome: provider::Result<T>,
        apply: impl FnOnce(&mut ManagedResource, &T),
    ) -> Result<(ManagedResource, T)> {
        match outcome {
            Ok(value) => {
                apply(&mut op.resource, &value);
                op.resource.metadata.last_error = None;
                match op.operation.settled() {
                    Some(status) => op.resource.set_status(status),
                    None => op.resource.updated_at = chrono::Utc::now(),
                }
                self.registry.update_resource(&op.resource).await?;
                debug!(
                    "{} finished for resource {}",
                    op.operation.as_str(),
                    op.resource.id
                );
                Ok((op.resource, value))
            }
            Err(source) => {
                let message = source.to_string();
                op.resource.metadata.last_error = Some(message.clone());
                let fails_resource = op.operation.in_progress().is_some();
                if fails_resource {
                    op.resource.set_status(ResourceStatus::Failed);
                } else {
                    op.resource.updated_at = chrono::Utc::now();
                }
                self.registry.update_resource(&op.resource).await?;

                if fails_resource {
                    error!(
                        "{} failed for resource {}: {}",
                        op.operation.as_str(),
                        op.resource.id,
                        message
                    );
                    self.events.publish(PlatformEvent::ResourceFailed {
                        resource_id: op.resource.id.clone(),
                        operation: op.operation.as_str().to_string(),
                        error: message,
                    });
                } else {
                    warn!(
                        "{} failed for resource {}, leaving it {}: {}",
                        op.operation.as_str(),
                        op.resource.id,
                        op.resource.status.as_str(),
                        message
                    );
                }
                Err(OrchestratorError::Provider {
                    resource_id: op.resource.id.clone(),
                    operation: op.operation.as_str().to_string(),
                    source,
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    pub async fn scale(
        &self,
        actor: &Actor,
        resource_id: &str,
        replicas: u32,
    ) -> Result<ManagedResource> {
        if replicas == 0 {
            return Err(OrchestratorError::Validation(
                "replicas must be at least 1".to_string(),
            ));
        }

        let mut op = self.begin(actor, resource_id, Operation::Scale).await?;
        let current = op.resource.config.replicas;
        if replicas == current {
            return Ok(op.resource);
        }

        let size = op.resource.config.size;
        let (Some(from_units), Some(to_units)) =
            (units_for(size, current), units_for(size, replicas))
        else {
            return Err(OrchestratorError::Validation(format!(
                "{} replicas exceed the capacity a placement target can describe",
                replicas
            )));
        };
        let target = op.resource.metadata.placement_target.clone();
        if let Some(target) = &target {
            if !self.placement.resize(target, from_units, to_units) {
                return Err(OrchestratorError::NoCapacity(format!(
                    "{} replicas on {}",
                    replicas, target
                )));
            }
        }
        let undo_resize = || {
            if let Some(target) = &target {
                self.placement.resize(target, to_units, from_units);
            }
        };

        if let Err(e) = self.enter(&mut op).await {
            undo_resize();
            return Err(e);
        }

        let instance = op.instance_id();
        let outcome = guarded(op.provider.scale_instance(&instance, replicas)).await;
        if outcome.is_err() {
            undo_resize();
        }

        let (resource, ()) = self
            .complete(op, outcome, |r, _| {
                r.config.replicas = replicas;
                r.metadata.quota_usage.replicas = replicas;
            })
            .await?;

        info!(
            "Scaled resource {} from {} to {} replicas",
            resource.id, current, replicas
        );
        self.events.publish(PlatformEvent::ResourceScaled {
            resource_id: resource.id.clone(),
            replicas,
        });
        Ok(resource)
    }

    /// Tear down the backing instance and retire the record. Idempotent.
    pub async fn destroy(&self, actor: &Actor, resource_id: &str) -> Result<ManagedResource> {
        let mut op = self.begin(actor, resource_id, Operation::Destroy).await?;
        if op.resource.status == ResourceStatus::Destroyed {
            return Ok(op.resource);
        }

        self.enter(&mut op).await?;
        let outcome = match op.resource.metadata.instance_id.clone() {
            Some(instance) => match guarded(op.provider.destroy_instance(&instance)).await {
                Err(ProviderError::NotFound(_)) => Ok(()),
                other => other,
            },
            None => Ok(()),
        };

        let (resource, ()) = self.complete(op, outcome, |_, _| {}).await?;
        self.after_destroyed(&resource).await;
        info!("Destroyed resource {}", resource.id);
        Ok(resource)
    }

    /// Re-reserve the placement capacity of resources already in the registry.
    /// Run once, before any deploy, when the process comes back up.
    pub async fn restore_placements(&self) -> Result<usize> {
        let resources = self
            .registry
            .list_resources(&ResourceFilter::default())
            .await?;
        let mut restored = 0;
        for resource in resources
            .iter()
            .filter(|r| r.status != ResourceStatus::Destroyed)
        {
            let (Some(target), Some(units)) = (
                &resource.metadata.placement_target,
                required_units(&resource.config),
            ) else {
                continue;
            };
            if self.placement.reserve(target, units) {
                restored += 1;
            } else {
                warn!(
                    "Resource {} is placed on unknown target {}",
                    resource.id, target
                );
            }
        }
        debug!("Restored placement of {} resources", restored);
        Ok(restored)
    }

    /// Release everything held on behalf of a destroyed resource
    pub(crate) async fn after_destroyed(&self, resource: &ManagedResource) {
        if let (Some(target), Some(units)) = (
            &resource.metadata.placement_target,
            required_units(&resource.config),
        ) {
            self.placement.release(target, units);
        }
        match self.scheduler.cancel_all_for_resource(&resource.id).await {
            Ok(0) => {}
            Ok(n) => debug!("Cancelled {} tasks of resource {}", n, resource.id),
            Err(e) => warn!(
                "Failed to cancel tasks of destroyed resource {}: {}",
                resource.id, e
            ),
        }
        self.metrics.write().await.remove(&resource.id);
        self.events.publish(PlatformEvent::ResourceDestroyed {
            resource_id: resource.id.clone(),
        });
    }

    pub async fn create_tenant(
        &self,
        actor: &Actor,
        resource_id: &str,
        request: TenantRequest,
    ) -> Result<TenantRecord> {
        let tenant_id = request.tenant_id.trim();
        if tenant_id.is_empty()
            || !tenant_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(OrchestratorError::Validation(format!(
                "invalid tenant id '{}'",
                request.tenant_id
            )));
        }

        let mut op = self.begin(actor, resource_id, Operation::CreateTenant).await?;
        if !tenant_supported(op.resource.resource_type, request.isolation) {
            return Err(OrchestratorError::Validation(format!(
                "{:?} isolation is not available for {} resources",
                request.isolation,
                op.resource.resource_type.as_str()
            )));
        }
        if op.resource.tenant(tenant_id).is_some() {
            return Err(OrchestratorError::Validation(format!(
                "tenant {} already exists on {}",
                tenant_id, resource_id
            )));
        }

        let tenant = TenantRecord {
            tenant_id: tenant_id.to_string(),
            isolation: request.isolation,
            namespace: tenant_namespace(request.isolation, tenant_id),
            quota: request.quota.unwrap_or_default(),
            created_at: chrono::Utc::now(),
        };

        self.enter(&mut op).await?;
        let instance = op.instance_id();
        let outcome = guarded(op.provider.create_tenant(&instance, &tenant)).await;
        let created = tenant.clone();
        self.complete(op, outcome, move |r, _| {
            r.tenants.push(created);
            r.metadata.quota_usage.tenants = r.tenants.len() as u32;
        })
        .await?;

        info!("Created tenant {} on resource {}", tenant.tenant_id, resource_id);
        Ok(tenant)
    }

    pub async fn remove_tenant(
        &self,
        actor: &Actor,
        resource_id: &str,
        tenant_id: &str,
    ) -> Result<()> {
        let mut op = self.begin(actor, resource_id, Operation::RemoveTenant).await?;
        let tenant = op.resource.tenant(tenant_id).cloned().ok_or_else(|| {
            OrchestratorError::NotFound(format!("tenant {} on {}", tenant_id, resource_id))
        })?;

        self.enter(&mut op).await?;
        let instance = op.instance_id();
        let outcome = guarded(op.provider.remove_tenant(&instance, &tenant)).await;
        self.complete(op, outcome, |r, _| {
            r.tenants.retain(|t| t.tenant_id != tenant.tenant_id);
            r.metadata.quota_usage.tenants = r.tenants.len() as u32;
        })
        .await?;

        info!("Removed tenant {} from resource {}", tenant_id, resource_id);
        Ok(())
    }

    /// Move a tenant to another isolation kind
    pub async fn migrate_tenant(
        &self,
        actor: &Actor,
        resource_id: &str,
        tenant_id: &str,
        isolation: TenantIsolation,
    ) -> Result<TenantRecord> {
        let mut op = self.begin(actor, resource_id, Operation::MigrateTenant).await?;
        let current = op.resource.tenant(tenant_id).cloned().ok_or_else(|| {
            OrchestratorError::NotFound(format!("tenant {} on {}", tenant_id, resource_id))
        })?;
        if current.isolation == isolation {
            return Err(OrchestratorError::Validation(format!(
                "tenant {} already uses {:?} isolation",
                tenant_id, isolation
            )));
        }
        if !tenant_supported(op.resource.resource_type, isolation) {
            return Err(OrchestratorError::Validation(format!(
                "{:?} isolation is not available for {} resources",
                isolation,
                op.resource.resource_type.as_str()
            )));
        }

        let target = TenantRecord {
            isolation,
            namespace: tenant_namespace(isolation, tenant_id),
            ..current.clone()
        };

        self.enter(&mut op).await?;
        let instance = op.instance_id();
        let outcome = guarded(op.provider.migrate_tenant(&instance, &current, &target)).await;
        let migrated = target.clone();
        self.complete(op, outcome, move |r, _| {
            if let Some(slot) = r.tenants.iter_mut().find(|t| t.tenant_id == migrated.tenant_id) {
                *slot = migrated;
            }
        })
        .await?;

        info!(
            "Migrated tenant {} on resource {} to {:?} isolation",
            tenant_id, resource_id, isolation
        );
        Ok(target)
    }

    /// Back up with the resource's own backup policy
    pub async fn backup(&self, actor: &Actor, resource_id: &str) -> Result<BackupInfo> {
        self.run_backup(actor, resource_id, None).await
    }

    /// Back up with an explicit configuration, as scheduled backup tasks carry
    pub async fn backup_with(
        &self,
        actor: &Actor,
        resource_id: &str,
        config: &BackupTaskConfig,
    ) -> Result<BackupInfo> {
        self.run_backup(actor, resource_id, Some(config)).await
    }

    async fn run_backup(
        &self,
        actor: &Actor,
        resource_id: &str,
        config: Option<&BackupTaskConfig>,
    ) -> Result<BackupInfo> {
        let mut op = self.begin(actor, resource_id, Operation::Backup).await?;
        let config = match config {
            Some(config) => config.clone(),
            None => backup_config(op.resource.config.backup.as_ref()),
        };

        self.enter(&mut op).await?;
        let instance = op.instance_id();
        let outcome = guarded(op.provider.create_backup(&instance, &config)).await;
        let (_, info) = self
            .complete(op, outcome, |r, info| {
                r.metadata.last_backup_at = Some(info.created_at);
                r.metadata.last_backup_id = Some(info.backup_id.clone());
            })
            .await?;

        info!(
            "Backup {} of resource {} completed ({} bytes)",
            info.backup_id, resource_id, info.size_bytes
        );
        self.events.publish(PlatformEvent::BackupCreated {
            resource_id: resource_id.to_string(),
            backup_id: info.backup_id.clone(),
            size_bytes: info.size_bytes,
        });
        Ok(info)
    }

    pub async fn restore(
        &self,
        actor: &Actor,
        resource_id: &str,
        backup_id: &str,
    ) -> Result<ManagedResource> {
        if backup_id.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "backup id must not be empty".to_string(),
            ));
        }

        let mut op = self.begin(actor, resource_id, Operation::Restore).await?;
        self.enter(&mut op).await?;
        let instance = op.instance_id();
        let outcome = guarded(op.provider.restore_from_backup(&instance, backup_id)).await;
        let (resource, ()) = self.complete(op, outcome, |_, _| {}).await?;

        info!("Restored resource {} from backup {}", resource_id, backup_id);
        Ok(resource)
    }

    // ------------------------------------------------------------------
    // Policy-driven operations
    // ------------------------------------------------------------------

    /// Evaluate a scaling policy against current metrics and scale if needed
    pub async fn auto_scale(
        &self,
        actor: &Actor,
        resource_id: &str,
        policy: &ScalingPolicy,
    ) -> Result<AutoScaleOutcome> {
        validate_scaling_policy(policy)?;

        let metrics = self.get_metrics(actor, resource_id).await?;
        let resource = self.get_resource(actor, resource_id).await?;
        let previous = resource.config.replicas;
        let desired = decide_replicas(previous, metrics.cpu_percent, policy);

        if desired != previous {
            info!(
                "Auto-scaling resource {} from {} to {} replicas (CPU {:.1}%)",
                resource_id, previous, desired, metrics.cpu_percent
            );
            self.scale(actor, resource_id, desired).await?;
        }

        Ok(AutoScaleOutcome {
            previous_replicas: previous,
            replicas: desired,
            cpu_percent: metrics.cpu_percent,
        })
    }

    /// Replace the resource's backup schedule with `policy`
    pub async fn auto_backup(
        &self,
        actor: &Actor,
        resource_id: &str,
        policy: &BackupPolicy,
    ) -> Result<Option<ScheduledTask>> {
        let resource = self.get_resource(actor, resource_id).await?;
        if resource.status == ResourceStatus::Destroyed {
            return Err(OrchestratorError::InvalidState {
                resource_id: resource.id,
                status: ResourceStatus::Destroyed,
                operation: "configure backups".to_string(),
            });
        }
        if policy.enabled {
            validate_schedule("backup schedule", &policy.schedule)?;
        }

        self.scheduler.cancel_backup_schedule(resource_id).await?;
        let task = if policy.enabled {
            Some(
                self.scheduler
                    .schedule_backup(resource_id, &policy.schedule, Some(backup_config(Some(policy))))
                    .await?,
            )
        } else {
            None
        };

        let _guard = self.locks.lock(resource_id).await;
        let mut resource = self.registry.get_resource(resource_id).await?;
        resource.config.backup = Some(policy.clone());
        resource.metadata.next_backup_at = task.as_ref().and_then(|t| t.next_run_at);
        resource.updated_at = chrono::Utc::now();
        self.registry.update_resource(&resource).await?;

        info!(
            "Backup policy for resource {} is now {}",
            resource_id,
            if policy.enabled { policy.schedule.as_str() } else { "disabled" }
        );
        Ok(task)
    }

    /// Promote a replica when the resource fails its health check
    pub async fn auto_failover(&self, actor: &Actor, resource_id: &str) -> Result<FailoverOutcome> {
        match self.health_check(actor, resource_id).await {
            Ok(check) if check.healthy => return Ok(FailoverOutcome::NotNeeded),
            Ok(_) | Err(OrchestratorError::Provider { .. }) => {}
            Err(e) => return Err(e),
        }

        let mut op = self.begin(actor, resource_id, Operation::Failover).await?;
        if op.resource.config.replicas < 2 {
            return Err(OrchestratorError::Validation(format!(
                "resource {} has no replica to promote",
                resource_id
            )));
        }

        warn!("Resource {} is unhealthy, failing over", resource_id);
        self.enter(&mut op).await?;
        let instance = op.instance_id();
        let outcome = guarded(op.provider.failover(&instance)).await;
        let (resource, _) = self
            .complete(op, outcome, |r, connection| {
                r.connection = connection.clone();
            })
            .await?;

        Ok(FailoverOutcome::FailedOver {
            primary_url: resource.connection.primary_url,
        })
    }

    // ------------------------------------------------------------------
    // Housekeeping delegations
    // ------------------------------------------------------------------

    pub async fn maintain(
        &self,
        actor: &Actor,
        resource_id: &str,
        config: &MaintenanceTaskConfig,
    ) -> Result<String> {
        let mut op = self.begin(actor, resource_id, Operation::Maintenance).await?;
        self.enter(&mut op).await?;
        let instance = op.instance_id();
        let outcome = guarded(op.provider.run_maintenance(&instance, config)).await;
        let (_, output) = self.complete(op, outcome, |_, _| {}).await?;
        Ok(output)
    }

    pub async fn optimize(
        &self,
        actor: &Actor,
        resource_id: &str,
        config: &OptimizationTaskConfig,
    ) -> Result<String> {
        let mut op = self.begin(actor, resource_id, Operation::Optimization).await?;
        self.enter(&mut op).await?;
        let instance = op.instance_id();
        let outcome = guarded(op.provider.optimize(&instance, config)).await;
        let (_, output) = self.complete(op, outcome, |_, _| {}).await?;
        Ok(output)
    }

    pub async fn archive_to_cold_storage(
        &self,
        actor: &Actor,
        resource_id: &str,
        config: &ColdStorageTaskConfig,
    ) -> Result<String> {
        let mut op = self.begin(actor, resource_id, Operation::ColdStorage).await?;
        self.enter(&mut op).await?;
        let instance = op.instance_id();
        let outcome = guarded(op.provider.migrate_to_cold_storage(&instance, config)).await;
        let (_, output) = self.complete(op, outcome, |_, _| {}).await?;
        Ok(output)
    }
}
