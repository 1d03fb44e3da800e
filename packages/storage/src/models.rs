// ABOUTME: Registry record types for deployments, managed resources and scheduled tasks
// ABOUTME: Status enums carry the lifecycle state machines and their string forms

use crate::error::{Result, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stratus_core::{generate_id, ID_PREFIX_DEPLOYMENT, ID_PREFIX_RESOURCE, ID_PREFIX_TASK};

// ============================================================================
// DEPLOYMENTS
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Provisioning,
    Running,
    Restarting,
    Stopping,
    Stopped,
    Failed,
    Destroyed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Destroyed => "destroyed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "provisioning" => Ok(Self::Provisioning),
            "running" => Ok(Self::Running),
            "restarting" => Ok(Self::Restarting),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            "destroyed" => Ok(Self::Destroyed),
            _ => Err(StorageError::InvalidStatus(s.to_string())),
        }
    }

    /// Allowed edges of the deployment state machine.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Pending, Provisioning)
                | (Pending, Failed)
                | (Provisioning, Running)
                | (Provisioning, Failed)
                | (Running, Stopping)
                | (Running, Restarting)
                | (Running, Failed)
                | (Restarting, Running)
                | (Restarting, Failed)
                | (Stopping, Stopped)
                | (Stopping, Failed)
                | (Stopped, Destroyed)
                | (Failed, Destroyed)
        )
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Restarting)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

/// How a deployment's application was launched, so it can be started again
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchSpec {
    pub start_command: String,
    pub working_dir: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub sandbox_id: Option<String>,
    pub status: DeploymentStatus,
    pub url: Option<String>,
    pub runtime: String,
    #[serde(default)]
    pub launch: Option<LaunchSpec>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    pub fn new(user_id: &str, project_id: Option<&str>, runtime: &str) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(ID_PREFIX_DEPLOYMENT),
            user_id: user_id.to_string(),
            project_id: project_id.map(str::to_string),
            sandbox_id: None,
            status: DeploymentStatus::Pending,
            url: None,
            runtime: runtime.to_string(),
            launch: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            stopped_at: None,
        }
    }

    /// Move to `next`, rejecting edges the state machine does not allow.
    pub fn transition(&mut self, next: DeploymentStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(StorageError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        let now = Utc::now();
        match next {
            DeploymentStatus::Running if self.started_at.is_none() => self.started_at = Some(now),
            DeploymentStatus::Stopped | DeploymentStatus::Failed => self.stopped_at = Some(now),
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Walk the legal path from the current status to `destroyed`.
    pub fn retire(&mut self, reason: Option<&str>) -> Result<()> {
        use DeploymentStatus::*;
        let path: &[DeploymentStatus] = match self.status {
            Pending | Provisioning => &[Failed, Destroyed],
            Running => &[Stopping, Stopped, Destroyed],
            Restarting => &[Failed, Destroyed],
            Stopping => &[Stopped, Destroyed],
            Stopped | Failed => &[Destroyed],
            Destroyed => &[],
        };
        if let (Some(reason), true) = (reason, self.error_message.is_none()) {
            if path.first() == Some(&Failed) {
                self.error_message = Some(reason.to_string());
            }
        }
        for step in path {
            self.transition(*step)?;
        }
        Ok(())
    }
}

// ============================================================================
// MANAGED RESOURCES
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Relational,
    KeyValue,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::KeyValue => "key_value",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "relational" => Ok(Self::Relational),
            "key_value" => Ok(Self::KeyValue),
            _ => Err(StorageError::InvalidStatus(format!("resource type {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Pending,
    Provisioning,
    Running,
    Scaling,
    BackingUp,
    Restoring,
    Migrating,
    Stopping,
    Stopped,
    Failed,
    Destroyed,
}

impl ResourceStatus {
    pub const ALL: [ResourceStatus; 11] = [
        Self::Pending,
        Self::Provisioning,
        Self::Running,
        Self::Scaling,
        Self::BackingUp,
        Self::Restoring,
        Self::Migrating,
        Self::Stopping,
        Self::Stopped,
        Self::Failed,
        Self::Destroyed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Scaling => "scaling",
            Self::BackingUp => "backing_up",
            Self::Restoring => "restoring",
            Self::Migrating => "migrating",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Destroyed => "destroyed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StorageError::InvalidStatus(s.to_string()))
    }

    /// In-progress states that must always resolve to `running` or `failed`.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Scaling | Self::BackingUp | Self::Restoring | Self::Migrating
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    #[default]
    Small,
    Medium,
    Large,
    XLarge,
}

impl SizeClass {
    /// Capacity units a placement target must have free for this size.
    pub fn capacity_units(&self) -> u32 {
        match self {
            Self::Small => 1,
            Self::Medium => 2,
            Self::Large => 4,
            Self::XLarge => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    #[default]
    Full,
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingPolicy {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_cpu_percent: f64,
    /// How often the policy is evaluated
    pub schedule: String,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 3,
            target_cpu_percent: 70.0,
            schedule: "*/5 * * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupPolicy {
    pub enabled: bool,
    pub schedule: String,
    pub backup_type: BackupType,
    pub compression: bool,
    pub retention_days: u32,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "0 2 * * *".to_string(),
            backup_type: BackupType::Full,
            compression: true,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MonitoringPolicy {
    pub enabled: bool,
    pub alert_on_unhealthy: bool,
    /// Optional cron expression for routine maintenance
    pub maintenance_schedule: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub size: SizeClass,
    pub storage_gb: u32,
    pub replicas: u32,
    pub scaling: Option<ScalingPolicy>,
    pub backup: Option<BackupPolicy>,
    pub monitoring: Option<MonitoringPolicy>,
}

impl ResourceConfig {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            size: SizeClass::Small,
            storage_gb: 10,
            replicas: 1,
            scaling: None,
            backup: None,
            monitoring: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConnectionInfo {
    pub primary_url: Option<String>,
    /// Role (primary, replica, admin, ...) to endpoint URL
    pub endpoints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QuotaUsage {
    pub storage_gb: u32,
    pub replicas: u32,
    pub tenants: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourceMetadata {
    pub placement_target: Option<String>,
    pub instance_id: Option<String>,
    pub quota_usage: QuotaUsage,
    pub last_backup_at: Option<DateTime<Utc>>,
    pub next_backup_at: Option<DateTime<Utc>>,
    pub last_backup_id: Option<String>,
    pub last_error: Option<String>,
    pub last_health_check_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TenantIsolation {
    /// Shared tables with a tenant column
    Shared,
    /// Dedicated schema (relational engines)
    Schema,
    /// Dedicated logical database
    Database,
    /// Key namespace prefix (key-value engines)
    KeyPrefix,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantQuota {
    pub max_connections: u32,
    pub storage_mb: u64,
    pub cpu_share: f64,
}

impl Default for TenantQuota {
    fn default() -> Self {
        Self {
            max_connections: 20,
            storage_mb: 1024,
            cpu_share: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantRecord {
    pub tenant_id: String,
    pub isolation: TenantIsolation,
    pub namespace: String,
    pub quota: TenantQuota,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagedResource {
    pub id: String,
    pub resource_type: ResourceType,
    pub owner_id: String,
    pub project_id: Option<String>,
    pub tenant_id: Option<String>,
    pub environment: String,
    pub status: ResourceStatus,
    pub connection: ConnectionInfo,
    pub config: ResourceConfig,
    pub metadata: ResourceMetadata,
    pub tenants: Vec<TenantRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedResource {
    pub fn new(
        resource_type: ResourceType,
        owner_id: &str,
        environment: &str,
        config: ResourceConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(ID_PREFIX_RESOURCE),
            resource_type,
            owner_id: owner_id.to_string(),
            project_id: None,
            tenant_id: None,
            environment: environment.to_string(),
            status: ResourceStatus::Pending,
            connection: ConnectionInfo::default(),
            config,
            metadata: ResourceMetadata::default(),
            tenants: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: ResourceStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn tenant(&self, tenant_id: &str) -> Option<&TenantRecord> {
        self.tenants.iter().find(|t| t.tenant_id == tenant_id)
    }
}

// ============================================================================
// SCHEDULED TASKS
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Backup,
    Maintenance,
    Scaling,
    Optimization,
    ColdStorage,
    Destruction,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Maintenance => "maintenance",
            Self::Scaling => "scaling",
            Self::Optimization => "optimization",
            Self::ColdStorage => "cold_storage",
            Self::Destruction => "destruction",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "backup" => Ok(Self::Backup),
            "maintenance" => Ok(Self::Maintenance),
            "scaling" => Ok(Self::Scaling),
            "optimization" => Ok(Self::Optimization),
            "cold_storage" => Ok(Self::ColdStorage),
            "destruction" => Ok(Self::Destruction),
            _ => Err(StorageError::InvalidStatus(format!("task type {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(StorageError::InvalidStatus(s.to_string())),
        }
    }

    /// The task will never fire again.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceOperation {
    Vacuum,
    Analyze,
    Reindex,
    ExpireKeys,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupTaskConfig {
    pub backup_type: BackupType,
    pub compression: bool,
    pub retention_days: u32,
}

impl Default for BackupTaskConfig {
    fn default() -> Self {
        Self {
            backup_type: BackupType::Full,
            compression: true,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaintenanceTaskConfig {
    pub operations: Vec<MaintenanceOperation>,
}

impl Default for MaintenanceTaskConfig {
    fn default() -> Self {
        Self {
            operations: vec![MaintenanceOperation::Vacuum, MaintenanceOperation::Analyze],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingTaskConfig {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_cpu_percent: f64,
}

impl Default for ScalingTaskConfig {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 3,
            target_cpu_percent: 70.0,
        }
    }
}

impl From<&ScalingPolicy> for ScalingTaskConfig {
    fn from(policy: &ScalingPolicy) -> Self {
        Self {
            min_replicas: policy.min_replicas,
            max_replicas: policy.max_replicas,
            target_cpu_percent: policy.target_cpu_percent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationTaskConfig {
    pub analyze_queries: bool,
    pub rebuild_indexes: bool,
}

impl Default for OptimizationTaskConfig {
    fn default() -> Self {
        Self {
            analyze_queries: true,
            rebuild_indexes: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColdStorageTaskConfig {
    pub older_than_days: u32,
    pub storage_tier: String,
}

impl Default for ColdStorageTaskConfig {
    fn default() -> Self {
        Self {
            older_than_days: 90,
            storage_tier: "archive".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DestructionTaskConfig {
    pub reason: String,
}

impl Default for DestructionTaskConfig {
    fn default() -> Self {
        Self {
            reason: "ttl_expired".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskConfig {
    Backup(BackupTaskConfig),
    Maintenance(MaintenanceTaskConfig),
    Scaling(ScalingTaskConfig),
    Optimization(OptimizationTaskConfig),
    ColdStorage(ColdStorageTaskConfig),
    Destruction(DestructionTaskConfig),
}

impl TaskConfig {
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Backup(_) => TaskType::Backup,
            Self::Maintenance(_) => TaskType::Maintenance,
            Self::Scaling(_) => TaskType::Scaling,
            Self::Optimization(_) => TaskType::Optimization,
            Self::ColdStorage(_) => TaskType::ColdStorage,
            Self::Destruction(_) => TaskType::Destruction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub success: bool,
    pub duration_ms: u64,
    pub output: Option<String>,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledTask {
    pub id: String,
    pub resource_id: String,
    pub task_type: TaskType,
    pub schedule: String,
    pub one_shot: bool,
    pub status: TaskStatus,
    pub config: TaskConfig,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_result: Option<TaskResult>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn new(resource_id: &str, schedule: &str, config: TaskConfig) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(ID_PREFIX_TASK),
            resource_id: resource_id.to_string(),
            task_type: config.task_type(),
            schedule: schedule.to_string(),
            one_shot: false,
            status: TaskStatus::Pending,
            config,
            next_run_at: None,
            last_run_at: None,
            started_at: None,
            last_result: None,
            retry_count: 0,
            max_retries: 3,
            timeout_secs: 3600,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
