// ABOUTME: Resource registry for Stratus: record models, the Registry trait and backends
// ABOUTME: Ships an in-memory registry and a SQLite registry with embedded migrations

pub mod error;
pub mod memory;
pub mod models;
pub mod registry;
pub mod sqlite;

pub use error::{Result, StorageError};
pub use memory::InMemoryRegistry;
pub use models::{
    BackupPolicy, BackupTaskConfig, BackupType, ColdStorageTaskConfig, ConnectionInfo,
    DeploymentRecord, DeploymentStatus, DestructionTaskConfig, LaunchSpec, MaintenanceOperation,
    MaintenanceTaskConfig, ManagedResource, MonitoringPolicy, OptimizationTaskConfig,
    QuotaUsage, ResourceConfig, ResourceMetadata, ResourceStatus, ResourceType, ScalingPolicy,
    ScalingTaskConfig, ScheduledTask, SizeClass, TaskConfig, TaskResult, TaskStatus, TaskType,
    TenantIsolation, TenantQuota, TenantRecord,
};
pub use registry::{DeploymentFilter, Registry, ResourceFilter, TaskFilter};
pub use sqlite::SqliteRegistry;
