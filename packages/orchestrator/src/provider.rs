// ABOUTME: Managed resource provider trait and the values providers exchange with the orchestrator
// ABOUTME: One provider per resource type; optional housekeeping calls default to unsupported

use crate::placement::PlacementTarget;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_core::ProviderError;
use stratus_storage::{
    BackupTaskConfig, ColdStorageTaskConfig, ConnectionInfo, MaintenanceTaskConfig,
    OptimizationTaskConfig, ResourceConfig, ResourceType, TenantRecord,
};

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Instance created by `deploy_template`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedInstance {
    pub instance_id: String,
    pub connection: ConnectionInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub backup_id: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub healthy: bool,
    pub message: Option<String>,
}

impl InstanceHealth {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: None,
        }
    }

    pub fn unhealthy(message: &str) -> Self {
        Self {
            healthy: false,
            message: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub storage_used_gb: f64,
    pub connections: u32,
    pub ops_per_second: f64,
}

/// Engine-specific operations for one resource type
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    fn resource_type(&self) -> ResourceType;

    async fn deploy_template(
        &self,
        config: &ResourceConfig,
        target: &PlacementTarget,
    ) -> Result<ProvisionedInstance>;

    async fn scale_instance(&self, instance_id: &str, replicas: u32) -> Result<()>;

    async fn destroy_instance(&self, instance_id: &str) -> Result<()>;

    async fn create_backup(&self, instance_id: &str, config: &BackupTaskConfig)
        -> Result<BackupInfo>;

    async fn restore_from_backup(&self, instance_id: &str, backup_id: &str) -> Result<()>;

    async fn check_health(&self, instance_id: &str) -> Result<InstanceHealth>;

    async fn get_metrics(&self, instance_id: &str) -> Result<ResourceMetrics>;

    async fn create_tenant(&self, instance_id: &str, tenant: &TenantRecord) -> Result<()>;

    async fn remove_tenant(&self, instance_id: &str, tenant: &TenantRecord) -> Result<()>;

    /// Move a tenant from its current isolation to `target`
    async fn migrate_tenant(
        &self,
        instance_id: &str,
        current: &TenantRecord,
        target: &TenantRecord,
    ) -> Result<()>;

    async fn instance_exists(&self, instance_id: &str) -> Result<bool>;

    /// Promote a replica and return the new connection details
    async fn failover(&self, instance_id: &str) -> Result<ConnectionInfo> {
        Err(ProviderError::Unsupported(format!(
            "failover for {}",
            instance_id
        )))
    }

    async fn run_maintenance(
        &self,
        instance_id: &str,
        _config: &MaintenanceTaskConfig,
    ) -> Result<String> {
        Err(ProviderError::Unsupported(format!(
            "maintenance for {}",
            instance_id
        )))
    }

    async fn optimize(&self, instance_id: &str, _config: &OptimizationTaskConfig) -> Result<String> {
        Err(ProviderError::Unsupported(format!(
            "optimization for {}",
            instance_id
        )))
    }

    async fn migrate_to_cold_storage(
        &self,
        instance_id: &str,
        _config: &ColdStorageTaskConfig,
    ) -> Result<String> {
        Err(ProviderError::Unsupported(format!(
            "cold storage for {}",
            instance_id
        )))
    }
}
