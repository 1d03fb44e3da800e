// ABOUTME: Narrow interface the scheduler uses to act on managed resources
// ABOUTME: Implemented by the engine so the scheduler never depends on the orchestrator type

use async_trait::async_trait;
use stratus_storage::{
    BackupTaskConfig, ColdStorageTaskConfig, DestructionTaskConfig, MaintenanceTaskConfig,
    OptimizationTaskConfig, ScalingTaskConfig,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),
}

pub type ActionResult = std::result::Result<String, ActionError>;

/// Work a scheduled task can trigger. Each call returns a short description of the outcome.
#[async_trait]
pub trait ResourceActions: Send + Sync {
    /// Whether the owning resource still exists
    async fn exists(&self, resource_id: &str) -> std::result::Result<bool, ActionError>;

    async fn backup(&self, resource_id: &str, config: &BackupTaskConfig) -> ActionResult;

    async fn maintain(&self, resource_id: &str, config: &MaintenanceTaskConfig) -> ActionResult;

    async fn scale(&self, resource_id: &str, config: &ScalingTaskConfig) -> ActionResult;

    async fn optimize(&self, resource_id: &str, config: &OptimizationTaskConfig)
        -> ActionResult;

    async fn migrate_to_cold_storage(
        &self,
        resource_id: &str,
        config: &ColdStorageTaskConfig,
    ) -> ActionResult;

    async fn destroy(&self, resource_id: &str, config: &DestructionTaskConfig) -> ActionResult;
}
