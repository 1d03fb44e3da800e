// ABOUTME: Registry trait and record filters shared by every persistence backend
// ABOUTME: The registry is the single source of truth for deployments, resources and tasks

use crate::error::Result;
use crate::models::{
    DeploymentRecord, DeploymentStatus, ManagedResource, ResourceStatus, ResourceType,
    ScheduledTask, TaskStatus, TaskType,
};
use async_trait::async_trait;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceFilter {
    pub owner_id: Option<String>,
    pub project_id: Option<String>,
    pub resource_type: Option<ResourceType>,
    pub status: Option<ResourceStatus>,
    pub environment: Option<String>,
}

impl ResourceFilter {
    pub fn owner(owner_id: &str) -> Self {
        Self {
            owner_id: Some(owner_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, resource: &ManagedResource) -> bool {
        self.owner_id.as_ref().map_or(true, |v| *v == resource.owner_id)
            && self
                .project_id
                .as_ref()
                .map_or(true, |v| Some(v) == resource.project_id.as_ref())
            && self.resource_type.map_or(true, |v| v == resource.resource_type)
            && self.status.map_or(true, |v| v == resource.status)
            && self
                .environment
                .as_ref()
                .map_or(true, |v| *v == resource.environment)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentFilter {
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub sandbox_id: Option<String>,
    pub status: Option<DeploymentStatus>,
}

impl DeploymentFilter {
    pub fn user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    pub fn sandbox(sandbox_id: &str) -> Self {
        Self {
            sandbox_id: Some(sandbox_id.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &DeploymentRecord) -> bool {
        self.user_id.as_ref().map_or(true, |v| *v == record.user_id)
            && self
                .project_id
                .as_ref()
                .map_or(true, |v| Some(v) == record.project_id.as_ref())
            && self
                .sandbox_id
                .as_ref()
                .map_or(true, |v| Some(v) == record.sandbox_id.as_ref())
            && self.status.map_or(true, |v| v == record.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub resource_id: Option<String>,
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn resource(resource_id: &str) -> Self {
        Self {
            resource_id: Some(resource_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, task: &ScheduledTask) -> bool {
        self.resource_id
            .as_ref()
            .map_or(true, |v| *v == task.resource_id)
            && self.task_type.map_or(true, |v| v == task.task_type)
            && self.status.map_or(true, |v| v == task.status)
    }
}

/// Directory from record id to current record.
///
/// `get_*` and `update_*` return `StorageError::NotFound` for unknown ids;
/// `insert_*` returns `StorageError::Duplicate` when the id already exists.
/// Resources and deployments list newest first, tasks by next run time with
/// unscheduled tasks last.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn insert_resource(&self, resource: &ManagedResource) -> Result<()>;
    async fn get_resource(&self, id: &str) -> Result<ManagedResource>;
    async fn update_resource(&self, resource: &ManagedResource) -> Result<()>;
    async fn delete_resource(&self, id: &str) -> Result<()>;
    async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<ManagedResource>>;

    async fn insert_deployment(&self, record: &DeploymentRecord) -> Result<()>;
    async fn get_deployment(&self, id: &str) -> Result<DeploymentRecord>;
    async fn update_deployment(&self, record: &DeploymentRecord) -> Result<()>;
    async fn list_deployments(&self, filter: &DeploymentFilter) -> Result<Vec<DeploymentRecord>>;

    async fn insert_task(&self, task: &ScheduledTask) -> Result<()>;
    async fn get_task(&self, id: &str) -> Result<ScheduledTask>;
    async fn update_task(&self, task: &ScheduledTask) -> Result<()>;
    async fn delete_task(&self, id: &str) -> Result<()>;
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<ScheduledTask>>;
}

/// Ordering shared by backends that sort in memory.
pub(crate) fn sort_tasks(tasks: &mut [ScheduledTask]) {
    tasks.sort_by(|a, b| match (a.next_run_at, b.next_run_at) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.created_at.cmp(&b.created_at)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.created_at.cmp(&b.created_at),
    });
}
