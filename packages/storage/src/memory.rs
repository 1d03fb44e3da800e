// ABOUTME: In-process registry backed by hash maps behind async locks
// ABOUTME: Used by tests and single-process hosts that do not need durability

use crate::error::{Result, StorageError};
use crate::models::{DeploymentRecord, ManagedResource, ScheduledTask};
use crate::registry::{sort_tasks, DeploymentFilter, Registry, ResourceFilter, TaskFilter};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryRegistry {
    resources: RwLock<HashMap<String, ManagedResource>>,
    deployments: RwLock<HashMap<String, DeploymentRecord>>,
    tasks: RwLock<HashMap<String, ScheduledTask>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn insert_resource(&self, resource: &ManagedResource) -> Result<()> {
        let mut resources = self.resources.write().await;
        if resources.contains_key(&resource.id) {
            return Err(StorageError::Duplicate(resource.id.clone()));
        }
        resources.insert(resource.id.clone(), resource.clone());
        Ok(())
    }

    async fn get_resource(&self, id: &str) -> Result<ManagedResource> {
        self.resources
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn update_resource(&self, resource: &ManagedResource) -> Result<()> {
        match self.resources.write().await.get_mut(&resource.id) {
            Some(existing) => {
                *existing = resource.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(resource.id.clone())),
        }
    }

    async fn delete_resource(&self, id: &str) -> Result<()> {
        self.resources
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<ManagedResource>> {
        let mut items: Vec<_> = self
            .resources
            .read()
            .await
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn insert_deployment(&self, record: &DeploymentRecord) -> Result<()> {
        let mut deployments = self.deployments.write().await;
        if deployments.contains_key(&record.id) {
            return Err(StorageError::Duplicate(record.id.clone()));
        }
        deployments.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_deployment(&self, id: &str) -> Result<DeploymentRecord> {
        self.deployments
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn update_deployment(&self, record: &DeploymentRecord) -> Result<()> {
        match self.deployments.write().await.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(record.id.clone())),
        }
    }

    async fn list_deployments(&self, filter: &DeploymentFilter) -> Result<Vec<DeploymentRecord>> {
        let mut items: Vec<_> = self
            .deployments
            .read()
            .await
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn insert_task(&self, task: &ScheduledTask) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StorageError::Duplicate(task.id.clone()));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<ScheduledTask> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn update_task(&self, task: &ScheduledTask) -> Result<()> {
        match self.tasks.write().await.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(task.id.clone())),
        }
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        self.tasks
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<ScheduledTask>> {
        let mut items: Vec<_> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        sort_tasks(&mut items);
        Ok(items)
    }
}
