// ABOUTME: SQLite-backed registry for durable deployments, resources and tasks
// ABOUTME: Filter fields are indexed columns and the full record is stored as JSON

use crate::error::{Result, StorageError};
use crate::models::{DeploymentRecord, ManagedResource, ScheduledTask};
use crate::registry::{DeploymentFilter, Registry, ResourceFilter, TaskFilter};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteRegistry {
    pool: SqlitePool,
}

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode<T: DeserializeOwned>(row: &SqliteRow) -> Result<T> {
    let document: String = row.try_get("document")?;
    Ok(serde_json::from_str(&document)?)
}

/// Map a unique-constraint failure to `Duplicate`, leaving other errors intact.
fn map_insert_error(err: sqlx::Error, id: &str) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::Duplicate(id.to_string())
        }
        _ => StorageError::Database(err),
    }
}

/// Append `column = ?N` clauses for every set filter value.
fn where_clause(conditions: &[(&str, Option<String>)]) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    for (column, value) in conditions {
        if let Some(value) = value {
            binds.push(value.clone());
            clauses.push(format!("{} = ?{}", column, binds.len()));
        }
    }
    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), binds)
    }
}

impl SqliteRegistry {
    /// Wrap an existing pool. Call [`SqliteRegistry::migrate`] before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let registry = Self::new(pool);
        registry.migrate().await?;
        info!("Registry database ready at {}", url);
        Ok(registry)
    }

    /// Private in-memory database; a single connection keeps every query on it.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let registry = Self::new(pool);
        registry.migrate().await?;
        Ok(registry)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("Registry migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn delete_from(&self, table: &str, id: &str) -> Result<()> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?1", table))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn fetch_document<T: DeserializeOwned>(&self, table: &str, id: &str) -> Result<T> {
        let row = sqlx::query(&format!("SELECT document FROM {} WHERE id = ?1", table))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        decode(&row)
    }

    async fn fetch_documents<T: DeserializeOwned>(
        &self,
        sql: &str,
        binds: Vec<String>,
    ) -> Result<Vec<T>> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(decode).collect()
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn insert_resource(&self, resource: &ManagedResource) -> Result<()> {
        let document = serde_json::to_string(resource)?;
        sqlx::query(
            r#"
            INSERT INTO managed_resources (
                id, resource_type, owner_id, project_id, environment, status,
                document, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&resource.id)
        .bind(resource.resource_type.as_str())
        .bind(&resource.owner_id)
        .bind(&resource.project_id)
        .bind(&resource.environment)
        .bind(resource.status.as_str())
        .bind(&document)
        .bind(ts(&resource.created_at))
        .bind(ts(&resource.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &resource.id))?;

        Ok(())
    }

    async fn get_resource(&self, id: &str) -> Result<ManagedResource> {
        self.fetch_document("managed_resources", id).await
    }

    async fn update_resource(&self, resource: &ManagedResource) -> Result<()> {
        let document = serde_json::to_string(resource)?;
        let result = sqlx::query(
            r#"
            UPDATE managed_resources
            SET owner_id = ?1, project_id = ?2, environment = ?3, status = ?4,
                document = ?5, updated_at = ?6
            WHERE id = ?7
            "#,
        )
        .bind(&resource.owner_id)
        .bind(&resource.project_id)
        .bind(&resource.environment)
        .bind(resource.status.as_str())
        .bind(&document)
        .bind(ts(&resource.updated_at))
        .bind(&resource.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(resource.id.clone()));
        }
        Ok(())
    }

    async fn delete_resource(&self, id: &str) -> Result<()> {
        self.delete_from("managed_resources", id).await
    }

    async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<ManagedResource>> {
        let (clause, binds) = where_clause(&[
            ("owner_id", filter.owner_id.clone()),
            ("project_id", filter.project_id.clone()),
            (
                "resource_type",
                filter.resource_type.map(|t| t.as_str().to_string()),
            ),
            ("status", filter.status.map(|s| s.as_str().to_string())),
            ("environment", filter.environment.clone()),
        ]);
        let sql = format!(
            "SELECT document FROM managed_resources{} ORDER BY created_at DESC",
            clause
        );
        self.fetch_documents(&sql, binds).await
    }

    async fn insert_deployment(&self, record: &DeploymentRecord) -> Result<()> {
        let document = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO deployments (
                id, user_id, project_id, sandbox_id, status, document, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.project_id)
        .bind(&record.sandbox_id)
        .bind(record.status.as_str())
        .bind(&document)
        .bind(ts(&record.created_at))
        .bind(ts(&record.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &record.id))?;

        Ok(())
    }

    async fn get_deployment(&self, id: &str) -> Result<DeploymentRecord> {
        self.fetch_document("deployments", id).await
    }

    async fn update_deployment(&self, record: &DeploymentRecord) -> Result<()> {
        let document = serde_json::to_string(record)?;
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET project_id = ?1, sandbox_id = ?2, status = ?3, document = ?4, updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(&record.project_id)
        .bind(&record.sandbox_id)
        .bind(record.status.as_str())
        .bind(&document)
        .bind(ts(&record.updated_at))
        .bind(&record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(record.id.clone()));
        }
        Ok(())
    }

    async fn list_deployments(&self, filter: &DeploymentFilter) -> Result<Vec<DeploymentRecord>> {
        let (clause, binds) = where_clause(&[
            ("user_id", filter.user_id.clone()),
            ("project_id", filter.project_id.clone()),
            ("sandbox_id", filter.sandbox_id.clone()),
            ("status", filter.status.map(|s| s.as_str().to_string())),
        ]);
        let sql = format!(
            "SELECT document FROM deployments{} ORDER BY created_at DESC",
            clause
        );
        self.fetch_documents(&sql, binds).await
    }

    async fn insert_task(&self, task: &ScheduledTask) -> Result<()> {
        let document = serde_json::to_string(task)?;
        sqlx::query(
            r#"
            INSERT INTO scheduled_tasks (
                id, resource_id, task_type, status, next_run_at, document, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&task.id)
        .bind(&task.resource_id)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(task.next_run_at.as_ref().map(ts))
        .bind(&document)
        .bind(ts(&task.created_at))
        .bind(ts(&task.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &task.id))?;

        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<ScheduledTask> {
        self.fetch_document("scheduled_tasks", id).await
    }

    async fn update_task(&self, task: &ScheduledTask) -> Result<()> {
        let document = serde_json::to_string(task)?;
        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET status = ?1, next_run_at = ?2, document = ?3, updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(task.status.as_str())
        .bind(task.next_run_at.as_ref().map(ts))
        .bind(&document)
        .bind(ts(&task.updated_at))
        .bind(&task.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(task.id.clone()));
        }
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        self.delete_from("scheduled_tasks", id).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<ScheduledTask>> {
        let (clause, binds) = where_clause(&[
            ("resource_id", filter.resource_id.clone()),
            ("task_type", filter.task_type.map(|t| t.as_str().to_string())),
            ("status", filter.status.map(|s| s.as_str().to_string())),
        ]);
        let sql = format!(
            "SELECT document FROM scheduled_tasks{} ORDER BY next_run_at IS NULL, next_run_at ASC, created_at ASC",
            clause
        );
        self.fetch_documents(&sql, binds).await
    }
}
