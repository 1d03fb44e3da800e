// ABOUTME: Deployment monitoring combining the registry record with live sandbox state
// ABOUTME: Reports health, uptime and the tail of the application log

use crate::manager::{shell_quote, ManagerError, Result, SandboxManager, APP_LOG_PATH};
use crate::providers::SandboxState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_storage::DeploymentStatus;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub deployment_id: String,
    pub status: DeploymentStatus,
    pub health: HealthStatus,
    pub sandbox_state: Option<SandboxState>,
    pub uptime_secs: u64,
    pub url: Option<String>,
    pub logs: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl SandboxManager {
    /// Current status, health, uptime and recent log lines of a deployment
    pub async fn monitor(&self, deployment_id: &str) -> Result<MonitorReport> {
        let record = self
            .registry
            .get_deployment(deployment_id)
            .await
            .map_err(ManagerError::from)?;

        let now = Utc::now();
        let uptime_secs = match (record.status.is_live(), record.started_at) {
            (true, Some(started)) => (now - started).num_seconds().max(0) as u64,
            _ => 0,
        };

        let mut report = MonitorReport {
            deployment_id: record.id.clone(),
            status: record.status,
            health: HealthStatus::Unhealthy,
            sandbox_state: None,
            uptime_secs,
            url: record.url.clone(),
            logs: Vec::new(),
            checked_at: now,
        };

        let Some(sandbox_id) = record.sandbox_id.as_deref() else {
            return Ok(report);
        };
        if !record.status.is_live() {
            return Ok(report);
        }

        match self.provider.get_info(sandbox_id).await {
            Ok(info) => {
                if info.state == SandboxState::Running {
                    report.health = HealthStatus::Healthy;
                }
                report.sandbox_state = Some(info.state);
            }
            Err(e) => debug!("Sandbox {} unreachable while monitoring: {}", sandbox_id, e),
        }

        let tail = format!(
            "tail -n {} {}",
            self.settings.log_tail_lines,
            shell_quote(APP_LOG_PATH)
        );
        match self.provider.run_command(sandbox_id, &tail).await {
            Ok(output) if output.success() => {
                report.logs = output.stdout.lines().map(str::to_string).collect();
            }
            Ok(output) => debug!(
                "Log tail for sandbox {} exited with {}",
                sandbox_id, output.exit_code
            ),
            Err(e) => debug!("Failed to read logs from sandbox {}: {}", sandbox_id, e),
        }

        Ok(report)
    }
}
