// ABOUTME: Reclamation of idle, expired, failed and orphaned sandboxes
// ABOUTME: One-shot sweeps with per-item reasons plus a periodic background sweep

use crate::manager::{ReclaimReason, Result, SandboxHandle, SandboxManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use stratus_storage::{DeploymentStatus, StorageError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Criteria for reclaiming sandboxes. Every criterion is opt-in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupPolicy {
    pub max_idle: Option<Duration>,
    pub max_age: Option<Duration>,
    pub reclaim_failed: bool,
    pub reclaim_orphaned: bool,
}

impl CleanupPolicy {
    pub fn idle(max_idle: Duration) -> Self {
        Self {
            max_idle: Some(max_idle),
            ..Default::default()
        }
    }

    /// Every criterion enabled with the given limits
    pub fn full(max_idle: Duration, max_age: Duration) -> Self {
        Self {
            max_idle: Some(max_idle),
            max_age: Some(max_age),
            reclaim_failed: true,
            reclaim_orphaned: true,
        }
    }

    fn exceeds(limit: Option<Duration>, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match limit.and_then(|d| chrono::Duration::from_std(d).ok()) {
            Some(limit) => now - since > limit,
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupItem {
    pub sandbox_id: String,
    pub reason: ReclaimReason,
    pub terminated: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub scanned: usize,
    pub terminated: usize,
    pub failed: usize,
    pub items: Vec<CleanupItem>,
}

/// Backing deployment state as seen by the sweep
enum Backing {
    Live,
    Failed,
    Missing,
}

impl SandboxManager {
    async fn backing_of(&self, handle: &SandboxHandle) -> Backing {
        let Some(deployment_id) = &handle.deployment_id else {
            return Backing::Missing;
        };
        match self.registry.get_deployment(deployment_id).await {
            Ok(record) if record.status == DeploymentStatus::Failed => Backing::Failed,
            Ok(_) => Backing::Live,
            Err(StorageError::NotFound(_)) => Backing::Missing,
            Err(e) => {
                // Unknown backing state never counts as orphaned
                warn!("Failed to load deployment {}: {}", deployment_id, e);
                Backing::Live
            }
        }
    }

    async fn reclaim_reason(
        &self,
        handle: &SandboxHandle,
        policy: &CleanupPolicy,
        now: DateTime<Utc>,
    ) -> Option<ReclaimReason> {
        if CleanupPolicy::exceeds(policy.max_idle, handle.last_activity_at, now) {
            return Some(ReclaimReason::Idle);
        }
        if CleanupPolicy::exceeds(policy.max_age, handle.created_at, now) {
            return Some(ReclaimReason::Expired);
        }
        if !policy.reclaim_failed && !policy.reclaim_orphaned {
            return None;
        }
        match self.backing_of(handle).await {
            Backing::Failed if policy.reclaim_failed => Some(ReclaimReason::FailedDeployment),
            Backing::Missing if policy.reclaim_orphaned => Some(ReclaimReason::Orphaned),
            _ => None,
        }
    }

    /// Terminate every tracked sandbox matching the policy
    pub async fn cleanup(&self, policy: &CleanupPolicy) -> Result<CleanupReport> {
        let handles = self.handles().await;
        let now = Utc::now();
        let mut report = CleanupReport {
            scanned: handles.len(),
            ..Default::default()
        };

        for handle in handles {
            let Some(reason) = self.reclaim_reason(&handle, policy, now).await else {
                continue;
            };

            match self.terminate(&handle, reason).await {
                Ok(()) => {
                    report.terminated += 1;
                    report.items.push(CleanupItem {
                        sandbox_id: handle.id.clone(),
                        reason,
                        terminated: true,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("Failed to reclaim sandbox {}: {}", handle.id, e);
                    report.failed += 1;
                    report.items.push(CleanupItem {
                        sandbox_id: handle.id.clone(),
                        reason,
                        terminated: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if report.terminated > 0 || report.failed > 0 {
            info!(
                "Sandbox cleanup: scanned {}, terminated {}, failed {}",
                report.scanned, report.terminated, report.failed
            );
        }
        Ok(report)
    }

    /// Policy built from the configured idle and age limits
    pub fn default_cleanup_policy(&self) -> CleanupPolicy {
        CleanupPolicy::full(self.settings.max_idle, self.settings.max_age)
    }

    /// Run `cleanup` on a fixed interval until the returned task is aborted
    pub fn start_cleanup_task(
        self: Arc<Self>,
        interval: Duration,
        policy: CleanupPolicy,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!("Started sandbox cleanup task (interval: {:?})", interval);

            loop {
                ticker.tick().await;
                if let Err(e) = self.cleanup(&policy).await {
                    error!("Error during sandbox cleanup: {}", e);
                }
            }
        })
    }
}
