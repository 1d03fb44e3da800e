// ABOUTME: Typed platform events broadcast to logging and alerting consumers
// ABOUTME: Wraps a tokio broadcast channel; publishing never fails the caller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

/// Default capacity for the event broadcast channel
pub const DEFAULT_EVENT_CHANNEL_SIZE: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEvent {
    ResourceCreated {
        resource_id: String,
        resource_type: String,
        owner_id: String,
    },
    ResourceFailed {
        resource_id: String,
        operation: String,
        error: String,
    },
    ResourceScaled {
        resource_id: String,
        replicas: u32,
    },
    ResourceDestroyed {
        resource_id: String,
    },
    BackupCreated {
        resource_id: String,
        backup_id: String,
        size_bytes: u64,
    },
    HealthAlert {
        resource_id: String,
        message: String,
    },
    DeploymentCreated {
        deployment_id: String,
        sandbox_id: String,
        user_id: String,
        url: String,
    },
    DeploymentFailed {
        deployment_id: String,
        stage: String,
        error: String,
    },
    SandboxReclaimed {
        sandbox_id: String,
        reason: String,
    },
    TaskCompleted {
        task_id: String,
        resource_id: String,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: String,
        resource_id: String,
        error: String,
        retry_count: u32,
    },
    TaskCancelled {
        task_id: String,
        resource_id: String,
    },
}

impl PlatformEvent {
    /// Id of the entity the event is about; ordering is only guaranteed per key.
    pub fn subject_id(&self) -> &str {
        match self {
            Self::ResourceCreated { resource_id, .. }
            | Self::ResourceFailed { resource_id, .. }
            | Self::ResourceScaled { resource_id, .. }
            | Self::ResourceDestroyed { resource_id }
            | Self::BackupCreated { resource_id, .. }
            | Self::HealthAlert { resource_id, .. }
            | Self::TaskCompleted { resource_id, .. }
            | Self::TaskFailed { resource_id, .. }
            | Self::TaskCancelled { resource_id, .. } => resource_id,
            Self::DeploymentCreated { deployment_id, .. }
            | Self::DeploymentFailed { deployment_id, .. } => deployment_id,
            Self::SandboxReclaimed { sandbox_id, .. } => sandbox_id,
        }
    }
}

/// Timestamped event envelope as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub emitted_at: DateTime<Utc>,
    pub event: PlatformEvent,
}

/// Broadcast bus for platform events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Publish an event. Delivery is best-effort.
    pub fn publish(&self, event: PlatformEvent) {
        let envelope = EventEnvelope {
            emitted_at: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.send(envelope) {
            // No receivers is the normal case when nothing is listening
            if self.tx.receiver_count() > 0 {
                warn!("Failed to broadcast platform event: {}", e);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_SIZE)
    }
}
