// ABOUTME: Sandbox lifecycle management for Stratus deployments
// ABOUTME: Provider trait, deploy pipeline, monitoring, reclamation and retry decisions

pub mod cleanup;
pub mod health;
pub mod manager;
pub mod providers;
pub mod recovery;

pub use cleanup::{CleanupItem, CleanupPolicy, CleanupReport};
pub use health::{HealthStatus, MonitorReport};
pub use manager::{
    DeployOptions, DeployOutcome, DeployStage, ManagerError, ReclaimReason, ResyncReport,
    SandboxHandle, SandboxManager, SourceFile,
};
pub use providers::{CommandOutput, SandboxInfo, SandboxProvider, SandboxSpec, SandboxState};
pub use recovery::{ErrorClass, ErrorContext, ErrorDecision};
