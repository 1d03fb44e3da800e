// ABOUTME: Managed resource orchestration for Stratus and the engine that wires the control plane
// ABOUTME: Provider and placement seams, lifecycle operations, monitoring and scheduled actions

pub mod engine;
pub mod error;
pub mod monitoring;
pub mod orchestrator;
pub mod placement;
pub mod provider;

pub use engine::{Engine, EngineBuilder, StartReport};
pub use error::{OrchestratorError, Result};
pub use monitoring::{
    CleanupSummary, HealthCheckResult, HealthSweepReport, MetricsSnapshot, SystemHealth,
    SystemStatus,
};
pub use orchestrator::{
    decide_replicas, Actor, AutoScaleOutcome, DeployRequest, FailoverOutcome,
    ResourceOrchestrator, TenantRequest,
};
pub use placement::{
    required_units, units_for, CapacityAwarePlacement, PlacementStrategy, PlacementTarget,
};
pub use provider::{
    BackupInfo, InstanceHealth, ProvisionedInstance, ResourceMetrics, ResourceProvider,
};
