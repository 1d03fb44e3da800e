// ABOUTME: Configuration and environment handling for Stratus
// ABOUTME: Env var names, typed settings with defaults, and tracing initialisation

pub mod constants;
pub mod logging;
pub mod settings;

pub use logging::{init_test_tracing, init_tracing};
pub use settings::{
    ConfigError, EngineConfig, OrchestratorSettings, SandboxSettings, SchedulerSettings,
};
