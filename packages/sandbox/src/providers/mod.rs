// ABOUTME: Provider trait for ephemeral sandbox execution backends
// ABOUTME: Defines sandbox creation, file writes, command execution, inspection and termination

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use stratus_core::ProviderError;

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Metadata label carrying the owning user id
pub const LABEL_USER_ID: &str = "stratus.user_id";
/// Metadata label carrying the project id
pub const LABEL_PROJECT_ID: &str = "stratus.project_id";
/// Metadata label carrying the deployment record id
pub const LABEL_DEPLOYMENT_ID: &str = "stratus.deployment_id";

/// Parameters for creating and initialising a sandbox
#[derive(Debug, Clone, Default)]
pub struct SandboxSpec {
    pub template: Option<String>,
    pub timeout: Option<Duration>,
    pub env_vars: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Running,
    Paused,
    Stopped,
    Error(String),
}

/// Sandbox runtime information as reported by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxInfo {
    pub id: String,
    pub state: SandboxState,
    pub started_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl SandboxInfo {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Result of running a command in a sandbox
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Provider trait for sandbox backends
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create and initialise a new sandbox
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxInfo>;

    /// Write a file inside a sandbox, creating parent directories
    async fn write_file(&self, sandbox_id: &str, path: &str, content: &[u8]) -> Result<()>;

    /// Run a shell command and wait for it to exit
    async fn run_command(&self, sandbox_id: &str, command: &str) -> Result<CommandOutput>;

    /// Public host name routing to `port` inside the sandbox
    async fn get_host(&self, sandbox_id: &str, port: u16) -> Result<String>;

    async fn get_info(&self, sandbox_id: &str) -> Result<SandboxInfo>;

    /// Terminate a sandbox. Unknown ids yield `ProviderError::NotFound`.
    async fn kill(&self, sandbox_id: &str) -> Result<()>;

    /// Every live sandbox visible to this provider
    async fn list(&self) -> Result<Vec<SandboxInfo>>;

    /// Reattach to an existing sandbox
    async fn connect(&self, sandbox_id: &str) -> Result<SandboxInfo>;
}
