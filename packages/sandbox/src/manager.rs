// ABOUTME: Sandbox lifecycle manager orchestrating registry records and provider operations
// ABOUTME: Deploys user code with per-user quotas and owns every live sandbox handle

use crate::providers::{
    CommandOutput, SandboxInfo, SandboxProvider, SandboxSpec, LABEL_DEPLOYMENT_ID,
    LABEL_PROJECT_ID, LABEL_USER_ID,
};
use crate::recovery::{self, ErrorContext, ErrorDecision};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use stratus_config::SandboxSettings;
use stratus_core::{Coded, ErrorCode, EventBus, KeyedLock, PlatformEvent, ProviderError};
use stratus_storage::{DeploymentRecord, DeploymentStatus, LaunchSpec, Registry, StorageError};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// File the start step redirects application output into
pub const APP_LOG_PATH: &str = "/tmp/stratus-app.log";

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sandbox quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Deployment {deployment_id} failed during {stage}: {source}")]
    Deployment {
        deployment_id: String,
        stage: DeployStage,
        #[source]
        source: ProviderError,
    },

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

impl From<StorageError> for ManagerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => Self::NotFound(id),
            StorageError::InvalidTransition { from, to } => {
                Self::InvalidStateTransition(format!("{} -> {}", from, to))
            }
            other => Self::Storage(other),
        }
    }
}

impl ManagerError {
    /// The provider failure behind this error, if any
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(e) | Self::Deployment { source: e, .. } => Some(e),
            _ => None,
        }
    }

    /// Only failures that reached a provider may be retried.
    pub fn is_retryable(&self) -> bool {
        self.provider_error().is_some()
    }
}

impl Coded for ManagerError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Storage(e) => e.code(),
            Self::Provider(_) | Self::Deployment { .. } => ErrorCode::ProviderError,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::QuotaExceeded(_) => ErrorCode::QuotaExceeded,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::InvalidStateTransition(_) => ErrorCode::InvalidState,
        }
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;

/// Step of the deploy pipeline that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStage {
    Create,
    WriteFiles,
    Install,
    Start,
    ResolveHost,
    Restart,
}

impl DeployStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::WriteFiles => "write_files",
            Self::Install => "install",
            Self::Start => "start",
            Self::ResolveHost => "resolve_host",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for DeployStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a sandbox was terminated by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimReason {
    Idle,
    Expired,
    FailedDeployment,
    Orphaned,
    QuotaReclaim,
}

impl ReclaimReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Expired => "expired",
            Self::FailedDeployment => "failed_deployment",
            Self::Orphaned => "orphaned",
            Self::QuotaReclaim => "quota_reclaim",
        }
    }
}

/// Live sandbox tracked by the manager
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandboxHandle {
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub deployment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub host: Option<String>,
}

/// A file to place in the sandbox, relative to the working directory
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub path: String,
    pub content: Vec<u8>,
}

impl SourceFile {
    pub fn new(path: &str, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub project_id: Option<String>,
    pub runtime: String,
    pub template: Option<String>,
    /// Overrides the configured install command
    pub install_command: Option<String>,
    pub start_command: Option<String>,
    pub port: Option<u16>,
    pub env_vars: HashMap<String, String>,
    pub skip_install: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            project_id: None,
            runtime: "node".to_string(),
            template: None,
            install_command: None,
            start_command: None,
            port: None,
            env_vars: HashMap::new(),
            skip_install: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployOutcome {
    pub status: DeploymentStatus,
    pub url: String,
    pub sandbox_id: String,
    pub deployment_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResyncReport {
    pub adopted: usize,
    pub dropped: usize,
    pub tracked: usize,
}

/// Sandbox lifecycle manager
pub struct SandboxManager {
    pub(crate) provider: Arc<dyn SandboxProvider>,
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) events: EventBus,
    pub(crate) settings: SandboxSettings,
    pub(crate) handles: RwLock<HashMap<String, SandboxHandle>>,
    user_locks: KeyedLock,
}

impl SandboxManager {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        registry: Arc<dyn Registry>,
        events: EventBus,
        settings: SandboxSettings,
    ) -> Self {
        Self {
            provider,
            registry,
            events,
            settings,
            handles: RwLock::new(HashMap::new()),
            user_locks: KeyedLock::new(),
        }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Live sandboxes according to the provider. Provider failures yield an empty list.
    pub async fn list_active(&self) -> Vec<SandboxInfo> {
        match self.provider.list().await {
            Ok(sandboxes) => sandboxes,
            Err(e) => {
                warn!("Failed to list sandboxes from provider: {}", e);
                Vec::new()
            }
        }
    }

    /// Most recently active sandbox for a user, optionally scoped to a project
    pub async fn find_for_user(
        &self,
        user_id: &str,
        project_id: Option<&str>,
    ) -> Option<SandboxHandle> {
        self.handles
            .read()
            .await
            .values()
            .filter(|h| h.user_id == user_id)
            .filter(|h| project_id.is_none() || h.project_id.as_deref() == project_id)
            .max_by_key(|h| h.last_activity_at)
            .cloned()
    }

    pub async fn active_count(&self, user_id: Option<&str>) -> usize {
        self.handles
            .read()
            .await
            .values()
            .filter(|h| user_id.map_or(true, |u| h.user_id == u))
            .count()
    }

    /// Snapshot of every tracked handle
    pub async fn handles(&self) -> Vec<SandboxHandle> {
        self.handles.read().await.values().cloned().collect()
    }

    pub async fn get_handle(&self, sandbox_id: &str) -> Option<SandboxHandle> {
        self.handles.read().await.get(sandbox_id).cloned()
    }

    /// Mark a sandbox as used now
    pub async fn record_activity(&self, sandbox_id: &str) {
        if let Some(handle) = self.handles.write().await.get_mut(sandbox_id) {
            handle.last_activity_at = Utc::now();
        }
    }

    /// Deploy user files into a fresh sandbox and start the application
    pub async fn deploy(
        &self,
        user_id: &str,
        files: Vec<SourceFile>,
        options: DeployOptions,
    ) -> Result<DeployOutcome> {
        if user_id.trim().is_empty() {
            return Err(ManagerError::Validation(
                "user id must not be empty".to_string(),
            ));
        }
        validate_files(&files)?;

        // Quota check and creation are serialized per user
        let _guard = self.user_locks.lock(user_id).await;
        self.reclaim_for_quota(user_id).await?;

        let mut record =
            DeploymentRecord::new(user_id, options.project_id.as_deref(), &options.runtime);
        record.launch = Some(self.launch_spec(&options));
        self.registry.insert_deployment(&record).await?;
        record.transition(DeploymentStatus::Provisioning)?;
        self.registry.update_deployment(&record).await?;

        info!(
            "Provisioning deployment {} for user {} ({} files)",
            record.id,
            user_id,
            files.len()
        );

        let mut sandbox: Option<SandboxInfo> = None;
        let provisioned = self
            .provision(&record, &mut sandbox, &files, &options)
            .await;

        let (info, url) = match (provisioned, sandbox) {
            (Ok(url), Some(info)) => (info, url),
            (Err((stage, source)), sandbox) => {
                return Err(self
                    .fail_deployment(&mut record, sandbox.map(|s| s.id), stage, source)
                    .await);
            }
            (Ok(_), None) => {
                return Err(self
                    .fail_deployment(
                        &mut record,
                        None,
                        DeployStage::Create,
                        ProviderError::Internal("sandbox missing after create".to_string()),
                    )
                    .await);
            }
        };

        record.sandbox_id = Some(info.id.clone());
        record.url = Some(url.clone());
        let persisted = match record.transition(DeploymentStatus::Running) {
            Ok(()) => self
                .registry
                .update_deployment(&record)
                .await
                .map_err(ManagerError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = persisted {
            self.abandon_unrecorded(&mut record, &info.id, &e).await;
            return Err(e);
        }

        let now = Utc::now();
        self.handles.write().await.insert(
            info.id.clone(),
            SandboxHandle {
                id: info.id.clone(),
                user_id: user_id.to_string(),
                project_id: options.project_id.clone(),
                deployment_id: Some(record.id.clone()),
                created_at: now,
                last_activity_at: now,
                host: Some(url.clone()),
            },
        );

        info!(
            "Deployment {} running in sandbox {} at {}",
            record.id, info.id, url
        );
        self.events.publish(PlatformEvent::DeploymentCreated {
            deployment_id: record.id.clone(),
            sandbox_id: info.id.clone(),
            user_id: user_id.to_string(),
            url: url.clone(),
        });

        Ok(DeployOutcome {
            status: record.status,
            url,
            sandbox_id: info.id,
            deployment_id: record.id,
        })
    }

    /// Start command, working directory and port a deployment runs with
    fn launch_spec(&self, options: &DeployOptions) -> LaunchSpec {
        LaunchSpec {
            start_command: options
                .start_command
                .clone()
                .unwrap_or_else(|| self.settings.start_command.clone()),
            working_dir: self.settings.working_dir.trim_end_matches('/').to_string(),
            port: options.port.unwrap_or(self.settings.app_port),
        }
    }

    /// The sandbox came up but the record could not be marked running.
    /// Kill the sandbox and leave the record failed, best effort.
    async fn abandon_unrecorded(
        &self,
        record: &mut DeploymentRecord,
        sandbox_id: &str,
        cause: &ManagerError,
    ) {
        error!(
            "Failed to persist running deployment {}: {}",
            record.id, cause
        );
        self.kill_quietly(sandbox_id).await;

        record.error_message = Some(format!("deployment not recorded: {}", cause));
        match record.transition(DeploymentStatus::Failed) {
            Ok(()) => {
                if let Err(e) = self.registry.update_deployment(record).await {
                    error!("Failed to persist failed deployment {}: {}", record.id, e);
                }
            }
            Err(e) => error!("Cannot mark deployment {} failed: {}", record.id, e),
        }

        self.events.publish(PlatformEvent::DeploymentFailed {
            deployment_id: record.id.clone(),
            stage: "record".to_string(),
            error: cause.to_string(),
        });
    }

    async fn provision(
        &self,
        record: &DeploymentRecord,
        sandbox: &mut Option<SandboxInfo>,
        files: &[SourceFile],
        options: &DeployOptions,
    ) -> std::result::Result<String, (DeployStage, ProviderError)> {
        let mut labels = HashMap::new();
        labels.insert(LABEL_USER_ID.to_string(), record.user_id.clone());
        labels.insert(LABEL_DEPLOYMENT_ID.to_string(), record.id.clone());
        if let Some(project_id) = &record.project_id {
            labels.insert(LABEL_PROJECT_ID.to_string(), project_id.clone());
        }

        let spec = SandboxSpec {
            template: options.template.clone(),
            timeout: Some(self.settings.max_age),
            env_vars: options.env_vars.clone(),
            labels,
        };
        let info = self
            .provider
            .create(&spec)
            .await
            .map_err(|e| (DeployStage::Create, e))?;
        let sandbox_id = info.id.clone();
        *sandbox = Some(info);
        debug!("Created sandbox {} for deployment {}", sandbox_id, record.id);

        let launch = record
            .launch
            .clone()
            .unwrap_or_else(|| self.launch_spec(options));
        let workdir = launch.working_dir.as_str();
        for file in files {
            let path = format!("{}/{}", workdir, file.path.trim_start_matches("./"));
            self.provider
                .write_file(&sandbox_id, &path, &file.content)
                .await
                .map_err(|e| (DeployStage::WriteFiles, e))?;
        }

        if !options.skip_install {
            let install = options
                .install_command
                .as_deref()
                .unwrap_or(&self.settings.install_command);
            self.run_step(&sandbox_id, DeployStage::Install, &in_workdir(workdir, install))
                .await?;
        }

        self.run_step(
            &sandbox_id,
            DeployStage::Start,
            &background(workdir, &launch.start_command),
        )
        .await?;

        let host = self
            .provider
            .get_host(&sandbox_id, launch.port)
            .await
            .map_err(|e| (DeployStage::ResolveHost, e))?;
        if host.trim().is_empty() {
            return Err((
                DeployStage::ResolveHost,
                ProviderError::Internal("provider returned an empty host".to_string()),
            ));
        }

        Ok(public_url(&host))
    }

    async fn run_step(
        &self,
        sandbox_id: &str,
        stage: DeployStage,
        command: &str,
    ) -> std::result::Result<CommandOutput, (DeployStage, ProviderError)> {
        let output = self
            .provider
            .run_command(sandbox_id, command)
            .await
            .map_err(|e| (stage, e))?;

        if !output.success() {
            return Err((
                stage,
                ProviderError::Rejected(format!(
                    "{} exited with code {}: {}",
                    stage,
                    output.exit_code,
                    output.stderr.trim()
                )),
            ));
        }
        Ok(output)
    }

    async fn fail_deployment(
        &self,
        record: &mut DeploymentRecord,
        sandbox_id: Option<String>,
        stage: DeployStage,
        source: ProviderError,
    ) -> ManagerError {
        warn!(
            "Deployment {} failed during {}: {}",
            record.id, stage, source
        );

        if let Some(id) = &sandbox_id {
            self.kill_quietly(id).await;
            self.handles.write().await.remove(id);
        }

        record.sandbox_id = sandbox_id.or(record.sandbox_id.take());
        record.error_message = Some(format!("{}: {}", stage, source));
        match record.transition(DeploymentStatus::Failed) {
            Ok(()) => {
                if let Err(e) = self.registry.update_deployment(record).await {
                    error!("Failed to persist failed deployment {}: {}", record.id, e);
                }
            }
            Err(e) => error!("Cannot mark deployment {} failed: {}", record.id, e),
        }

        self.events.publish(PlatformEvent::DeploymentFailed {
            deployment_id: record.id.clone(),
            stage: stage.to_string(),
            error: source.to_string(),
        });

        ManagerError::Deployment {
            deployment_id: record.id.clone(),
            stage,
            source,
        }
    }

    /// Free a slot for `user_id` by reclaiming least-recently-active sandboxes.
    async fn reclaim_for_quota(&self, user_id: &str) -> Result<()> {
        let max = self.settings.max_sandboxes_per_user;
        loop {
            let owned: Vec<SandboxHandle> = self
                .handles
                .read()
                .await
                .values()
                .filter(|h| h.user_id == user_id)
                .cloned()
                .collect();

            if owned.len() < max {
                return Ok(());
            }

            let Some(lru) = owned.into_iter().min_by_key(|h| h.last_activity_at) else {
                return Err(ManagerError::QuotaExceeded(format!(
                    "user {} may not run any sandboxes",
                    user_id
                )));
            };

            info!(
                "User {} reached the sandbox quota ({}), reclaiming {}",
                user_id, max, lru.id
            );
            self.terminate(&lru, ReclaimReason::QuotaReclaim)
                .await
                .map_err(|e| {
                    ManagerError::QuotaExceeded(format!(
                        "could not reclaim sandbox {}: {}",
                        lru.id, e
                    ))
                })?;
        }
    }

    /// Kill a tracked sandbox, drop its handle and retire its deployment record.
    pub(crate) async fn terminate(
        &self,
        handle: &SandboxHandle,
        reason: ReclaimReason,
    ) -> Result<()> {
        match self.provider.kill(&handle.id).await {
            Ok(()) => {}
            Err(ProviderError::NotFound(_)) => {
                debug!("Sandbox {} already gone at provider", handle.id);
            }
            Err(e) => return Err(e.into()),
        }

        self.handles.write().await.remove(&handle.id);

        if let Some(deployment_id) = &handle.deployment_id {
            self.retire_record(deployment_id, reason.as_str()).await;
        }

        info!("Terminated sandbox {} ({})", handle.id, reason.as_str());
        self.events.publish(PlatformEvent::SandboxReclaimed {
            sandbox_id: handle.id.clone(),
            reason: reason.as_str().to_string(),
        });
        Ok(())
    }

    async fn retire_record(&self, deployment_id: &str, reason: &str) {
        let mut record = match self.registry.get_deployment(deployment_id).await {
            Ok(record) => record,
            Err(StorageError::NotFound(_)) => return,
            Err(e) => {
                warn!("Failed to load deployment {}: {}", deployment_id, e);
                return;
            }
        };

        if let Err(e) = record.retire(Some(reason)) {
            warn!("Cannot retire deployment {}: {}", deployment_id, e);
            return;
        }
        if let Err(e) = self.registry.update_deployment(&record).await {
            error!("Failed to persist retired deployment {}: {}", deployment_id, e);
        }
    }

    async fn kill_quietly(&self, sandbox_id: &str) {
        match self.provider.kill(sandbox_id).await {
            Ok(()) | Err(ProviderError::NotFound(_)) => {}
            Err(e) => error!("Failed to terminate sandbox {}: {}", sandbox_id, e),
        }
    }

    /// Terminate the deployment's sandbox and retire its record to `destroyed`
    pub async fn cancel(&self, deployment_id: &str) -> Result<DeploymentRecord> {
        let mut record = self.registry.get_deployment(deployment_id).await?;
        if record.status == DeploymentStatus::Destroyed {
            return Ok(record);
        }

        if let Some(sandbox_id) = record.sandbox_id.clone() {
            match self.provider.kill(&sandbox_id).await {
                Ok(()) | Err(ProviderError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            self.handles.write().await.remove(&sandbox_id);
        }

        record.retire(Some("cancelled"))?;
        self.registry.update_deployment(&record).await?;
        info!("Cancelled deployment {}", deployment_id);
        Ok(record)
    }

    /// Re-run the start step of a running deployment
    pub async fn restart(&self, deployment_id: &str) -> Result<DeploymentRecord> {
        let mut record = self.registry.get_deployment(deployment_id).await?;
        if record.status != DeploymentStatus::Running {
            return Err(ManagerError::InvalidStateTransition(format!(
                "cannot restart deployment {} in state {}",
                deployment_id,
                record.status.as_str()
            )));
        }
        let sandbox_id = self.live_sandbox_for(&record).await?;

        record.transition(DeploymentStatus::Restarting)?;
        self.registry.update_deployment(&record).await?;

        let launch = record
            .launch
            .clone()
            .unwrap_or_else(|| self.launch_spec(&DeployOptions::default()));
        let command = format!(
            "pkill -f {} ; {}",
            shell_quote(&launch.start_command),
            background(&launch.working_dir, &launch.start_command)
        );

        match self
            .run_step(&sandbox_id, DeployStage::Restart, &command)
            .await
        {
            Ok(_) => {
                record.transition(DeploymentStatus::Running)?;
                self.registry.update_deployment(&record).await?;
                self.record_activity(&sandbox_id).await;
                info!("Restarted deployment {}", deployment_id);
                Ok(record)
            }
            Err((stage, source)) => Err(self
                .fail_deployment(&mut record, Some(sandbox_id), stage, source)
                .await),
        }
    }

    /// Run a command in the deployment's sandbox and record activity
    pub async fn execute(&self, deployment_id: &str, command: &str) -> Result<CommandOutput> {
        if command.trim().is_empty() {
            return Err(ManagerError::Validation(
                "command must not be empty".to_string(),
            ));
        }
        let record = self.registry.get_deployment(deployment_id).await?;
        if !record.status.is_live() {
            return Err(ManagerError::InvalidStateTransition(format!(
                "deployment {} is {}",
                deployment_id,
                record.status.as_str()
            )));
        }
        let sandbox_id = self.live_sandbox_for(&record).await?;

        let output = self.provider.run_command(&sandbox_id, command).await?;
        self.record_activity(&sandbox_id).await;
        Ok(output)
    }

    async fn live_sandbox_for(&self, record: &DeploymentRecord) -> Result<String> {
        let handles = self.handles.read().await;
        record
            .sandbox_id
            .as_ref()
            .filter(|id| handles.contains_key(id.as_str()))
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(format!("sandbox for deployment {}", record.id)))
    }

    /// Rebuild the handle table from provider metadata after a restart
    pub async fn resync(&self) -> Result<ResyncReport> {
        let live = self.provider.list().await?;
        let now = Utc::now();
        let mut report = ResyncReport::default();

        let mut handles = self.handles.write().await;
        let live_ids: Vec<&str> = live.iter().map(|s| s.id.as_str()).collect();
        let before = handles.len();
        handles.retain(|id, _| live_ids.contains(&id.as_str()));
        report.dropped = before - handles.len();

        for info in &live {
            if handles.contains_key(&info.id) {
                continue;
            }
            let Some(user_id) = info.label(LABEL_USER_ID) else {
                debug!("Ignoring unlabeled sandbox {}", info.id);
                continue;
            };
            handles.insert(
                info.id.clone(),
                SandboxHandle {
                    id: info.id.clone(),
                    user_id: user_id.to_string(),
                    project_id: info.label(LABEL_PROJECT_ID).map(str::to_string),
                    deployment_id: info.label(LABEL_DEPLOYMENT_ID).map(str::to_string),
                    created_at: info.started_at,
                    last_activity_at: now,
                    host: None,
                },
            );
            report.adopted += 1;
        }
        report.tracked = handles.len();

        info!(
            "Resynced sandboxes: adopted {}, dropped {}, tracking {}",
            report.adopted, report.dropped, report.tracked
        );
        Ok(report)
    }

    /// Classify a deployment failure and decide whether to retry
    pub fn handle_error(
        &self,
        deployment_id: &str,
        error: &ManagerError,
        ctx: &ErrorContext,
    ) -> ErrorDecision {
        let decision = recovery::decide(error, ctx, self.settings.retry_base_delay);
        match &decision {
            ErrorDecision::Retry { delay, class } => warn!(
                "Deployment {} failed at {} ({:?}), retrying in {:?} (attempt {}/{})",
                deployment_id,
                ctx.stage,
                class,
                delay,
                ctx.retry_count + 1,
                ctx.max_retries
            ),
            ErrorDecision::Abort { reason, .. } => error!(
                "Deployment {} failed at {}, giving up: {}",
                deployment_id, ctx.stage, reason
            ),
        }
        decision
    }
}

fn validate_files(files: &[SourceFile]) -> Result<()> {
    if files.is_empty() {
        return Err(ManagerError::Validation(
            "at least one file is required".to_string(),
        ));
    }
    for file in files {
        let path = file.path.trim();
        if path.is_empty() || path.starts_with('/') || path.split('/').any(|part| part == "..") {
            return Err(ManagerError::Validation(format!(
                "invalid file path '{}'",
                file.path
            )));
        }
    }
    Ok(())
}

pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn in_workdir(workdir: &str, command: &str) -> String {
    format!("cd {} && {}", shell_quote(workdir), command)
}

fn background(workdir: &str, command: &str) -> String {
    format!(
        "cd {} && nohup sh -c {} > {} 2>&1 &",
        shell_quote(workdir),
        shell_quote(command),
        APP_LOG_PATH
    )
}

fn public_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}
