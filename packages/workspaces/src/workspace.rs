// ABOUTME: Workspace contract shared by every backend plus the state and behaviour they have in common
// ABOUTME: Default methods provide synthesized streaming and template-driven package management

use crate::providers::{ProviderError, Result};
use crate::types::{
    ExecuteRequest, ExecuteResult, FileInfo, FileReadResult, FileWriteRequest,
    PackageInstallRequest, PackageInstallResult, PackageManager, TerminalOutput, WorkspaceConfig,
    WorkspaceInfo, WorkspaceStatus, WorkspaceType, DEFAULT_EXECUTION_TIMEOUT_SECS,
    PACKAGE_INSTALL_TIMEOUT_SECS, PACKAGE_LIST_TIMEOUT_SECS,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Receiver side of a streaming execution
pub type OutputSink = mpsc::UnboundedSender<TerminalOutput>;

/// Identity and lifecycle bookkeeping common to every workspace
pub struct WorkspaceState {
    id: String,
    workspace_type: WorkspaceType,
    config: WorkspaceConfig,
    created_at: DateTime<Utc>,
    runtime: RwLock<RuntimeState>,
}

struct RuntimeState {
    status: WorkspaceStatus,
    last_activity_at: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

impl WorkspaceState {
    pub fn new(workspace_type: WorkspaceType, config: WorkspaceConfig) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_type,
            config,
            created_at: now,
            runtime: RwLock::new(RuntimeState {
                status: WorkspaceStatus::Creating,
                last_activity_at: now,
                metadata: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// First eight characters of the id, for names and log lines
    pub fn short_id(&self) -> &str {
        &self.id[..8]
    }

    pub fn workspace_type(&self) -> WorkspaceType {
        self.workspace_type
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub async fn status(&self) -> WorkspaceStatus {
        self.runtime.read().await.status
    }

    pub async fn set_status(&self, status: WorkspaceStatus) {
        let mut runtime = self.runtime.write().await;
        if runtime.status != status {
            debug!(
                "Workspace {} status {} -> {}",
                self.short_id(),
                runtime.status,
                status
            );
        }
        runtime.status = status;
        runtime.last_activity_at = Utc::now();
    }

    pub async fn touch(&self) {
        self.runtime.write().await.last_activity_at = Utc::now();
    }

    pub async fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.runtime
            .write()
            .await
            .metadata
            .insert(key.into(), value.into());
    }

    /// Fails with `NotRunning` unless the workspace has been started
    pub async fn ensure_running(&self) -> Result<()> {
        match self.status().await {
            WorkspaceStatus::Running => Ok(()),
            other => Err(ProviderError::NotRunning(format!(
                "workspace {} is {}",
                self.id, other
            ))),
        }
    }

    /// Request timeout, else the workspace default, else the global default
    pub fn timeout_for(&self, request: &ExecuteRequest) -> Duration {
        let secs = request
            .timeout_secs
            .or(self.config.timeout_secs)
            .unwrap_or(DEFAULT_EXECUTION_TIMEOUT_SECS);
        Duration::from_secs(secs.max(1))
    }

    pub async fn info(&self) -> WorkspaceInfo {
        let runtime = self.runtime.read().await;
        WorkspaceInfo {
            id: self.id.clone(),
            workspace_type: self.workspace_type,
            status: runtime.status,
            created_at: self.created_at,
            last_activity_at: runtime.last_activity_at,
            config: self.config.clone(),
            metadata: runtime.metadata.clone(),
        }
    }
}

/// A stateful execution environment bound to one backend
#[async_trait]
pub trait Workspace: Send + Sync {
    fn state(&self) -> &WorkspaceState;

    fn id(&self) -> &str {
        self.state().id()
    }

    fn workspace_type(&self) -> WorkspaceType {
        self.state().workspace_type()
    }

    fn config(&self) -> &WorkspaceConfig {
        self.state().config()
    }

    async fn status(&self) -> WorkspaceStatus {
        self.state().status().await
    }

    async fn info(&self) -> WorkspaceInfo {
        self.state().info().await
    }

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Release every backend resource. Idempotent and safe in any state.
    async fn destroy(&self);

    async fn read_file(&self, path: &str) -> Result<FileReadResult>;

    async fn write_file(&self, request: &FileWriteRequest) -> Result<()>;

    async fn list_files(&self, path: &str) -> Result<Vec<FileInfo>>;

    async fn delete_file(&self, path: &str) -> Result<()>;

    async fn file_exists(&self, path: &str) -> Result<bool>;

    /// Run code to completion. Program failures come back as `status=error`,
    /// only backend failures are `Err`.
    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResult>;

    /// Whether `execute_stream` emits output while the program runs
    fn supports_native_streaming(&self) -> bool {
        false
    }

    /// Run code, emitting stdout/stderr events and exactly one final exit event.
    /// The default replays the result of `execute` once it completes.
    async fn execute_stream(
        &self,
        request: &ExecuteRequest,
        sink: OutputSink,
    ) -> Result<ExecuteResult> {
        let outcome = self.execute(request).await;
        finish_stream(outcome, &sink, true)
    }

    fn supported_package_managers(&self) -> Vec<PackageManager> {
        PackageManager::ALL.to_vec()
    }

    async fn install_package(
        &self,
        request: &PackageInstallRequest,
    ) -> Result<PackageInstallResult> {
        if !self.supported_package_managers().contains(&request.manager) {
            return Ok(PackageInstallResult::failed(
                request,
                format!(
                    "package manager {} is not supported by this workspace",
                    request.manager
                ),
            ));
        }

        let command = request
            .manager
            .install_command(&request.name, request.version.as_deref());
        info!("Workspace {}: {}", self.state().short_id(), command);

        let exec = ExecuteRequest::new("bash", command).with_timeout_secs(PACKAGE_INSTALL_TIMEOUT_SECS);
        match self.execute(&exec).await {
            Ok(result) => {
                let success = result.is_success();
                let error = if success {
                    None
                } else if result.stderr.trim().is_empty() {
                    Some(format!("installation exited with status {}", result.status))
                } else {
                    Some(result.stderr.trim().to_string())
                };
                Ok(PackageInstallResult {
                    success,
                    package: request.name.clone(),
                    version: request.version.clone(),
                    output: Some(result.output),
                    error,
                })
            }
            Err(e) => Ok(PackageInstallResult::failed(request, e.to_string())),
        }
    }

    /// Installed packages, one per entry. Failures yield an empty list.
    async fn list_packages(&self, manager: PackageManager) -> Result<Vec<String>> {
        if !self.supported_package_managers().contains(&manager) {
            return Ok(Vec::new());
        }

        let exec = ExecuteRequest::new("bash", manager.list_command())
            .with_timeout_secs(PACKAGE_LIST_TIMEOUT_SECS);
        match self.execute(&exec).await {
            Ok(result) if result.is_success() => Ok(result
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect()),
            Ok(result) => {
                debug!("{} listing failed: {}", manager, result.stderr.trim());
                Ok(Vec::new())
            }
            Err(e) => {
                debug!("{} listing failed: {}", manager, e);
                Ok(Vec::new())
            }
        }
    }
}

/// Emit the tail of a streaming execution and pass the outcome through.
///
/// With `replay_output` the stdout/stderr of a successful result are sent first,
/// for backends that could not stream while running. A failed outcome becomes one
/// stderr event carrying the error message and a failed exit event.
pub fn finish_stream(
    outcome: Result<ExecuteResult>,
    sink: &OutputSink,
    replay_output: bool,
) -> Result<ExecuteResult> {
    match outcome {
        Ok(result) => {
            if replay_output {
                if !result.stdout.is_empty() {
                    let _ = sink.send(TerminalOutput::stdout(result.stdout.clone()));
                }
                if !result.stderr.is_empty() {
                    let _ = sink.send(TerminalOutput::stderr(result.stderr.clone()));
                }
            }
            let _ = sink.send(TerminalOutput::exit(result.exit_code));
            Ok(result)
        }
        Err(e) => {
            let _ = sink.send(TerminalOutput::stderr(e.to_string()));
            let _ = sink.send(TerminalOutput::failed_exit());
            Err(e)
        }
    }
}

/// Install the packages listed in the workspace config, logging failures
pub async fn install_configured_packages(workspace: &dyn Workspace) {
    for package in &workspace.config().packages {
        match workspace.install_package(package).await {
            Ok(result) if result.success => {
                info!(
                    "Workspace {}: installed {} package {}",
                    workspace.state().short_id(),
                    package.manager,
                    package.name
                );
            }
            Ok(result) => warn!(
                "Workspace {}: failed to install {}: {}",
                workspace.state().short_id(),
                package.name,
                result.error.unwrap_or_default()
            ),
            Err(e) => warn!(
                "Workspace {}: failed to install {}: {}",
                workspace.state().short_id(),
                package.name,
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionStatus, OutputKind};
    use std::sync::Mutex;

    /// Records executed commands and answers with a canned result
    struct RecordingWorkspace {
        state: WorkspaceState,
        commands: Mutex<Vec<(String, Option<u64>)>>,
        exit_code: Option<i64>,
        fail: bool,
    }

    impl RecordingWorkspace {
        fn new(exit_code: Option<i64>) -> Self {
            Self {
                state: WorkspaceState::new(WorkspaceType::Local, WorkspaceConfig::default()),
                commands: Mutex::new(Vec::new()),
                exit_code,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(None)
            }
        }
    }

    #[async_trait]
    impl Workspace for RecordingWorkspace {
        fn state(&self) -> &WorkspaceState {
            &self.state
        }

        async fn start(&self) -> Result<()> {
            self.state.set_status(WorkspaceStatus::Running).await;
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn destroy(&self) {}

        async fn read_file(&self, _path: &str) -> Result<FileReadResult> {
            Err(ProviderError::NotSupported("files".into()))
        }

        async fn write_file(&self, _request: &FileWriteRequest) -> Result<()> {
            Err(ProviderError::NotSupported("files".into()))
        }

        async fn list_files(&self, _path: &str) -> Result<Vec<FileInfo>> {
            Err(ProviderError::NotSupported("files".into()))
        }

        async fn delete_file(&self, _path: &str) -> Result<()> {
            Err(ProviderError::NotSupported("files".into()))
        }

        async fn file_exists(&self, _path: &str) -> Result<bool> {
            Err(ProviderError::NotSupported("files".into()))
        }

        async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResult> {
            self.commands
                .lock()
                .unwrap()
                .push((request.code.clone(), request.timeout_secs));
            if self.fail {
                return Err(ProviderError::ConnectionError("backend went away".into()));
            }
            Ok(ExecuteResult::from_exit(
                "requests==2.31.0\n\nurllib3==2.0.0\n".into(),
                String::new(),
                self.exit_code,
                3,
            ))
        }
    }

    #[tokio::test]
    async fn test_install_runs_template_with_install_timeout() {
        let ws = RecordingWorkspace::new(Some(0));
        let result = ws
            .install_package(&PackageInstallRequest::new(PackageManager::Pip, "requests"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.package, "requests");
        let commands = ws.commands.lock().unwrap();
        assert_eq!(
            commands.as_slice(),
            &[("pip install requests".to_string(), Some(120))]
        );
    }

    #[tokio::test]
    async fn test_install_failure_is_data() {
        let ws = RecordingWorkspace::new(Some(1));
        let result = ws
            .install_package(&PackageInstallRequest::new(PackageManager::Npm, "left-pad"))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());

        let ws = RecordingWorkspace::failing();
        let result = ws
            .install_package(&PackageInstallRequest::new(PackageManager::Npm, "left-pad"))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("backend went away"));
    }

    #[tokio::test]
    async fn test_list_packages_splits_lines_and_swallows_failures() {
        let ws = RecordingWorkspace::new(Some(0));
        let packages = ws.list_packages(PackageManager::Pip).await.unwrap();
        assert_eq!(packages, vec!["requests==2.31.0", "urllib3==2.0.0"]);
        assert_eq!(ws.commands.lock().unwrap()[0].1, Some(30));

        let ws = RecordingWorkspace::new(Some(127));
        assert!(ws.list_packages(PackageManager::Gem).await.unwrap().is_empty());

        let ws = RecordingWorkspace::failing();
        assert!(ws.list_packages(PackageManager::Pip).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_synthesized_stream_ends_with_single_exit() {
        let ws = RecordingWorkspace::new(Some(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = ws
            .execute_stream(&ExecuteRequest::new("python", "print(1)"), tx)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, OutputKind::Stdout);
        assert_eq!(events[1].kind, OutputKind::Exit);
        assert_eq!(events[1].data, "0");
    }

    #[tokio::test]
    async fn test_failed_stream_still_emits_exit() {
        let ws = RecordingWorkspace::failing();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = ws
            .execute_stream(&ExecuteRequest::new("python", "print(1)"), tx)
            .await;
        assert!(result.is_err());

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let exits: Vec<_> = events.iter().filter(|e| e.kind == OutputKind::Exit).collect();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].data, "1");
        assert_eq!(events[0].kind, OutputKind::Stderr);
        assert!(events[0].data.contains("backend went away"));
    }

    #[tokio::test]
    async fn test_state_transitions_and_timeouts() {
        let state = WorkspaceState::new(
            WorkspaceType::Docker,
            WorkspaceConfig {
                timeout_secs: Some(12),
                ..Default::default()
            },
        );
        assert_eq!(state.status().await, WorkspaceStatus::Creating);
        assert!(matches!(
            state.ensure_running().await,
            Err(ProviderError::NotRunning(_))
        ));

        state.set_status(WorkspaceStatus::Running).await;
        assert!(state.ensure_running().await.is_ok());

        let request = ExecuteRequest::new("python", "");
        assert_eq!(state.timeout_for(&request), Duration::from_secs(12));
        assert_eq!(
            state.timeout_for(&request.clone().with_timeout_secs(3)),
            Duration::from_secs(3)
        );
        assert_eq!(state.info().await.workspace_type, WorkspaceType::Docker);
    }
}
