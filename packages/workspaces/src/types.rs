// ABOUTME: Shared data model for code execution workspaces
// ABOUTME: Requests, results, file records, package records and terminal events exchanged with callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default execution timeout when neither the request nor the workspace sets one
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 30;

/// Timeout applied to package installation commands
pub const PACKAGE_INSTALL_TIMEOUT_SECS: u64 = 120;

/// Timeout applied to package listing commands
pub const PACKAGE_LIST_TIMEOUT_SECS: u64 = 30;

/// Exit event payload for a process that did not exit normally
pub const ABNORMAL_EXIT_DATA: &str = "-1";

/// Exit event payload when the backend failed before producing a result
pub const FAILED_EXIT_DATA: &str = "1";

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unknown {kind}: '{value}'")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Execution backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceType {
    Local,
    Docker,
    Remote,
}

impl WorkspaceType {
    pub const ALL: [WorkspaceType; 3] = [
        WorkspaceType::Local,
        WorkspaceType::Docker,
        WorkspaceType::Remote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceType::Local => "local",
            WorkspaceType::Docker => "docker",
            WorkspaceType::Remote => "remote",
        }
    }
}

impl fmt::Display for WorkspaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(WorkspaceType::Local),
            "docker" | "container" => Ok(WorkspaceType::Docker),
            "remote" | "piston" => Ok(WorkspaceType::Remote),
            _ => Err(ParseError::new("workspace type", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Creating,
    Running,
    Stopped,
    Error,
    Destroyed,
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkspaceStatus::Creating => "creating",
            WorkspaceStatus::Running => "running",
            WorkspaceStatus::Stopped => "stopped",
            WorkspaceStatus::Error => "error",
            WorkspaceStatus::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Configuration a workspace is created from. Immutable once the workspace exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Requested backend; `None` lets the manager pick the best available one
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub workspace_type: Option<WorkspaceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<f32>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Packages installed when the workspace starts
    #[serde(default)]
    pub packages: Vec<PackageInstallRequest>,
    /// Container image override for the Docker backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Backend specific options
    #[serde(default)]
    pub options: serde_json::Value,
}

impl WorkspaceConfig {
    pub fn for_language(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, workspace_type: WorkspaceType) -> Self {
        self.workspace_type = Some(workspace_type);
        self
    }
}

/// Point-in-time snapshot of a workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub workspace_type: WorkspaceType,
    pub status: WorkspaceStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub config: WorkspaceConfig,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Overrides the workspace default timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,
    /// Files written into the workspace before the code runs
    #[serde(default)]
    pub files: Vec<FileWriteRequest>,
}

impl ExecuteRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Outcome of running code. Ordinary program failures are data, never errors.
///
/// `status` is `Success` exactly when `exit_code == Some(0)`; timeouts carry no exit code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub status: ExecutionStatus,
    pub execution_time_ms: u64,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

impl ExecuteResult {
    /// Result for a process that exited (or failed to report an exit code)
    pub fn from_exit(
        stdout: String,
        stderr: String,
        exit_code: Option<i64>,
        execution_time_ms: u64,
    ) -> Self {
        let status = if exit_code == Some(0) {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Error
        };
        let output = combine_output(&stdout, &stderr);
        Self {
            stdout,
            stderr,
            exit_code,
            status,
            execution_time_ms,
            output,
            signal: None,
        }
    }

    pub fn timeout(
        stdout: String,
        stderr: String,
        execution_time_ms: u64,
        signal: Option<String>,
    ) -> Self {
        let output = combine_output(&stdout, &stderr);
        Self {
            stdout,
            stderr,
            exit_code: None,
            status: ExecutionStatus::Timeout,
            execution_time_ms,
            output,
            signal,
        }
    }

    /// Uniform error result carrying only a message
    pub fn error(message: impl Into<String>, execution_time_ms: u64) -> Self {
        let stderr = message.into();
        Self {
            stdout: String::new(),
            output: stderr.clone(),
            stderr,
            exit_code: None,
            status: ExecutionStatus::Error,
            execution_time_ms,
            signal: None,
        }
    }

    pub fn with_signal(mut self, signal: Option<String>) -> Self {
        self.signal = signal;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// stdout, plus stderr on its own line when there is any
pub fn combine_output(stdout: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        stdout.to_string()
    } else {
        format!("{}\n{}", stdout, stderr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Stdout,
    Stderr,
    Exit,
}

/// One event of a streaming execution. A stream ends with exactly one `Exit` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalOutput {
    #[serde(rename = "type")]
    pub kind: OutputKind,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

impl TerminalOutput {
    pub fn stdout(data: impl Into<String>) -> Self {
        Self::new(OutputKind::Stdout, data.into())
    }

    pub fn stderr(data: impl Into<String>) -> Self {
        Self::new(OutputKind::Stderr, data.into())
    }

    /// Exit event; `None` means the process did not exit normally
    pub fn exit(exit_code: Option<i64>) -> Self {
        let data = match exit_code {
            Some(code) => code.to_string(),
            None => ABNORMAL_EXIT_DATA.to_string(),
        };
        Self::new(OutputKind::Exit, data)
    }

    /// Exit event for an execution that failed inside the backend
    pub fn failed_exit() -> Self {
        Self::new(OutputKind::Exit, FAILED_EXIT_DATA.to_string())
    }

    fn new(kind: OutputKind, data: String) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    /// Path relative to the workspace root, `/` separated
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileEncoding {
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "base64")]
    Base64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReadResult {
    pub content: String,
    pub encoding: FileEncoding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileWriteRequest {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub encoding: FileEncoding,
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,
}

fn default_create_dirs() -> bool {
    true
}

impl FileWriteRequest {
    pub fn text(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            encoding: FileEncoding::Utf8,
            create_dirs: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Pip,
    Npm,
    Yarn,
    Pnpm,
    Cargo,
    Go,
    Gem,
    Composer,
}

impl PackageManager {
    pub const ALL: [PackageManager; 8] = [
        PackageManager::Pip,
        PackageManager::Npm,
        PackageManager::Yarn,
        PackageManager::Pnpm,
        PackageManager::Cargo,
        PackageManager::Go,
        PackageManager::Gem,
        PackageManager::Composer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Pip => "pip",
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Cargo => "cargo",
            PackageManager::Go => "go",
            PackageManager::Gem => "gem",
            PackageManager::Composer => "composer",
        }
    }

    /// Shell command installing one package, pinned when a version is given
    pub fn install_command(&self, package: &str, version: Option<&str>) -> String {
        match (self, version) {
            (PackageManager::Pip, Some(v)) => format!("pip install {}=={}", package, v),
            (PackageManager::Pip, None) => format!("pip install {}", package),
            (PackageManager::Npm, Some(v)) => format!("npm install {}@{}", package, v),
            (PackageManager::Npm, None) => format!("npm install {}", package),
            (PackageManager::Yarn, Some(v)) => format!("yarn add {}@{}", package, v),
            (PackageManager::Yarn, None) => format!("yarn add {}", package),
            (PackageManager::Pnpm, Some(v)) => format!("pnpm add {}@{}", package, v),
            (PackageManager::Pnpm, None) => format!("pnpm add {}", package),
            (PackageManager::Cargo, Some(v)) => format!("cargo add {}@{}", package, v),
            (PackageManager::Cargo, None) => format!("cargo add {}", package),
            (PackageManager::Go, Some(v)) => format!("go get {}@{}", package, v),
            (PackageManager::Go, None) => format!("go get {}", package),
            (PackageManager::Gem, Some(v)) => format!("gem install {} -v {}", package, v),
            (PackageManager::Gem, None) => format!("gem install {}", package),
            (PackageManager::Composer, Some(v)) => format!("composer require {}:{}", package, v),
            (PackageManager::Composer, None) => format!("composer require {}", package),
        }
    }

    pub fn list_command(&self) -> &'static str {
        match self {
            PackageManager::Pip => "pip list --format=freeze",
            PackageManager::Npm => "npm list --depth=0",
            PackageManager::Yarn => "yarn list --depth=0",
            PackageManager::Pnpm => "pnpm list --depth=0",
            PackageManager::Cargo => "cargo tree --depth=1",
            PackageManager::Go => "go list -m all",
            PackageManager::Gem => "gem list",
            PackageManager::Composer => "composer show",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageManager {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        PackageManager::ALL
            .iter()
            .find(|m| m.as_str() == normalized)
            .copied()
            .ok_or_else(|| ParseError::new("package manager", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInstallRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub manager: PackageManager,
}

impl PackageInstallRequest {
    pub fn new(manager: PackageManager, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            manager,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInstallResult {
    pub success: bool,
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PackageInstallResult {
    pub fn failed(request: &PackageInstallRequest, error: impl Into<String>) -> Self {
        Self {
            success: false,
            package: request.name.clone(),
            version: request.version.clone(),
            output: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("local", WorkspaceType::Local)]
    #[case("Docker", WorkspaceType::Docker)]
    #[case("container", WorkspaceType::Docker)]
    #[case(" piston ", WorkspaceType::Remote)]
    #[case("remote", WorkspaceType::Remote)]
    fn test_workspace_type_parsing(#[case] input: &str, #[case] expected: WorkspaceType) {
        assert_eq!(input.parse::<WorkspaceType>().unwrap(), expected);
    }

    #[test]
    fn test_workspace_type_rejects_unknown() {
        let err = "e2b".parse::<WorkspaceType>().unwrap_err();
        assert!(err.to_string().contains("e2b"));
    }

    #[test]
    fn test_status_invariant_follows_exit_code() {
        let ok = ExecuteResult::from_exit("hi".into(), String::new(), Some(0), 5);
        assert_eq!(ok.status, ExecutionStatus::Success);
        assert_eq!(ok.output, "hi");

        let failed = ExecuteResult::from_exit(String::new(), "boom".into(), Some(2), 5);
        assert_eq!(failed.status, ExecutionStatus::Error);
        assert_eq!(failed.output, "\nboom");

        let killed = ExecuteResult::from_exit("x".into(), String::new(), None, 5);
        assert_eq!(killed.status, ExecutionStatus::Error);

        let timed_out = ExecuteResult::timeout(String::new(), String::new(), 30_000, None);
        assert_eq!(timed_out.status, ExecutionStatus::Timeout);
        assert_eq!(timed_out.exit_code, None);
    }

    #[test]
    fn test_exit_event_payloads() {
        assert_eq!(TerminalOutput::exit(Some(0)).data, "0");
        assert_eq!(TerminalOutput::exit(Some(3)).data, "3");
        assert_eq!(TerminalOutput::exit(None).data, "-1");
        assert_eq!(TerminalOutput::failed_exit().data, "1");
        assert_eq!(TerminalOutput::failed_exit().kind, OutputKind::Exit);
    }

    #[rstest]
    #[case(PackageManager::Pip, Some("2.31.0"), "pip install requests==2.31.0")]
    #[case(PackageManager::Pip, None, "pip install requests")]
    #[case(PackageManager::Npm, Some("1.6.0"), "npm install requests@1.6.0")]
    #[case(PackageManager::Yarn, None, "yarn add requests")]
    #[case(PackageManager::Pnpm, Some("2"), "pnpm add requests@2")]
    #[case(PackageManager::Cargo, Some("0.12"), "cargo add requests@0.12")]
    #[case(PackageManager::Go, None, "go get requests")]
    #[case(PackageManager::Gem, Some("1.0"), "gem install requests -v 1.0")]
    #[case(PackageManager::Composer, Some("^3"), "composer require requests:^3")]
    fn test_install_templates(
        #[case] manager: PackageManager,
        #[case] version: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(manager.install_command("requests", version), expected);
    }

    #[test]
    fn test_package_manager_is_closed_set() {
        assert_eq!("PIP".parse::<PackageManager>().unwrap(), PackageManager::Pip);
        assert!("apt".parse::<PackageManager>().is_err());
        assert!("".parse::<PackageManager>().is_err());
    }

    #[test]
    fn test_workspace_config_deserializes_with_defaults() {
        let config: WorkspaceConfig =
            serde_json::from_str(r#"{"type":"docker","language":"python"}"#).unwrap();
        assert_eq!(config.workspace_type, Some(WorkspaceType::Docker));
        assert_eq!(config.language.as_deref(), Some("python"));
        assert!(config.env.is_empty());
        assert!(config.packages.is_empty());
    }

    #[test]
    fn test_file_write_request_defaults() {
        let req: FileWriteRequest =
            serde_json::from_str(r#"{"path":"a.txt","content":"x"}"#).unwrap();
        assert_eq!(req.encoding, FileEncoding::Utf8);
        assert!(req.create_dirs);
    }
}
