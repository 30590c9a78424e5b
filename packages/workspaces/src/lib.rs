// ABOUTME: Code execution workspaces over local processes, Docker containers and a remote service
// ABOUTME: The manager picks a backend per language and falls back when one is unavailable

pub mod languages;
pub mod manager;
pub mod providers;
pub mod select;
pub mod settings;
pub mod types;
pub mod workdir;
pub mod workspace;

pub use languages::LanguageInfo;
pub use manager::{ManagerError, WorkspaceManager};
pub use providers::{
    DockerProvider, LanguageSupport, LocalProvider, Provider, ProviderCapabilities,
    ProviderError, RemoteProvider,
};
pub use settings::{ExecutionDefaults, WorkspaceSettings};
pub use types::{
    ExecuteRequest, ExecuteResult, ExecutionStatus, FileEncoding, FileInfo, FileKind,
    FileReadResult, FileWriteRequest, OutputKind, PackageInstallRequest, PackageInstallResult,
    PackageManager, TerminalOutput, WorkspaceConfig, WorkspaceInfo, WorkspaceStatus,
    WorkspaceType,
};
pub use workspace::{OutputSink, Workspace, WorkspaceState};
