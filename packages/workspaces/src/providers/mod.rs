// ABOUTME: Provider trait and implementations for code execution backends
// ABOUTME: Defines the backend error type, capability flags and the per-provider workspace table

use crate::types::{WorkspaceConfig, WorkspaceInfo, WorkspaceType};
use crate::workspace::Workspace;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

pub mod docker;
pub mod local;
pub mod remote;

pub use docker::DockerProvider;
pub use local::LocalProvider;
pub use remote::RemoteProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Provider not available: {0}")]
    NotAvailable(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Workspace not running: {0}")]
    NotRunning(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Rate limited by remote service (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ProviderError {
    /// The backend cannot perform this kind of operation at all
    pub fn is_capability_error(&self) -> bool {
        matches!(self, ProviderError::NotSupported(_))
    }

    /// A failure of the backend rather than of the caller's input.
    /// Another backend may well succeed where this one failed.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(
            self,
            ProviderError::UnsupportedLanguage(_) | ProviderError::InvalidPath(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Languages a provider accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanguageSupport {
    All,
    Only(Vec<String>),
}

impl LanguageSupport {
    /// `language` must already be a canonical id
    pub fn supports(&self, language: &str) -> bool {
        match self {
            LanguageSupport::All => true,
            LanguageSupport::Only(ids) => ids.iter().any(|id| id == language),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ProviderCapabilities {
    pub package_management: bool,
    pub file_system: bool,
    pub native_streaming: bool,
    pub network_isolation: bool,
}

/// Provider trait for code execution backends
#[async_trait]
pub trait Provider: Send + Sync {
    fn workspace_type(&self) -> WorkspaceType;

    /// Human readable name
    fn name(&self) -> &str;

    fn supported_languages(&self) -> LanguageSupport;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Cheap reachability probe; never slow enough to stall selection
    async fn is_available(&self) -> Result<bool>;

    /// Create a workspace. It is tracked by the provider but not started.
    async fn create(&self, config: WorkspaceConfig) -> Result<Arc<dyn Workspace>>;

    async fn get(&self, id: &str) -> Option<Arc<dyn Workspace>>;

    async fn list(&self) -> Result<Vec<WorkspaceInfo>>;

    /// Forget a workspace that has already been destroyed
    async fn release(&self, id: &str);

    /// Destroy every workspace this provider knows about
    async fn cleanup(&self) -> Result<()>;
}

/// Workspaces owned by one provider, keyed by id
pub struct WorkspaceTable<W> {
    entries: RwLock<HashMap<String, Arc<W>>>,
}

impl<W: Workspace + 'static> WorkspaceTable<W> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, workspace: Arc<W>) {
        let mut entries = self.entries.write().await;
        entries.insert(workspace.id().to_string(), workspace);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn Workspace>> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .map(|w| Arc::clone(w) as Arc<dyn Workspace>)
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<W>> {
        let mut entries = self.entries.write().await;
        entries.remove(id)
    }

    pub async fn infos(&self) -> Vec<WorkspaceInfo> {
        let workspaces: Vec<Arc<W>> = {
            let entries = self.entries.read().await;
            entries.values().cloned().collect()
        };

        let mut infos = Vec::with_capacity(workspaces.len());
        for workspace in workspaces {
            infos.push(workspace.info().await);
        }
        infos
    }

    /// Remove and return every entry
    pub async fn drain(&self) -> Vec<Arc<W>> {
        let mut entries = self.entries.write().await;
        entries.drain().map(|(_, w)| w).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<W: Workspace + 'static> Default for WorkspaceTable<W> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-stream capture limit for backends that collect process output
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

const TRUNCATION_NOTICE: &str = "\n[output truncated]";

/// Output of one stream, capped at a byte limit
pub(crate) struct OutputBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append what fits and return the part that was kept
    pub(crate) fn push<'a>(&mut self, chunk: &'a [u8]) -> &'a [u8] {
        let room = self.limit.saturating_sub(self.bytes.len());
        let kept = chunk.len().min(room);
        if kept < chunk.len() {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..kept]);
        &chunk[..kept]
    }

    pub(crate) fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_NOTICE);
        }
        text
    }
}

/// Convert a caller-supplied megabyte limit to the signed byte count backends expect, saturating
pub(crate) fn megabytes_to_bytes(mb: u64) -> i64 {
    i64::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX)
}

/// Destroy every workspace in the table. `destroy` never fails, so this cannot either.
pub(crate) async fn destroy_all<W: Workspace + 'static>(table: &WorkspaceTable<W>) -> usize {
    let workspaces = table.drain().await;
    let count = workspaces.len();
    for workspace in workspaces {
        workspace.destroy().await;
    }
    count
}
