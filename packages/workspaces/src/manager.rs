// ABOUTME: Workspace manager choosing execution backends with availability-aware fallback
// ABOUTME: Tracks long-lived workspaces and owns the transient one-shot execution path

use crate::languages;
use crate::providers::{
    DockerProvider, LocalProvider, Provider, ProviderError, RemoteProvider,
    Result as ProviderResult,
};
use crate::select::candidate_order;
use crate::settings::{ExecutionDefaults, WorkspaceSettings, DEFAULT_PRIORITY};
use crate::types::{
    ExecuteRequest, ExecuteResult, TerminalOutput, WorkspaceConfig, WorkspaceInfo, WorkspaceType,
};
use crate::workspace::{OutputSink, Workspace};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Provider not registered: {0}")]
    ProviderNotRegistered(WorkspaceType),

    #[error("No provider available for {language}: {reason}")]
    NoProviderAvailable { language: String, reason: String },

    #[error("Workspace not found: {0}")]
    NotFound(String),
}

impl ManagerError {
    /// Uniform error result for callers that only deal in results
    pub fn to_execute_result(&self) -> ExecuteResult {
        ExecuteResult::error(self.to_string(), 0)
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;

/// How far one attempt on one provider got
enum Attempt {
    /// Failed before any code ran, so nothing was emitted
    NotStarted(ProviderError),
    Finished(ProviderResult<ExecuteResult>),
}

/// Destroys a transient workspace when dropped before `finish` runs,
/// e.g. when the caller's future is cancelled mid-execution.
struct TransientGuard {
    workspace: Arc<dyn Workspace>,
    provider: Arc<dyn Provider>,
    task: Option<AbortHandle>,
    armed: bool,
}

impl TransientGuard {
    fn new(workspace: Arc<dyn Workspace>, provider: Arc<dyn Provider>) -> Self {
        Self {
            workspace,
            provider,
            task: None,
            armed: true,
        }
    }

    async fn finish(mut self) {
        self.armed = false;
        teardown(Arc::clone(&self.workspace), Arc::clone(&self.provider)).await;
    }
}

impl Drop for TransientGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(task) = &self.task {
            task.abort();
        }

        let workspace = Arc::clone(&self.workspace);
        let provider = Arc::clone(&self.provider);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(teardown(workspace, provider));
            }
            Err(_) => warn!(
                "Transient workspace {} dropped outside a runtime, not destroyed",
                workspace.id()
            ),
        }
    }
}

async fn teardown(workspace: Arc<dyn Workspace>, provider: Arc<dyn Provider>) {
    workspace.destroy().await;
    provider.release(workspace.id()).await;
    debug!("Transient workspace {} torn down", workspace.id());
}

/// Front door for running code. Construct once and share through an `Arc`.
pub struct WorkspaceManager {
    providers: RwLock<HashMap<WorkspaceType, Arc<dyn Provider>>>,
    workspaces: RwLock<HashMap<String, Arc<dyn Workspace>>>,
    default_provider: RwLock<Option<WorkspaceType>>,
    priority: Vec<WorkspaceType>,
    defaults: ExecutionDefaults,
}

impl Default for WorkspaceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceManager {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            workspaces: RwLock::new(HashMap::new()),
            default_provider: RwLock::new(None),
            priority: DEFAULT_PRIORITY.to_vec(),
            defaults: ExecutionDefaults::default(),
        }
    }

    /// Fallback order, most preferred first
    pub fn with_priority(mut self, priority: Vec<WorkspaceType>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_execution_defaults(mut self, defaults: ExecutionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Build a manager with every provider the settings enable
    pub async fn from_settings(settings: &WorkspaceSettings) -> Self {
        let manager = Self::new()
            .with_priority(settings.priority.clone())
            .with_execution_defaults(settings.execution.clone());

        if let Some(remote) = &settings.remote {
            match RemoteProvider::new(remote) {
                Ok(provider) => manager.register_provider(Arc::new(provider)).await,
                Err(e) => warn!("Remote provider disabled: {}", e),
            }
        }

        if settings.docker.enabled {
            match DockerProvider::new(settings.root.join("docker")) {
                Ok(provider) => {
                    let provider = provider
                        .with_pull_timeout(settings.docker.pull_timeout)
                        .with_images(settings.docker.images.clone())
                        .with_limits(settings.docker.limits.clone());
                    manager.register_provider(Arc::new(provider)).await;
                }
                Err(e) => warn!("Docker provider disabled: {}", e),
            }
        }

        if settings.local_enabled {
            let provider = LocalProvider::new(settings.root.join("local"));
            manager.register_provider(Arc::new(provider)).await;
        }

        if let Some(default) = settings.default_provider {
            if let Err(e) = manager.set_default_provider(default).await {
                warn!("Ignoring default provider: {}", e);
            }
        }

        manager
    }

    /// Register a provider implementation. A later registration of the same type wins.
    pub async fn register_provider(&self, provider: Arc<dyn Provider>) {
        let workspace_type = provider.workspace_type();
        let mut providers = self.providers.write().await;
        if providers.insert(workspace_type, Arc::clone(&provider)).is_some() {
            info!(
                "Replaced {} provider with {}",
                workspace_type,
                provider.name()
            );
        } else {
            info!("Registered {} provider: {}", workspace_type, provider.name());
        }
    }

    /// Registered providers in a stable order
    pub async fn providers(&self) -> Vec<Arc<dyn Provider>> {
        let providers = self.providers.read().await;
        WorkspaceType::ALL
            .iter()
            .filter_map(|t| providers.get(t).cloned())
            .collect()
    }

    pub async fn provider(&self, workspace_type: WorkspaceType) -> Option<Arc<dyn Provider>> {
        self.providers.read().await.get(&workspace_type).cloned()
    }

    pub async fn set_default_provider(&self, workspace_type: WorkspaceType) -> Result<()> {
        if !self.providers.read().await.contains_key(&workspace_type) {
            return Err(ManagerError::ProviderNotRegistered(workspace_type));
        }
        *self.default_provider.write().await = Some(workspace_type);
        info!("Default provider set to {}", workspace_type);
        Ok(())
    }

    pub async fn default_provider(&self) -> Option<WorkspaceType> {
        *self.default_provider.read().await
    }

    /// Providers worth trying, in order
    async fn candidates(
        &self,
        language: Option<&str>,
        requested: Option<WorkspaceType>,
    ) -> Vec<Arc<dyn Provider>> {
        let preferred = match requested {
            Some(t) => Some(t),
            None => self.default_provider().await,
        };

        let providers = self.providers.read().await;
        let support: HashMap<_, _> = providers
            .iter()
            .map(|(t, p)| (*t, p.supported_languages()))
            .collect();

        candidate_order(language, preferred, &self.priority, &support)
            .into_iter()
            .filter_map(|t| providers.get(&t).cloned())
            .collect()
    }

    async fn is_reachable(provider: &dyn Provider) -> bool {
        match provider.is_available().await {
            Ok(available) => available,
            Err(e) => {
                warn!("{} availability check failed: {}", provider.name(), e);
                false
            }
        }
    }

    /// Create and track a workspace on the requested, default, or best available provider
    pub async fn create_workspace(&self, mut config: WorkspaceConfig) -> Result<Arc<dyn Workspace>> {
        if let Some(language) = &config.language {
            let info = languages::resolve(language).ok_or_else(|| {
                ManagerError::Validation(format!("unsupported language '{}'", language))
            })?;
            config.language = Some(info.id.to_string());
        }
        let language = config.language.clone();
        let label = language.clone().unwrap_or_else(|| "any language".to_string());
        let requested = config.workspace_type;

        let mut failures = Vec::new();
        for provider in self.candidates(language.as_deref(), requested).await {
            let workspace_type = provider.workspace_type();
            if !Self::is_reachable(provider.as_ref()).await {
                failures.push(format!("{} unavailable", workspace_type));
                continue;
            }

            let mut attempt = config.clone();
            attempt.workspace_type = Some(workspace_type);
            match provider.create(attempt).await {
                Ok(workspace) => {
                    self.note_choice(requested, workspace_type, &label);
                    self.workspaces
                        .write()
                        .await
                        .insert(workspace.id().to_string(), Arc::clone(&workspace));
                    info!(
                        "Created {} workspace {} for {}",
                        workspace_type,
                        workspace.id(),
                        label
                    );
                    return Ok(workspace);
                }
                Err(e) if e.is_infrastructure() => {
                    warn!("{} could not create a workspace: {}", provider.name(), e);
                    failures.push(format!("{}: {}", workspace_type, e));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(exhausted(label, failures))
    }

    fn note_choice(&self, requested: Option<WorkspaceType>, chosen: WorkspaceType, language: &str) {
        if let Some(requested) = requested {
            if requested != chosen {
                info!(
                    "Requested {} provider unusable for {}, fell back to {}",
                    requested, language, chosen
                );
            }
        }
        if chosen == WorkspaceType::Local && requested != Some(WorkspaceType::Local) {
            warn!(
                "Running {} on the local provider: code executes unsandboxed on this host",
                language
            );
        }
    }

    /// Tracked workspace, else the first provider that knows the id
    pub async fn get_workspace(&self, id: &str) -> Option<Arc<dyn Workspace>> {
        if let Some(workspace) = self.workspaces.read().await.get(id) {
            return Some(Arc::clone(workspace));
        }

        for provider in self.providers().await {
            if let Some(workspace) = provider.get(id).await {
                self.workspaces
                    .write()
                    .await
                    .insert(id.to_string(), Arc::clone(&workspace));
                return Some(workspace);
            }
        }
        None
    }

    /// Every workspace every provider knows about. A failing provider is skipped.
    pub async fn list_workspaces(&self) -> Vec<WorkspaceInfo> {
        let mut infos = Vec::new();
        for provider in self.providers().await {
            match provider.list().await {
                Ok(list) => infos.extend(list),
                Err(e) => warn!("Failed to list {} workspaces: {}", provider.name(), e),
            }
        }
        infos
    }

    pub async fn destroy_workspace(&self, id: &str) -> Result<()> {
        let workspace = self
            .get_workspace(id)
            .await
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;

        workspace.destroy().await;
        self.workspaces.write().await.remove(id);
        if let Some(provider) = self.provider(workspace.workspace_type()).await {
            provider.release(id).await;
        }
        info!("Destroyed workspace {}", id);
        Ok(())
    }

    /// Canonical language and execution defaults applied
    fn prepare(&self, request: &ExecuteRequest) -> Result<ExecuteRequest> {
        let info = languages::resolve(&request.language).ok_or_else(|| {
            ManagerError::Validation(format!("unsupported language '{}'", request.language))
        })?;
        if request.timeout_secs == Some(0) {
            return Err(ManagerError::Validation(
                "timeout must be at least one second".to_string(),
            ));
        }

        let mut prepared = request.clone();
        prepared.language = info.id.to_string();
        prepared.timeout_secs = Some(request.timeout_secs.unwrap_or(self.defaults.timeout_secs));
        prepared.memory_limit_mb = request.memory_limit_mb.or(self.defaults.memory_limit_mb);
        Ok(prepared)
    }

    /// Run code once in a throwaway workspace, falling back across providers
    /// on infrastructure failures. Program failures come back as data.
    pub async fn execute_code(&self, request: &ExecuteRequest) -> Result<ExecuteResult> {
        let request = self.prepare(request)?;
        let started = Instant::now();

        let mut failures = Vec::new();
        for provider in self.candidates(Some(request.language.as_str()), None).await {
            let workspace_type = provider.workspace_type();
            if !Self::is_reachable(provider.as_ref()).await {
                failures.push(format!("{} unavailable", workspace_type));
                continue;
            }

            let outcome = match self.run_transient(&provider, &request, None).await {
                Attempt::NotStarted(e) => Err(e),
                Attempt::Finished(outcome) => outcome,
            };
            match outcome {
                Ok(result) => {
                    self.note_choice(None, workspace_type, &request.language);
                    debug!(
                        "Executed {} on {} in {}ms",
                        request.language,
                        workspace_type,
                        started.elapsed().as_millis()
                    );
                    return Ok(result);
                }
                Err(e) if e.is_infrastructure() => {
                    warn!("{} failed to execute {}: {}", provider.name(), request.language, e);
                    failures.push(format!("{}: {}", workspace_type, e));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(exhausted(request.language, failures))
    }

    /// Streaming one-shot execution. Falls back only while nothing has been
    /// emitted; the sink always receives exactly one exit event.
    pub async fn execute_code_stream(
        &self,
        request: &ExecuteRequest,
        sink: OutputSink,
    ) -> Result<ExecuteResult> {
        let request = match self.prepare(request) {
            Ok(request) => request,
            Err(e) => return Err(fail_stream(&sink, e)),
        };

        let mut failures = Vec::new();
        for provider in self.candidates(Some(request.language.as_str()), None).await {
            let workspace_type = provider.workspace_type();
            if !Self::is_reachable(provider.as_ref()).await {
                failures.push(format!("{} unavailable", workspace_type));
                continue;
            }

            match self
                .run_transient(&provider, &request, Some(sink.clone()))
                .await
            {
                Attempt::NotStarted(e) if e.is_infrastructure() => {
                    warn!("{} failed to start: {}", provider.name(), e);
                    failures.push(format!("{}: {}", workspace_type, e));
                }
                Attempt::NotStarted(e) => return Err(fail_stream(&sink, e.into())),
                Attempt::Finished(outcome) => {
                    self.note_choice(None, workspace_type, &request.language);
                    return outcome.map_err(ManagerError::from);
                }
            }
        }

        Err(fail_stream(&sink, exhausted(request.language, failures)))
    }

    /// Create, start and execute on one provider, destroying the workspace in every outcome
    async fn run_transient(
        &self,
        provider: &Arc<dyn Provider>,
        request: &ExecuteRequest,
        sink: Option<OutputSink>,
    ) -> Attempt {
        let config = WorkspaceConfig {
            workspace_type: Some(provider.workspace_type()),
            language: Some(request.language.clone()),
            timeout_secs: request.timeout_secs,
            memory_limit_mb: request.memory_limit_mb,
            ..Default::default()
        };
        let workspace = match provider.create(config).await {
            Ok(workspace) => workspace,
            Err(e) => return Attempt::NotStarted(e),
        };
        let mut guard = TransientGuard::new(Arc::clone(&workspace), Arc::clone(provider));

        let task_request = request.clone();
        let tail = sink.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = workspace.start().await {
                return Attempt::NotStarted(e);
            }
            Attempt::Finished(match sink {
                Some(sink) => workspace.execute_stream(&task_request, sink).await,
                None => workspace.execute(&task_request).await,
            })
        });
        guard.task = Some(task.abort_handle());

        let attempt = match task.await {
            Ok(attempt) => attempt,
            Err(e) => {
                let message = if e.is_panic() {
                    "execution task panicked".to_string()
                } else {
                    format!("execution task failed: {}", e)
                };
                error!("Transient workspace {}: {}", guard.workspace.id(), message);
                let err = ProviderError::InternalError(message);
                match &tail {
                    // The task died before it could close the stream
                    Some(sink) => {
                        let _ = sink.send(TerminalOutput::stderr(err.to_string()));
                        let _ = sink.send(TerminalOutput::failed_exit());
                        Attempt::Finished(Err(err))
                    }
                    None => Attempt::NotStarted(err),
                }
            }
        };

        guard.finish().await;
        attempt
    }

    /// Destroy tracked workspaces, then let every provider clean up after itself
    pub async fn cleanup(&self) {
        let tracked: Vec<Arc<dyn Workspace>> = {
            let mut workspaces = self.workspaces.write().await;
            workspaces.drain().map(|(_, w)| w).collect()
        };
        for workspace in &tracked {
            workspace.destroy().await;
        }

        for provider in self.providers().await {
            if let Err(e) = provider.cleanup().await {
                warn!("{} cleanup failed: {}", provider.name(), e);
            }
        }
        info!("Workspace cleanup complete ({} tracked)", tracked.len());
    }
}

fn exhausted(language: String, failures: Vec<String>) -> ManagerError {
    let reason = if failures.is_empty() {
        "no registered provider supports it".to_string()
    } else {
        failures.join("; ")
    };
    ManagerError::NoProviderAvailable { language, reason }
}

/// Close a stream that never reached a backend
fn fail_stream(sink: &OutputSink, error: ManagerError) -> ManagerError {
    let _ = sink.send(TerminalOutput::stderr(error.to_string()));
    let _ = sink.send(TerminalOutput::failed_exit());
    error
}
