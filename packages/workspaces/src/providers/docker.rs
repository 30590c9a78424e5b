// ABOUTME: Docker provider running each workspace in its own long-lived container
// ABOUTME: Uses bollard to create, exec into and remove containers with a bind-mounted work directory

use super::{
    destroy_all, megabytes_to_bytes, LanguageSupport, OutputBuffer, Provider,
    ProviderCapabilities, ProviderError, Result, WorkspaceTable, MAX_OUTPUT_BYTES,
};
use crate::languages;
use crate::types::{
    ExecuteRequest, ExecuteResult, FileInfo, FileReadResult, FileWriteRequest, TerminalOutput,
    WorkspaceConfig, WorkspaceInfo, WorkspaceStatus, WorkspaceType,
};
use crate::workdir::WorkDir;
use crate::workspace::{
    finish_stream, install_configured_packages, OutputSink, Workspace, WorkspaceState,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Mount point of the workspace directory inside every container
pub const CONTAINER_WORKDIR: &str = "/workspace";

/// Extra time the daemon gets beyond the in-container `timeout` before the
/// container itself is torn down
const EXEC_GRACE: Duration = Duration::from_secs(5);

/// Runs `bash -c` when the image ships bash, plain `sh -c` otherwise
const BASH_OR_SH: &str = r#"code="$1"; shift; if command -v bash >/dev/null 2>&1; then exec bash -c "$code" "$@"; else exec sh -c "$code" "$@"; fi"#;

/// Resource limits applied to each workspace container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerLimits {
    pub memory_mb: u64,
    pub cpu: f32,
    pub pids: i64,
    /// `none` disables networking; package installation needs e.g. `bridge`
    pub network_mode: String,
}

impl Default for ContainerLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu: 1.0,
            pids: 256,
            network_mode: "none".to_string(),
        }
    }
}

/// Pulls images on demand, remembering which ones are already present
pub struct ImageStore {
    client: Docker,
    /// Key: image name (e.g., "python:3.11-slim"), Value: timestamp when pulled
    cache: RwLock<HashMap<String, chrono::DateTime<chrono::Utc>>>,
    pull_timeout: Duration,
}

impl ImageStore {
    pub fn new(client: Docker, pull_timeout: Duration) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
            pull_timeout,
        }
    }

    /// Make sure `image` exists locally, pulling it if needed
    pub async fn ensure(&self, image: &str) -> Result<()> {
        if self.cache.read().await.contains_key(image) && self.exists(image).await? {
            debug!("Image {} found in cache, skipping pull", image);
            return Ok(());
        }

        if !self.exists(image).await? {
            self.pull(image).await?;
        }

        self.cache
            .write()
            .await
            .insert(image.to_string(), chrono::Utc::now());
        Ok(())
    }

    async fn exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ProviderError::ImageError(e.to_string())),
        }
    }

    async fn pull(&self, image: &str) -> Result<()> {
        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut last_status = String::new();
            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(error) = info.error {
                            return Err(ProviderError::ImageError(format!(
                                "Failed to pull image {}: {}",
                                image, error
                            )));
                        }
                        if let Some(status) = info.status {
                            if status != last_status {
                                debug!("Pull status: {}", status);
                                last_status = status;
                            }
                        }
                    }
                    Err(e) => {
                        return Err(ProviderError::ImageError(format!(
                            "Failed to pull image {}: {}",
                            image, e
                        )));
                    }
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }
}

pub struct DockerProvider {
    client: Docker,
    images: Arc<ImageStore>,
    label_prefix: String,
    root: PathBuf,
    image_overrides: HashMap<String, String>,
    limits: ContainerLimits,
    workspaces: WorkspaceTable<DockerWorkspace>,
}

impl DockerProvider {
    /// Connect to the local daemon with a 10 minute image pull timeout
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(Self::with_client(client, root))
    }

    pub fn with_client(client: Docker, root: impl Into<PathBuf>) -> Self {
        Self {
            images: Arc::new(ImageStore::new(client.clone(), Duration::from_secs(600))),
            client,
            label_prefix: "orkee.workspace".to_string(),
            root: root.into(),
            image_overrides: HashMap::new(),
            limits: ContainerLimits::default(),
            workspaces: WorkspaceTable::new(),
        }
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.images = Arc::new(ImageStore::new(self.client.clone(), timeout));
        self
    }

    /// Replace default images per canonical language id
    pub fn with_images(mut self, overrides: HashMap<String, String>) -> Self {
        self.image_overrides = overrides;
        self
    }

    pub fn with_limits(mut self, limits: ContainerLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Image used for a canonical language id
    pub fn image_for(&self, language: &str) -> Option<String> {
        self.image_overrides
            .get(language)
            .cloned()
            .or_else(|| languages::docker_image(language).map(String::from))
    }

    /// Remove managed containers no tracked workspace owns, e.g. left over from a crash
    async fn remove_orphans(&self) -> Result<usize> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}.managed=true", self.label_prefix)],
        );
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let mut removed = 0;
        for id in containers.into_iter().filter_map(|c| c.id) {
            match force_remove(&self.client, &id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove orphaned container {}: {}", id, e),
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl Provider for DockerProvider {
    fn workspace_type(&self) -> WorkspaceType {
        WorkspaceType::Docker
    }

    fn name(&self) -> &str {
        "Docker Containers"
    }

    fn supported_languages(&self) -> LanguageSupport {
        LanguageSupport::Only(
            languages::all()
                .iter()
                .filter(|l| self.image_for(l.id).is_some() && languages::has_run_command(l.id))
                .map(|l| l.id.to_string())
                .collect(),
        )
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            package_management: true,
            file_system: true,
            native_streaming: true,
            network_isolation: self.limits.network_mode == "none",
        }
    }

    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn create(&self, config: WorkspaceConfig) -> Result<Arc<dyn Workspace>> {
        let language = match &config.language {
            Some(language) => languages::resolve_or_err(language)?.id,
            None => "python",
        };
        let image = match &config.image {
            Some(image) => image.clone(),
            None => self.image_for(language).ok_or_else(|| {
                ProviderError::UnsupportedLanguage(format!("no Docker image for {}", language))
            })?,
        };

        let state = WorkspaceState::new(WorkspaceType::Docker, config);
        let workspace = Arc::new(DockerWorkspace {
            workdir: WorkDir::new(self.root.join(state.id())),
            state,
            client: self.client.clone(),
            images: Arc::clone(&self.images),
            image,
            label_prefix: self.label_prefix.clone(),
            limits: self.limits.clone(),
            container_id: RwLock::new(None),
        });

        info!(
            "Created Docker workspace {} ({})",
            workspace.id(),
            workspace.image
        );
        self.workspaces.insert(Arc::clone(&workspace)).await;
        Ok(workspace)
    }

    async fn get(&self, id: &str) -> Option<Arc<dyn Workspace>> {
        self.workspaces.get(id).await
    }

    async fn list(&self) -> Result<Vec<WorkspaceInfo>> {
        Ok(self.workspaces.infos().await)
    }

    async fn release(&self, id: &str) {
        self.workspaces.remove(id).await;
    }

    async fn cleanup(&self) -> Result<()> {
        let destroyed = destroy_all(&self.workspaces).await;
        let orphans = self.remove_orphans().await?;
        info!(
            "Cleaned up {} Docker workspaces and {} orphaned containers",
            destroyed, orphans
        );
        Ok(())
    }
}

pub struct DockerWorkspace {
    state: WorkspaceState,
    client: Docker,
    images: Arc<ImageStore>,
    image: String,
    label_prefix: String,
    limits: ContainerLimits,
    workdir: WorkDir,
    container_id: RwLock<Option<String>>,
}

impl DockerWorkspace {
    pub fn image(&self) -> &str {
        &self.image
    }

    pub async fn container_id(&self) -> Option<String> {
        self.container_id.read().await.clone()
    }

    fn container_config(&self, host_dir: &Path) -> Config<String> {
        let config = self.state.config();

        let mut labels = HashMap::new();
        labels.insert(format!("{}.managed", self.label_prefix), "true".to_string());
        labels.insert(
            format!("{}.id", self.label_prefix),
            self.state.id().to_string(),
        );
        if let Some(language) = &config.language {
            labels.insert(format!("{}.language", self.label_prefix), language.clone());
        }

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let memory_mb = config.memory_limit_mb.unwrap_or(self.limits.memory_mb);
        let cpu = config.cpu_limit.unwrap_or(self.limits.cpu);

        let host_config = bollard::models::HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                host_dir.display(),
                CONTAINER_WORKDIR
            )]),
            network_mode: Some(self.limits.network_mode.clone()),
            memory: Some(megabytes_to_bytes(memory_mb)),
            cpu_shares: Some((cpu * 1024.0) as i64),
            pids_limit: Some(self.limits.pids),
            ..Default::default()
        };

        Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            env: Some(env),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn provision(&self) -> Result<String> {
        self.workdir.create().await?;
        let host_dir = tokio::fs::canonicalize(self.workdir.root()).await?;
        self.images.ensure(&self.image).await?;

        let options = CreateContainerOptions {
            name: format!("orkee-ws-{}", self.state.short_id()),
            platform: None,
        };
        let container = self
            .client
            .create_container(Some(options), self.container_config(&host_dir))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        if let Err(e) = self
            .client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = force_remove(&self.client, &container.id).await;
            return Err(ProviderError::ContainerError(e.to_string()));
        }

        Ok(container.id)
    }

    async fn run(&self, request: &ExecuteRequest, sink: Option<&OutputSink>) -> Result<ExecuteResult> {
        self.state.ensure_running().await?;
        let container_id = self.container_id().await.ok_or_else(|| {
            ProviderError::NotRunning(format!("workspace {} has no container", self.id()))
        })?;
        let language = languages::resolve_or_err(&request.language)?;
        self.workdir.write_all(&request.files).await?;

        let timeout = self.state.timeout_for(request);
        let mut command = vec![
            "timeout".to_string(),
            "-s".to_string(),
            "KILL".to_string(),
            timeout.as_secs().to_string(),
        ];

        let mut staged = None;
        let working_dir = if language.id == "bash" {
            command.extend(["sh", "-c", BASH_OR_SH, "sh"].map(String::from));
            command.push(request.code.clone());
            CONTAINER_WORKDIR.to_string()
        } else if let Some((program, args)) = languages::inline_command(language.id, &request.code)
        {
            command.push(program.to_string());
            command.extend(args);
            CONTAINER_WORKDIR.to_string()
        } else if let Some(plan) = languages::source_plan(language.id) {
            let run = self.workdir.stage(&plan, &request.code).await?;
            command.extend(["sh", "-c", plan.script, "sh"].map(String::from));
            let dir = format!("{}/{}", CONTAINER_WORKDIR, run.name);
            staged = Some(run);
            dir
        } else {
            return Err(ProviderError::NotSupported(format!(
                "no Docker run command for {}",
                language.name
            )));
        };
        command.extend(request.args.iter().cloned());

        let outcome = self
            .exec(&container_id, command, working_dir, request, timeout, sink)
            .await;
        if let Some(run) = staged {
            run.remove().await;
        }
        self.state.touch().await;
        outcome
    }

    async fn exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: String,
        request: &ExecuteRequest,
        timeout: Duration,
        sink: Option<&OutputSink>,
    ) -> Result<ExecuteResult> {
        debug!("Executing in container {}: {:?}", container_id, command);

        let env: Vec<String> = request
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let exec_config = CreateExecOptions {
            cmd: Some(command),
            env: Some(env),
            working_dir: Some(working_dir),
            attach_stdin: Some(request.stdin.is_some()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let started = Instant::now();
        let collected = tokio::time::timeout(
            timeout + EXEC_GRACE,
            self.collect_output(&exec.id, request.stdin.as_deref(), sink),
        )
        .await;

        let (stdout, mut stderr) = match collected {
            Ok(output) => output?,
            Err(_) => {
                error!(
                    "Workspace {}: exec outlived its timeout, removing container {}",
                    self.state.short_id(),
                    container_id
                );
                if let Err(e) = force_remove(&self.client, container_id).await {
                    warn!("Failed to remove container {}: {}", container_id, e);
                }
                *self.container_id.write().await = None;
                self.state.set_status(WorkspaceStatus::Error).await;
                return Ok(ExecuteResult::timeout(
                    String::new(),
                    format!("Execution timed out after {}s", timeout.as_secs()),
                    started.elapsed().as_millis() as u64,
                    Some("SIGKILL".to_string()),
                ));
            }
        };

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;
        let elapsed = started.elapsed();

        // `timeout -s KILL` reports 137; 124 comes from images whose timeout ignores -s
        if matches!(inspect.exit_code, Some(124) | Some(137)) && elapsed >= timeout {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!("Execution timed out after {}s", timeout.as_secs()));
            return Ok(ExecuteResult::timeout(
                stdout,
                stderr,
                elapsed.as_millis() as u64,
                Some("SIGKILL".to_string()),
            ));
        }

        Ok(ExecuteResult::from_exit(
            stdout,
            stderr,
            inspect.exit_code,
            elapsed.as_millis() as u64,
        ))
    }

    async fn collect_output(
        &self,
        exec_id: &str,
        stdin: Option<&str>,
        sink: Option<&OutputSink>,
    ) -> Result<(String, String)> {
        let start_result = self
            .client
            .start_exec(exec_id, None)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let mut stdout = OutputBuffer::new(MAX_OUTPUT_BYTES);
        let mut stderr = OutputBuffer::new(MAX_OUTPUT_BYTES);

        match start_result {
            StartExecResults::Attached {
                mut output,
                mut input,
            } => {
                if let Some(data) = stdin {
                    if let Err(e) = input.write_all(data.as_bytes()).await {
                        debug!("Failed to write stdin: {}", e);
                    }
                    let _ = input.shutdown().await;
                }

                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            let kept = stdout.push(&message);
                            forward(sink, kept, |s| TerminalOutput::stdout(s));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            let kept = stderr.push(&message);
                            forward(sink, kept, |s| TerminalOutput::stderr(s));
                        }
                        Ok(_) => {}
                        Err(e) => return Err(ProviderError::ContainerError(e.to_string())),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(ProviderError::ContainerError(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        }

        Ok((stdout.into_string(), stderr.into_string()))
    }
}

fn forward(sink: Option<&OutputSink>, chunk: &[u8], event: fn(String) -> TerminalOutput) {
    if let (Some(sink), false) = (sink, chunk.is_empty()) {
        let _ = sink.send(event(String::from_utf8_lossy(chunk).into_owned()));
    }
}

async fn force_remove(client: &Docker, container_id: &str) -> Result<()> {
    let options = RemoveContainerOptions {
        force: true,
        v: true,
        ..Default::default()
    };
    match client.remove_container(container_id, Some(options)).await {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(e) => Err(ProviderError::ContainerError(e.to_string())),
    }
}

#[async_trait]
impl Workspace for DockerWorkspace {
    fn state(&self) -> &WorkspaceState {
        &self.state
    }

    async fn start(&self) -> Result<()> {
        match self.state.status().await {
            WorkspaceStatus::Running => return Ok(()),
            WorkspaceStatus::Destroyed => {
                return Err(ProviderError::NotRunning(format!(
                    "workspace {} was destroyed",
                    self.id()
                )))
            }
            _ => {}
        }

        // A stopped workspace keeps its container
        if let Some(container_id) = self.container_id().await {
            self.client
                .start_container(&container_id, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| ProviderError::ContainerError(e.to_string()))?;
            self.state.set_status(WorkspaceStatus::Running).await;
            return Ok(());
        }

        info!(
            "Starting Docker workspace {} with image {}",
            self.id(),
            self.image
        );
        match self.provision().await {
            Ok(container_id) => {
                self.state.set_metadata("container_id", &container_id).await;
                self.state.set_metadata("image", &self.image).await;
                *self.container_id.write().await = Some(container_id);
                self.state.set_status(WorkspaceStatus::Running).await;
            }
            Err(e) => {
                error!("Failed to start Docker workspace {}: {}", self.id(), e);
                self.state.set_status(WorkspaceStatus::Error).await;
                return Err(e);
            }
        }

        install_configured_packages(self).await;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.state.status().await != WorkspaceStatus::Running {
            return Ok(());
        }
        if let Some(container_id) = self.container_id().await {
            self.client
                .stop_container(&container_id, Some(StopContainerOptions { t: 5 }))
                .await
                .map_err(|e| ProviderError::ContainerError(e.to_string()))?;
        }
        self.state.set_status(WorkspaceStatus::Stopped).await;
        Ok(())
    }

    async fn destroy(&self) {
        if self.state.status().await == WorkspaceStatus::Destroyed {
            return;
        }

        if let Some(container_id) = self.container_id.write().await.take() {
            if let Err(e) = force_remove(&self.client, &container_id).await {
                warn!("Failed to remove container {}: {}", container_id, e);
            }
        }
        self.workdir.remove().await;
        self.state.set_status(WorkspaceStatus::Destroyed).await;
        info!("Destroyed Docker workspace {}", self.id());
    }

    async fn read_file(&self, path: &str) -> Result<FileReadResult> {
        self.state.touch().await;
        self.workdir.read(path).await
    }

    async fn write_file(&self, request: &FileWriteRequest) -> Result<()> {
        self.state.touch().await;
        self.workdir.write(request).await
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileInfo>> {
        self.workdir.list(path).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.state.touch().await;
        self.workdir.delete(path).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        self.workdir.exists(path).await
    }

    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResult> {
        self.run(request, None).await
    }

    fn supports_native_streaming(&self) -> bool {
        true
    }

    async fn execute_stream(
        &self,
        request: &ExecuteRequest,
        sink: OutputSink,
    ) -> Result<ExecuteResult> {
        let outcome = self.run(request, Some(&sink)).await;
        finish_stream(outcome, &sink, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(root: &Path) -> Option<DockerProvider> {
        Docker::connect_with_local_defaults()
            .ok()
            .map(|client| DockerProvider::with_client(client, root))
    }

    #[tokio::test]
    async fn test_supported_languages_need_image_and_command() {
        let tmp = tempfile::TempDir::new().unwrap();
        let Some(provider) = provider(tmp.path()) else {
            println!("Skipping test: Docker client could not be configured");
            return;
        };

        let support = provider.supported_languages();
        assert!(support.supports("python"));
        assert!(support.supports("go"));
        // Image exists but no run command
        assert!(!support.supports("erlang"));
        // Run command exists but no image
        assert!(!support.supports("powershell"));
    }

    #[tokio::test]
    async fn test_image_overrides_take_precedence() {
        let tmp = tempfile::TempDir::new().unwrap();
        let Some(provider) = provider(tmp.path()) else {
            println!("Skipping test: Docker client could not be configured");
            return;
        };
        let provider = provider.with_images(HashMap::from([
            ("python".to_string(), "python:3.12-alpine".to_string()),
            ("powershell".to_string(), "mcr.microsoft.com/powershell".to_string()),
        ]));

        assert_eq!(provider.image_for("python").as_deref(), Some("python:3.12-alpine"));
        assert_eq!(provider.image_for("go").as_deref(), Some("golang:1.21-alpine"));
        assert!(provider.supported_languages().supports("powershell"));
    }

    #[tokio::test]
    async fn test_container_config_isolates_workspace() {
        let tmp = tempfile::TempDir::new().unwrap();
        let Some(provider) = provider(tmp.path()) else {
            println!("Skipping test: Docker client could not be configured");
            return;
        };

        let mut config = WorkspaceConfig::for_language("python");
        config.memory_limit_mb = Some(128);
        config.env.insert("FOO".to_string(), "bar".to_string());
        let ws = provider.create(config).await.unwrap();
        let ws = provider.workspaces.remove(ws.id()).await.unwrap();

        let bollard_config = ws.container_config(Path::new("/tmp/host"));
        let host = bollard_config.host_config.unwrap();
        assert_eq!(bollard_config.image.as_deref(), Some("python:3.11-slim"));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.memory, Some(128 * 1024 * 1024));
        assert_eq!(host.pids_limit, Some(256));
        assert_eq!(
            host.binds.unwrap(),
            vec!["/tmp/host:/workspace:rw".to_string()]
        );
        assert_eq!(bollard_config.env.unwrap(), vec!["FOO=bar".to_string()]);
        assert_eq!(
            bollard_config
                .labels
                .unwrap()
                .get("orkee.workspace.managed")
                .map(String::as_str),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_create_rejects_language_without_image() {
        let tmp = tempfile::TempDir::new().unwrap();
        let Some(provider) = provider(tmp.path()) else {
            println!("Skipping test: Docker client could not be configured");
            return;
        };
        let result = provider.create(WorkspaceConfig::for_language("cobol")).await;
        assert!(matches!(result, Err(ProviderError::UnsupportedLanguage(_))));
    }
}
