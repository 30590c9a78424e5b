// ABOUTME: Remote provider delegating execution to a Piston-compatible HTTP service
// ABOUTME: Workspaces are logical; each execution is one stateless POST to the service

use super::{
    destroy_all, megabytes_to_bytes, LanguageSupport, Provider, ProviderCapabilities,
    ProviderError, Result, WorkspaceTable,
};
use crate::languages;
use crate::types::{
    ExecuteRequest, ExecuteResult, FileEncoding, FileInfo, FileReadResult, FileWriteRequest,
    PackageInstallRequest, PackageInstallResult, PackageManager, WorkspaceConfig, WorkspaceInfo,
    WorkspaceStatus, WorkspaceType,
};
use crate::workspace::{Workspace, WorkspaceState};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Public Piston instance, rate limited to 5 requests per second
pub const DEFAULT_REMOTE_URL: &str = "https://emkc.org/api/v2/piston";

/// How long a reachability probe result is trusted
const AVAILABILITY_TTL: Duration = Duration::from_secs(60);

const COMPILE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RUN_MEMORY_MB: u64 = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Sent verbatim as the `Authorization` header
    pub api_key: Option<String>,
    /// Slack for one HTTP exchange. An execute call may take this long beyond the
    /// compile and run time it grants the service.
    pub request_timeout: Duration,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// A runtime advertised by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRuntimeInfo {
    pub language: String,
    pub version: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ExecutePayload<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<PayloadFile<'a>>,
    stdin: &'a str,
    args: &'a [String],
    compile_timeout: u64,
    run_timeout: u64,
    compile_memory_limit: i64,
    run_memory_limit: i64,
}

#[derive(Debug, Serialize)]
struct PayloadFile<'a> {
    name: String,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'static str>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    compile: Option<Stage>,
    #[serde(default)]
    run: Stage,
}

#[derive(Debug, Default, Deserialize)]
struct Stage {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    output: String,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    signal: Option<String>,
}

/// HTTP client for the execution service
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl RemoteClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .http
            .request(method, format!("{}/{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.header("Authorization", key),
            None => request,
        }
    }

    pub async fn runtimes(&self) -> Result<Vec<RemoteRuntimeInfo>> {
        let response = self
            .request(reqwest::Method::GET, "runtimes")
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::NetworkError(format!("invalid runtimes response: {}", e)))
    }

    /// Deadline for an execute call: the service's own compile and run budget plus transport slack
    fn execute_deadline(&self, payload: &ExecutePayload<'_>) -> Duration {
        Duration::from_millis(payload.compile_timeout.saturating_add(payload.run_timeout))
            .saturating_add(self.request_timeout)
    }

    async fn execute(&self, payload: &ExecutePayload<'_>) -> Result<ExecuteResponse> {
        let response = self
            .request(reqwest::Method::POST, "execute")
            .timeout(self.execute_deadline(payload))
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::NetworkError(format!("invalid execute response: {}", e)))
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    ProviderError::ConnectionError(format!("remote execution service: {}", e))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::NetworkError(format!(
        "remote execution service returned {}: {}",
        status,
        body.trim()
    )))
}

/// Map the service's answer onto an execution result
fn to_result(response: ExecuteResponse, execution_time_ms: u64) -> ExecuteResult {
    if let Some(compile) = response.compile {
        if compile.code != Some(0) {
            let stderr = if !compile.stderr.is_empty() {
                compile.stderr
            } else if !compile.output.is_empty() {
                compile.output
            } else {
                "Compilation failed".to_string()
            };
            // Exit code can be missing when the compiler was killed
            let exit_code = compile.code.or(Some(1));
            return ExecuteResult::from_exit(compile.stdout, stderr, exit_code, execution_time_ms)
                .with_signal(compile.signal);
        }
    }

    let run = response.run;
    match run.signal.as_deref() {
        Some("SIGKILL") | Some("SIGTERM") => {
            ExecuteResult::timeout(run.stdout, run.stderr, execution_time_ms, run.signal)
        }
        Some(_) => ExecuteResult::from_exit(run.stdout, run.stderr, None, execution_time_ms)
            .with_signal(run.signal),
        None => ExecuteResult::from_exit(
            run.stdout,
            run.stderr,
            Some(run.code.unwrap_or(0)),
            execution_time_ms,
        ),
    }
}

pub struct RemoteProvider {
    client: Option<Arc<RemoteClient>>,
    /// Last probe outcome and when it was taken
    availability: RwLock<Option<(bool, Instant)>>,
    workspaces: WorkspaceTable<RemoteWorkspace>,
}

impl RemoteProvider {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        info!("Remote execution service at {}", config.base_url);
        Ok(Self {
            client: Some(Arc::new(RemoteClient::new(config)?)),
            availability: RwLock::new(None),
            workspaces: WorkspaceTable::new(),
        })
    }

    /// A provider with no service configured; never available
    pub fn unconfigured() -> Self {
        Self {
            client: None,
            availability: RwLock::new(None),
            workspaces: WorkspaceTable::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    /// Runtimes the service currently offers
    pub async fn runtimes(&self) -> Result<Vec<RemoteRuntimeInfo>> {
        match &self.client {
            Some(client) => client.runtimes().await,
            None => Err(ProviderError::NotAvailable(
                "remote execution service is not configured".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Provider for RemoteProvider {
    fn workspace_type(&self) -> WorkspaceType {
        WorkspaceType::Remote
    }

    fn name(&self) -> &str {
        "Remote Execution Service"
    }

    fn supported_languages(&self) -> LanguageSupport {
        LanguageSupport::Only(languages::remote_languages().map(String::from).collect())
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            package_management: false,
            file_system: false,
            native_streaming: false,
            network_isolation: true,
        }
    }

    async fn is_available(&self) -> Result<bool> {
        let Some(client) = &self.client else {
            return Ok(false);
        };

        if let Some((available, checked_at)) = *self.availability.read().await {
            if checked_at.elapsed() < AVAILABILITY_TTL {
                return Ok(available);
            }
        }

        let available = match client.runtimes().await {
            Ok(runtimes) => {
                debug!("Remote service offers {} runtimes", runtimes.len());
                true
            }
            Err(e) => {
                warn!("Remote execution service not available: {}", e);
                false
            }
        };
        *self.availability.write().await = Some((available, Instant::now()));
        Ok(available)
    }

    async fn create(&self, config: WorkspaceConfig) -> Result<Arc<dyn Workspace>> {
        let client = self.client.clone().ok_or_else(|| {
            ProviderError::NotAvailable("remote execution service is not configured".to_string())
        })?;

        if let Some(language) = &config.language {
            let info = languages::resolve_or_err(language)?;
            if languages::remote_runtime(info.id).is_none() {
                return Err(ProviderError::UnsupportedLanguage(format!(
                    "{} is not offered by the remote execution service",
                    info.name
                )));
            }
        }

        let workspace = Arc::new(RemoteWorkspace {
            state: WorkspaceState::new(WorkspaceType::Remote, config),
            client,
        });
        debug!("Created remote workspace {}", workspace.id());
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
        debug!("Cleaned up {} remote workspaces", destroyed);
        Ok(())
    }
}

pub struct RemoteWorkspace {
    state: WorkspaceState,
    client: Arc<RemoteClient>,
}

fn no_file_system() -> ProviderError {
    ProviderError::NotSupported("remote workspaces have no file system".to_string())
}

fn no_packages() -> ProviderError {
    ProviderError::NotSupported("remote workspaces cannot install packages".to_string())
}

#[async_trait]
impl Workspace for RemoteWorkspace {
    fn state(&self) -> &WorkspaceState {
        &self.state
    }

    async fn start(&self) -> Result<()> {
        if self.state.status().await == WorkspaceStatus::Destroyed {
            return Err(ProviderError::NotRunning(format!(
                "workspace {} was destroyed",
                self.id()
            )));
        }
        self.state.set_status(WorkspaceStatus::Running).await;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.state.status().await == WorkspaceStatus::Running {
            self.state.set_status(WorkspaceStatus::Stopped).await;
        }
        Ok(())
    }

    async fn destroy(&self) {
        self.state.set_status(WorkspaceStatus::Destroyed).await;
    }

    async fn read_file(&self, _path: &str) -> Result<FileReadResult> {
        Err(no_file_system())
    }

    async fn write_file(&self, _request: &FileWriteRequest) -> Result<()> {
        Err(no_file_system())
    }

    async fn list_files(&self, _path: &str) -> Result<Vec<FileInfo>> {
        Err(no_file_system())
    }

    async fn delete_file(&self, _path: &str) -> Result<()> {
        Err(no_file_system())
    }

    async fn file_exists(&self, _path: &str) -> Result<bool> {
        Err(no_file_system())
    }

    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResult> {
        self.state.ensure_running().await?;
        let language = languages::resolve_or_err(&request.language)?;
        let runtime = languages::remote_runtime(language.id).ok_or_else(|| {
            ProviderError::UnsupportedLanguage(format!(
                "{} is not offered by the remote execution service",
                language.name
            ))
        })?;

        // The main file goes first; the service runs the first file
        let mut files = vec![PayloadFile {
            name: format!("main{}", language.extension),
            content: &request.code,
            encoding: None,
        }];
        files.extend(request.files.iter().map(|file| PayloadFile {
            name: file.path.trim_start_matches('/').to_string(),
            content: &file.content,
            encoding: match file.encoding {
                FileEncoding::Utf8 => None,
                FileEncoding::Base64 => Some("base64"),
            },
        }));

        let memory_mb = request
            .memory_limit_mb
            .or(self.state.config().memory_limit_mb)
            .unwrap_or(DEFAULT_RUN_MEMORY_MB);
        let payload = ExecutePayload {
            language: runtime.language,
            version: request.version.as_deref().unwrap_or(runtime.version),
            files,
            stdin: request.stdin.as_deref().unwrap_or(""),
            args: &request.args,
            compile_timeout: COMPILE_TIMEOUT_MS,
            run_timeout: u64::try_from(self.state.timeout_for(request).as_millis())
                .unwrap_or(u64::MAX),
            compile_memory_limit: -1,
            run_memory_limit: megabytes_to_bytes(memory_mb),
        };

        debug!(
            "Workspace {}: executing {} {} remotely",
            self.state.short_id(),
            payload.language,
            payload.version
        );
        let started = Instant::now();
        let response = self.client.execute(&payload).await?;
        self.state.touch().await;
        Ok(to_result(response, started.elapsed().as_millis() as u64))
    }

    fn supported_package_managers(&self) -> Vec<PackageManager> {
        Vec::new()
    }

    async fn install_package(
        &self,
        _request: &PackageInstallRequest,
    ) -> Result<PackageInstallResult> {
        Err(no_packages())
    }

    async fn list_packages(&self, _manager: PackageManager) -> Result<Vec<String>> {
        Err(no_packages())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionStatus;
    use pretty_assertions::assert_eq;

    fn response(json: serde_json::Value) -> ExecuteResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_compile_failure_is_an_error_result() {
        let result = to_result(
            response(serde_json::json!({
                "compile": {"stdout": "", "stderr": "main.c:1: error", "output": "main.c:1: error", "code": 1, "signal": null},
                "run": {"stdout": "", "stderr": "", "output": "", "code": null, "signal": null}
            })),
            12,
        );
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.stderr, "main.c:1: error");
    }

    #[test]
    fn test_killed_run_is_a_timeout() {
        let result = to_result(
            response(serde_json::json!({
                "run": {"stdout": "partial", "stderr": "", "output": "partial", "code": null, "signal": "SIGKILL"}
            })),
            3000,
        );
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.signal.as_deref(), Some("SIGKILL"));
        assert_eq!(result.stdout, "partial");
    }

    #[test]
    fn test_other_signals_have_no_exit_code() {
        let result = to_result(
            response(serde_json::json!({
                "run": {"stdout": "", "stderr": "", "code": null, "signal": "SIGSEGV"}
            })),
            5,
        );
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.signal.as_deref(), Some("SIGSEGV"));
    }

    #[test]
    fn test_successful_compile_falls_through_to_run() {
        let result = to_result(
            response(serde_json::json!({
                "compile": {"stdout": "", "stderr": "", "code": 0},
                "run": {"stdout": "hi\n", "stderr": "", "code": 0}
            })),
            5,
        );
        assert!(result.is_success());
        assert_eq!(result.output, "hi\n");
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_never_available() {
        let provider = RemoteProvider::unconfigured();
        assert!(!provider.is_configured());
        assert!(!provider.is_available().await.unwrap());
        assert!(matches!(
            provider.create(WorkspaceConfig::default()).await,
            Err(ProviderError::NotAvailable(_))
        ));
    }

    #[test]
    fn test_execute_deadline_covers_compile_and_run() {
        let mut config = RemoteConfig::new("http://localhost:2000/api/v2");
        config.request_timeout = Duration::from_secs(1);
        let client = RemoteClient::new(&config).unwrap();
        let args = Vec::new();
        let payload = ExecutePayload {
            language: "python",
            version: "3.10.0",
            files: Vec::new(),
            stdin: "",
            args: &args,
            compile_timeout: COMPILE_TIMEOUT_MS,
            run_timeout: 3_600_000,
            compile_memory_limit: -1,
            run_memory_limit: -1,
        };
        assert_eq!(
            client.execute_deadline(&payload),
            Duration::from_millis(COMPILE_TIMEOUT_MS + 3_600_000 + 1_000)
        );

        let payload = ExecutePayload {
            run_timeout: u64::MAX,
            ..payload
        };
        assert!(client.execute_deadline(&payload) > Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = RemoteClient::new(&RemoteConfig::new("http://localhost:2000/api/v2/")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:2000/api/v2");
    }
}
