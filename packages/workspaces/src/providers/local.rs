// ABOUTME: Local provider running code as child processes on the host
// ABOUTME: Each run gets its own process group so a timeout can kill everything it spawned

use super::{
    destroy_all, LanguageSupport, OutputBuffer, Provider, ProviderCapabilities, ProviderError,
    Result, WorkspaceTable, MAX_OUTPUT_BYTES,
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
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long to wait for output pipes to drain once the process is gone
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

pub struct LocalProvider {
    root: PathBuf,
    max_output_bytes: usize,
    workspaces: WorkspaceTable<LocalWorkspace>,
}

impl LocalProvider {
    /// Workspaces live in per-id directories under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        warn!(
            "Local workspace provider enabled at {}: code runs unsandboxed on this host, use only for trusted code",
            root.display()
        );
        Self {
            root,
            max_output_bytes: MAX_OUTPUT_BYTES,
            workspaces: WorkspaceTable::new(),
        }
    }

    /// Default root under the system temp directory
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("orkee-workspaces")
    }

    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn workspace_type(&self) -> WorkspaceType {
        WorkspaceType::Local
    }

    fn name(&self) -> &str {
        "Local Processes"
    }

    fn supported_languages(&self) -> LanguageSupport {
        LanguageSupport::Only(
            languages::all()
                .iter()
                .filter(|l| languages::has_run_command(l.id))
                .map(|l| l.id.to_string())
                .collect(),
        )
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            package_management: true,
            file_system: true,
            native_streaming: true,
            network_isolation: false,
        }
    }

    async fn is_available(&self) -> Result<bool> {
        Ok(true)
    }

    async fn create(&self, config: WorkspaceConfig) -> Result<Arc<dyn Workspace>> {
        if let Some(language) = &config.language {
            languages::resolve_or_err(language)?;
        }

        let state = WorkspaceState::new(WorkspaceType::Local, config);
        let workdir = WorkDir::new(self.root.join(state.id()));
        let workspace = Arc::new(LocalWorkspace {
            state,
            workdir,
            max_output_bytes: self.max_output_bytes,
            running: RunningGroups::default(),
        });

        info!("Created local workspace {}", workspace.id());
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
        let count = destroy_all(&self.workspaces).await;
        info!("Cleaned up {} local workspaces", count);
        Ok(())
    }
}

pub struct LocalWorkspace {
    state: WorkspaceState,
    workdir: WorkDir,
    max_output_bytes: usize,
    running: RunningGroups,
}

/// Process groups of runs whose leader has not been reaped yet
#[derive(Default)]
struct RunningGroups(Mutex<HashSet<i32>>);

impl RunningGroups {
    fn lock(&self) -> MutexGuard<'_, HashSet<i32>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn kill_all(&self) -> usize {
        let groups: Vec<i32> = self.lock().iter().copied().collect();
        for pgid in &groups {
            kill_group(*pgid);
        }
        groups.len()
    }
}

/// Registers a run's process group for its lifetime.
///
/// Dropping the guard before the leader is reaped (the run future was cancelled)
/// kills the whole group; `kill_on_drop` alone only reaches the leader.
struct GroupGuard<'a> {
    groups: &'a RunningGroups,
    pgid: Option<i32>,
}

impl<'a> GroupGuard<'a> {
    fn register(groups: &'a RunningGroups, pid: Option<u32>) -> Self {
        let pgid = pid.and_then(|pid| i32::try_from(pid).ok());
        if let Some(pgid) = pgid {
            groups.lock().insert(pgid);
        }
        Self { groups, pgid }
    }

    /// Signal the group while its leader is still unreaped, so the id cannot have been reused
    fn kill(&self) {
        if let Some(pgid) = self.pgid {
            kill_group(pgid);
        }
    }

    /// The leader has been reaped; the group id no longer belongs to this run
    fn reaped(&mut self) -> Option<i32> {
        let pgid = self.pgid.take()?;
        self.groups.lock().remove(&pgid);
        Some(pgid)
    }
}

impl Drop for GroupGuard<'_> {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
            self.groups.lock().remove(&pgid);
        }
    }
}

impl LocalWorkspace {
    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    async fn run(&self, request: &ExecuteRequest, sink: Option<&OutputSink>) -> Result<ExecuteResult> {
        self.state.ensure_running().await?;
        let language = languages::resolve_or_err(&request.language)?;
        self.workdir.write_all(&request.files).await?;

        let mut staged = None;
        let mut command = if let Some((program, args)) =
            languages::inline_command(language.id, &request.code)
        {
            let mut command = Command::new(program);
            command
                .args(args)
                .args(&request.args)
                .current_dir(self.workdir.root());
            command
        } else if let Some(plan) = languages::source_plan(language.id) {
            let run = self.workdir.stage(&plan, &request.code).await?;
            let mut command = Command::new("sh");
            command
                .arg("-c")
                .arg(plan.script)
                .arg("sh")
                .args(&request.args)
                .current_dir(&run.dir);
            staged = Some(run);
            command
        } else {
            return Err(ProviderError::NotSupported(format!(
                "no local runtime for {}",
                language.name
            )));
        };

        command
            .envs(&self.state.config().env)
            .envs(&request.env)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let outcome = self.supervise(command, request, sink).await;
        if let Some(run) = staged {
            run.remove().await;
        }
        self.state.touch().await;
        outcome
    }

    async fn supervise(
        &self,
        mut command: Command,
        request: &ExecuteRequest,
        sink: Option<&OutputSink>,
    ) -> Result<ExecuteResult> {
        let timeout = self.state.timeout_for(request);
        let started = Instant::now();

        let mut child = command.spawn().map_err(|e| {
            ProviderError::RuntimeError(format!(
                "failed to start {} runtime: {}",
                request.language, e
            ))
        })?;
        let pid = child.id();
        // Declared after `child` so it drops first, while the leader is still unreaped
        let mut group = GroupGuard::register(&self.running, pid);
        debug!(
            "Workspace {} spawned pid {:?} (timeout {:?})",
            self.state.short_id(),
            pid,
            timeout
        );

        if let (Some(mut stdin), Some(input)) = (child.stdin.take(), request.stdin.clone()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!("Failed to write stdin: {}", e);
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .map(|pipe| capture(pipe, self.max_output_bytes, sink.cloned(), |s| TerminalOutput::stdout(s)));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| capture(pipe, self.max_output_bytes, sink.cloned(), |s| TerminalOutput::stderr(s)));

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        let exit = match waited {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                group.kill();
                return Err(ProviderError::Io(e));
            }
            Err(_) => {
                warn!(
                    "Workspace {}: execution exceeded {:?}, killing process group",
                    self.state.short_id(),
                    timeout
                );
                group.kill();
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };
        let pgid = group.reaped();

        let (stdout, stderr) = tokio::join!(drain(stdout), drain(stderr));
        let (stdout, mut stderr) = match (stdout, stderr) {
            (Ok(out), Ok(err)) => (out, err),
            (stdout, stderr) => {
                // A pipe still open after a normal exit means the group is still in use.
                // After a timeout the group was already killed before reaping.
                if let (Some(pgid), Some(_)) = (pgid, &exit) {
                    debug!(
                        "Workspace {}: output still open after exit, killing group {}",
                        self.state.short_id(),
                        pgid
                    );
                    kill_group(pgid);
                }
                tokio::join!(settle(stdout), settle(stderr))
            }
        };
        let elapsed = started.elapsed().as_millis() as u64;

        let Some(status) = exit else {
            let notice = format!("Execution timed out after {}s", timeout.as_secs());
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&notice);
            return Ok(ExecuteResult::timeout(
                stdout,
                stderr,
                elapsed,
                Some("SIGKILL".to_string()),
            ));
        };

        Ok(ExecuteResult::from_exit(stdout, stderr, status.code().map(i64::from), elapsed)
            .with_signal(signal_name(&status)))
    }
}

#[async_trait]
impl Workspace for LocalWorkspace {
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

        if let Err(e) = self.workdir.create().await {
            self.state.set_status(WorkspaceStatus::Error).await;
            return Err(e);
        }
        self.state
            .set_metadata("workdir", self.workdir.root().display().to_string())
            .await;
        self.state.set_status(WorkspaceStatus::Running).await;
        info!("Started local workspace {}", self.id());

        install_configured_packages(self).await;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.state.status().await == WorkspaceStatus::Running {
            self.state.set_status(WorkspaceStatus::Stopped).await;
        }
        Ok(())
    }

    async fn destroy(&self) {
        if self.state.status().await == WorkspaceStatus::Destroyed {
            return;
        }
        let killed = self.running.kill_all();
        if killed > 0 {
            info!(
                "Killed {} running process group(s) in workspace {}",
                killed,
                self.state.short_id()
            );
        }
        self.workdir.remove().await;
        self.state.set_status(WorkspaceStatus::Destroyed).await;
        info!("Destroyed local workspace {}", self.id());
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

/// Read a pipe to the end, keeping at most `limit` bytes and forwarding chunks to the sink
fn capture<R>(
    mut pipe: R,
    limit: usize,
    sink: Option<OutputSink>,
    event: fn(String) -> TerminalOutput,
) -> JoinHandle<OutputBuffer>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = OutputBuffer::new(limit);
        let mut chunk = [0u8; 8192];

        loop {
            let n = match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };

            let kept = buffer.push(&chunk[..n]);
            if let (Some(sink), false) = (&sink, kept.is_empty()) {
                let _ = sink.send(event(String::from_utf8_lossy(kept).into_owned()));
            }
        }

        buffer
    })
}

type Reader = JoinHandle<OutputBuffer>;

/// Wait for a reader to hit EOF, handing it back if the pipe is still open after the grace period
async fn drain(handle: Option<Reader>) -> std::result::Result<String, Reader> {
    let Some(mut handle) = handle else {
        return Ok(String::new());
    };

    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut handle).await {
        Ok(Ok(buffer)) => Ok(buffer.into_string()),
        Ok(Err(e)) => {
            warn!("Output reader failed: {}", e);
            Ok(String::new())
        }
        Err(_) => Err(handle),
    }
}

/// Second and final drain once the group has been signalled
async fn settle(drained: std::result::Result<String, Reader>) -> String {
    match drained {
        Ok(text) => text,
        Err(handle) => collect(Some(handle)).await,
    }
}

async fn collect(handle: Option<Reader>) -> String {
    match drain(handle).await {
        Ok(text) => text,
        Err(handle) => {
            // A descendant outside the process group still holds the pipe
            handle.abort();
            String::new()
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: i32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // ESRCH just means the group is already gone
    let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_group(_pgid: i32) {}

#[cfg(unix)]
fn signal_name(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(|sig| {
        nix::sys::signal::Signal::try_from(sig)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| format!("signal {}", sig))
    })
}

#[cfg(not(unix))]
fn signal_name(_status: &ExitStatus) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_truncates_at_limit() {
        let data: &[u8] = b"0123456789abcdef";
        let handle = capture(data, 10, None, |s| TerminalOutput::stdout(s));
        let text = collect(Some(handle)).await;
        assert!(text.starts_with("0123456789"));
        assert!(text.ends_with("[output truncated]"));
    }

    #[tokio::test]
    async fn test_capture_forwards_chunks() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let data: &[u8] = b"hello";
        let handle = capture(data, 1024, Some(tx), |s| TerminalOutput::stderr(s));
        assert_eq!(collect(Some(handle)).await, "hello");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, crate::types::OutputKind::Stderr);
        assert_eq!(event.data, "hello");
    }

    #[test]
    fn test_group_guard_forgets_reaped_groups() {
        let groups = RunningGroups::default();
        let mut guard = GroupGuard::register(&groups, Some(u32::MAX));
        // Out of pid range, never registered
        assert!(groups.lock().is_empty());
        assert_eq!(guard.reaped(), None);

        let mut guard = GroupGuard::register(&groups, Some(4_000_000));
        assert!(groups.lock().contains(&4_000_000));
        assert_eq!(guard.reaped(), Some(4_000_000));
        assert!(groups.lock().is_empty());
        drop(guard);
        assert!(groups.lock().is_empty());
    }

    #[tokio::test]
    async fn test_supported_languages_are_runnable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path());
        let support = provider.supported_languages();
        assert!(support.supports("python"));
        assert!(support.supports("c"));
        assert!(!support.supports("cobol"));
    }

    #[tokio::test]
    async fn test_execute_requires_start() {
        let tmp = tempfile::TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path());
        let ws = provider
            .create(WorkspaceConfig::for_language("bash"))
            .await
            .unwrap();
        let err = ws
            .execute(&ExecuteRequest::new("bash", "echo hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotRunning(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_language() {
        let tmp = tempfile::TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path());
        let result = provider
            .create(WorkspaceConfig::for_language("klingon"))
            .await;
        assert!(matches!(result, Err(ProviderError::UnsupportedLanguage(_))));
    }
}
