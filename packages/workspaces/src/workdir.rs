// ABOUTME: Host directory backing a workspace's private file tree
// ABOUTME: Resolves caller paths inside the root, rejecting traversal, and stages source files for runs

use crate::languages::SourcePlan;
use crate::providers::{ProviderError, Result};
use crate::types::{FileEncoding, FileInfo, FileKind, FileReadResult, FileWriteRequest};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Prefix of the scratch directories holding staged sources
const RUN_DIR_PREFIX: &str = ".orkee-run-";

#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn create(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Map a caller supplied path onto the host, staying inside the root.
    /// Leading `/` is treated as the workspace root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = normalize(path)?;
        let resolved = self.root.join(&relative);

        // A symlink inside the tree must not lead out of it. Check the deepest
        // existing ancestor so paths about to be created are covered too.
        if let Ok(real_root) = self.root.canonicalize() {
            let existing = resolved.ancestors().find(|p| p.exists());
            if let Some(real) = existing.and_then(|p| p.canonicalize().ok()) {
                if !real.starts_with(&real_root) {
                    return Err(ProviderError::InvalidPath(format!(
                        "{} resolves outside the workspace",
                        path
                    )));
                }
            }
        }

        Ok(resolved)
    }

    pub async fn read(&self, path: &str) -> Result<FileReadResult> {
        let target = self.resolve(path)?;
        let bytes = tokio::fs::read(&target).await?;
        Ok(match String::from_utf8(bytes) {
            Ok(content) => FileReadResult {
                content,
                encoding: FileEncoding::Utf8,
            },
            Err(e) => FileReadResult {
                content: BASE64.encode(e.into_bytes()),
                encoding: FileEncoding::Base64,
            },
        })
    }

    pub async fn write(&self, request: &FileWriteRequest) -> Result<()> {
        let target = self.resolve(&request.path)?;
        if target == self.root {
            return Err(ProviderError::InvalidPath(
                "cannot write to the workspace root".to_string(),
            ));
        }

        let bytes = match request.encoding {
            FileEncoding::Utf8 => request.content.as_bytes().to_vec(),
            FileEncoding::Base64 => BASE64.decode(request.content.as_bytes()).map_err(|e| {
                ProviderError::InvalidPath(format!("{}: invalid base64 content: {}", request.path, e))
            })?,
        };

        if request.create_dirs {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::write(&target, bytes).await?;
        debug!("Wrote {}", target.display());
        Ok(())
    }

    pub async fn list(&self, path: &str) -> Result<Vec<FileInfo>> {
        let dir = self.resolve(path)?;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(RUN_DIR_PREFIX) {
                continue;
            }

            let metadata = entry.metadata().await?;
            let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
            let kind = if metadata.is_dir() {
                FileKind::Directory
            } else {
                FileKind::File
            };

            files.push(FileInfo {
                path: self.relative(&entry.path()),
                name,
                kind,
                size: metadata.len(),
                modified_at,
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if target == self.root {
            return Err(ProviderError::InvalidPath(
                "cannot delete the workspace root".to_string(),
            ));
        }

        let metadata = tokio::fs::symlink_metadata(&target).await?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        Ok(())
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path)?;
        Ok(tokio::fs::metadata(&target).await.is_ok())
    }

    pub async fn write_all(&self, files: &[FileWriteRequest]) -> Result<()> {
        for file in files {
            self.write(file).await?;
        }
        Ok(())
    }

    /// Write `code` into a fresh scratch directory under the root for a source plan
    pub async fn stage(&self, plan: &SourcePlan, code: &str) -> Result<StagedRun> {
        let name = format!(
            "{}{}",
            RUN_DIR_PREFIX,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let dir = self.root.join(&name);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(plan.file_name), code).await?;
        Ok(StagedRun { dir, name })
    }

    /// Best-effort removal of the whole tree
    pub async fn remove(&self) {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!("Removed workspace directory {}", self.root.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove workspace directory {}: {}",
                self.root.display(),
                e
            ),
        }
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Scratch directory holding a staged source file
#[derive(Debug)]
pub struct StagedRun {
    pub dir: PathBuf,
    /// Directory name relative to the workspace root
    pub name: String,
}

impl StagedRun {
    pub async fn remove(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            debug!("Failed to remove {}: {}", self.dir.display(), e);
        }
    }
}

/// Lexically normalize a relative path, refusing to climb above its start
fn normalize(path: &str) -> Result<PathBuf> {
    if path.contains('\0') {
        return Err(ProviderError::InvalidPath("path contains NUL".to_string()));
    }

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(ProviderError::InvalidPath(format!(
                        "{} escapes the workspace",
                        path
                    )));
                }
            }
            Component::Prefix(_) => {
                return Err(ProviderError::InvalidPath(format!(
                    "{} is not a workspace path",
                    path
                )))
            }
        }
    }

    Ok(parts.iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("a.txt", "a.txt")]
    #[case("/src/main.py", "src/main.py")]
    #[case("./a/../b.txt", "b.txt")]
    #[case("", "")]
    fn test_normalize_accepts(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize(input).unwrap(), PathBuf::from(expected));
    }

    #[rstest]
    #[case("../etc/passwd")]
    #[case("a/../../x")]
    #[case("/../secret")]
    fn test_normalize_rejects_traversal(#[case] input: &str) {
        assert!(matches!(
            normalize(input),
            Err(ProviderError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_binary_content_round_trips_as_base64() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkDir::new(tmp.path().join("ws"));
        dir.create().await.unwrap();

        let bytes = vec![0u8, 159, 146, 150, 255];
        dir.write(&FileWriteRequest {
            path: "bin/data.bin".to_string(),
            content: BASE64.encode(&bytes),
            encoding: FileEncoding::Base64,
            create_dirs: true,
        })
        .await
        .unwrap();

        let read = dir.read("bin/data.bin").await.unwrap();
        assert_eq!(read.encoding, FileEncoding::Base64);
        assert_eq!(BASE64.decode(read.content).unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_list_hides_staging_dirs_and_reports_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkDir::new(tmp.path());
        dir.write(&FileWriteRequest::text("src/a.py", "print(1)"))
            .await
            .unwrap();
        let plan = crate::languages::source_plan("c").unwrap();
        let staged = dir.stage(&plan, "int main(){return 0;}").await.unwrap();

        let root = dir.list("/").await.unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].name, "src");
        assert_eq!(root[0].kind, FileKind::Directory);

        let src = dir.list("src").await.unwrap();
        assert_eq!(src[0].path, "src/a.py");
        assert_eq!(src[0].size, 8);

        staged.remove().await;
    }

    #[tokio::test]
    async fn test_write_without_create_dirs_needs_parent() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkDir::new(tmp.path());
        let mut request = FileWriteRequest::text("missing/a.txt", "x");
        request.create_dirs = false;
        assert!(matches!(dir.write(&request).await, Err(ProviderError::Io(_))));
    }

    #[tokio::test]
    async fn test_root_cannot_be_deleted() {
        let tmp = TempDir::new().unwrap();
        let dir = WorkDir::new(tmp.path());
        assert!(matches!(
            dir.delete("/").await,
            Err(ProviderError::InvalidPath(_))
        ));
        assert!(tmp.path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_rejected() {
        let outside = TempDir::new().unwrap();
        let tmp = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("link")).unwrap();

        let dir = WorkDir::new(tmp.path());
        assert!(matches!(
            dir.resolve("link/file"),
            Err(ProviderError::InvalidPath(_))
        ));
        assert!(matches!(
            dir.resolve("link"),
            Err(ProviderError::InvalidPath(_))
        ));
    }
}
