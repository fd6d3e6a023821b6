//! Real file system service implementation
//!
//! Writes go through a retry loop instead of locks. Spec output directories
//! may be held open briefly by other OS tooling.

use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::FileSystem;
use shared::{process_debug, process_warn, ProcessId};

const DEFAULT_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Real file system implementation
pub struct RealFileSystem {
    attempts: u32,
    retry_delay: Duration,
}

impl Default for RealFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl RealFileSystem {
    pub fn new() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Configure retry policy (fluent API)
    pub fn with_retries(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    async fn retry<T, F, Fut>(&self, operation: &str, path: &Path, mut action: F) -> OrchestratorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match action().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.attempts => {
                    process_warn!(
                        ProcessId::current(),
                        "⚠️ {} {} failed (attempt {}/{}): {}",
                        operation,
                        path.display(),
                        attempt,
                        self.attempts,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(OrchestratorError::file_system(operation, path, e)),
            }
        }
    }
}

async fn copy_tree(from: PathBuf, to: PathBuf) -> std::io::Result<()> {
    let mut pending = vec![(from, to)];
    while let Some((source, target)) = pending.pop() {
        fs::create_dir_all(&target).await?;
        let mut entries = fs::read_dir(&source).await?;
        while let Some(entry) = entries.next_entry().await? {
            let destination = target.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), destination));
            } else {
                fs::copy(entry.path(), destination).await?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl FileSystem for RealFileSystem {
    async fn create_dir_all(&self, path: &Path) -> OrchestratorResult<()> {
        self.retry("create directory", path, || fs::create_dir_all(path)).await
    }

    async fn write_file(&self, path: &Path, contents: &str) -> OrchestratorResult<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }
        self.retry("write", path, || fs::write(path, contents)).await?;
        process_debug!(ProcessId::current(), "📝 Wrote {} ({} bytes)", path.display(), contents.len());
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> OrchestratorResult<String> {
        self.retry("read", path, || fs::read_to_string(path)).await
    }

    async fn copy_dir(&self, from: &Path, to: &Path) -> OrchestratorResult<()> {
        self.retry("copy", from, || copy_tree(from.to_path_buf(), to.to_path_buf()))
            .await
    }

    async fn clear_dir(&self, path: &Path) -> OrchestratorResult<()> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }

        let mut entries = fs::read_dir(path)
            .await
            .map_err(|e| OrchestratorError::file_system("clear", path, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OrchestratorError::file_system("clear", path, e))?
        {
            let entry_path = entry.path();
            if entry_path.is_dir() {
                self.retry("remove directory", &entry_path, || fs::remove_dir_all(&entry_path))
                    .await?;
            } else {
                self.retry("remove file", &entry_path, || fs::remove_file(&entry_path))
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_truncates_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("aggregated.txt");
        let fs = RealFileSystem::new();

        fs.write_file(&path, "first version, longer").await.unwrap();
        fs.write_file(&path, "second").await.unwrap();

        assert_eq!(fs.read_file(&path).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_copy_dir_is_recursive() {
        let dir = TempDir::new().unwrap();
        let fs = RealFileSystem::new();
        let source = dir.path().join("Spec.Method");
        fs.write_file(&source.join("aggregated.txt"), "all").await.unwrap();
        fs.write_file(&source.join("extra").join("node1.txt"), "one").await.unwrap();

        let target = dir.path().join("FAILED_SPECS_LOGS").join("Spec.Method");
        fs.copy_dir(&source, &target).await.unwrap();

        assert_eq!(fs.read_file(&target.join("aggregated.txt")).await.unwrap(), "all");
        assert_eq!(fs.read_file(&target.join("extra").join("node1.txt")).await.unwrap(), "one");
    }

    #[tokio::test]
    async fn test_clear_dir_keeps_the_directory() {
        let dir = TempDir::new().unwrap();
        let fs = RealFileSystem::new();
        fs.write_file(&dir.path().join("a.txt"), "a").await.unwrap();
        fs.write_file(&dir.path().join("sub").join("b.txt"), "b").await.unwrap();

        fs.clear_dir(dir.path()).await.unwrap();

        assert!(dir.path().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        fs.clear_dir(&dir.path().join("missing")).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_missing_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let fs = RealFileSystem::new().with_retries(2, Duration::from_millis(1));
        let error = fs.read_file(&dir.path().join("nope.txt")).await.unwrap_err();

        assert!(matches!(error, OrchestratorError::FileSystemError { .. }));
        assert!(error.to_string().contains("nope.txt"));
    }
}
