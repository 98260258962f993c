use crate::domain::WorkflowResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_dir: bool,
    pub is_symlink: bool,
    pub len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: PathBuf,
    pub stat: FileStat,
}

/// Filesystem operations used to lay out run directories and read reports.
///
/// `stat` does not follow symlinks. Removing something that does not exist
/// succeeds.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> WorkflowResult<()>;
    async fn remove_dir_all(&self, path: &Path) -> WorkflowResult<()>;
    async fn write_file(&self, path: &Path, contents: &[u8]) -> WorkflowResult<()>;
    async fn read_file(&self, path: &Path) -> WorkflowResult<Vec<u8>>;
    async fn remove_file(&self, path: &Path) -> WorkflowResult<()>;
    async fn create_symlink(&self, target: &Path, link: &Path) -> WorkflowResult<()>;
    async fn remove_symlink(&self, link: &Path) -> WorkflowResult<()>;
    async fn stat(&self, path: &Path) -> WorkflowResult<Option<FileStat>>;
    /// Entries sorted by name.
    async fn list_dir(&self, path: &Path) -> WorkflowResult<Vec<DirEntry>>;
    async fn copy(&self, from: &Path, to: &Path) -> WorkflowResult<()>;
    async fn rename(&self, from: &Path, to: &Path) -> WorkflowResult<()>;

    async fn exists(&self, path: &Path) -> WorkflowResult<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    async fn read_to_string(&self, path: &Path) -> WorkflowResult<String> {
        let bytes = self.read_file(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
