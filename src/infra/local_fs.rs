//! [`FileSystem`] over the local disk.

use crate::domain::{WorkflowError, WorkflowResult};
use crate::ports::{DirEntry, FileStat, FileSystem};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;

pub struct LocalFileSystem;

fn fs_err(operation: &str, path: &Path, err: std::io::Error) -> WorkflowError {
    WorkflowError::infra(format!("{} {}", operation, path.display()), err)
}

fn ignore_missing(result: std::io::Result<()>, operation: &str, path: &Path) -> WorkflowResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(fs_err(operation, path, e)),
    }
}

fn stat_of(meta: &std::fs::Metadata) -> FileStat {
    FileStat {
        is_dir: meta.is_dir(),
        is_symlink: meta.file_type().is_symlink(),
        len: meta.len(),
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn create_dir_all(&self, path: &Path) -> WorkflowResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| fs_err("create dir", path, e))
    }

    async fn remove_dir_all(&self, path: &Path) -> WorkflowResult<()> {
        ignore_missing(tokio::fs::remove_dir_all(path).await, "remove dir", path)
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> WorkflowResult<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| fs_err("write", path, e))
    }

    async fn read_file(&self, path: &Path) -> WorkflowResult<Vec<u8>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(WorkflowError::not_found("file", path.display()))
            }
            Err(e) => Err(fs_err("read", path, e)),
        }
    }

    async fn remove_file(&self, path: &Path) -> WorkflowResult<()> {
        ignore_missing(tokio::fs::remove_file(path).await, "remove file", path)
    }

    #[cfg(unix)]
    async fn create_symlink(&self, target: &Path, link: &Path) -> WorkflowResult<()> {
        if let Some(parent) = link.parent() {
            self.create_dir_all(parent).await?;
        }
        tokio::fs::symlink(target, link)
            .await
            .map_err(|e| fs_err("symlink", link, e))
    }

    #[cfg(windows)]
    async fn create_symlink(&self, target: &Path, link: &Path) -> WorkflowResult<()> {
        if let Some(parent) = link.parent() {
            self.create_dir_all(parent).await?;
        }
        tokio::fs::symlink_dir(target, link)
            .await
            .map_err(|e| fs_err("symlink", link, e))
    }

    async fn remove_symlink(&self, link: &Path) -> WorkflowResult<()> {
        ignore_missing(tokio::fs::remove_file(link).await, "remove symlink", link)
    }

    async fn stat(&self, path: &Path) -> WorkflowResult<Option<FileStat>> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => Ok(Some(stat_of(&meta))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(fs_err("stat", path, e)),
        }
    }

    async fn list_dir(&self, path: &Path) -> WorkflowResult<Vec<DirEntry>> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .map_err(|e| fs_err("list", path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| fs_err("list", path, e))?
        {
            let entry_path = entry.path();
            let meta = tokio::fs::symlink_metadata(&entry_path)
                .await
                .map_err(|e| fs_err("stat", &entry_path, e))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry_path,
                stat: stat_of(&meta),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn copy(&self, from: &Path, to: &Path) -> WorkflowResult<()> {
        tokio::fs::copy(from, to)
            .await
            .map(|_| ())
            .map_err(|e| fs_err("copy", from, e))
    }

    async fn rename(&self, from: &Path, to: &Path) -> WorkflowResult<()> {
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| fs_err("rename", from, e))
    }
}

#[cfg(test)]
#[path = "tests/local_fs_tests.rs"]
mod tests;
