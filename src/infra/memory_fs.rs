//! In-process [`FileSystem`] used by tests and dry runs.

use crate::domain::{WorkflowError, WorkflowResult};
use crate::ports::{DirEntry, FileStat, FileSystem};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const MAX_LINK_DEPTH: usize = 8;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
    Link(PathBuf),
}

#[derive(Default)]
pub struct MemoryFileSystem {
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
}

fn poisoned() -> WorkflowError {
    WorkflowError::infra("memory filesystem", "lock poisoned")
}

fn stat_of(node: &Node) -> FileStat {
    match node {
        Node::Dir => FileStat {
            is_dir: true,
            is_symlink: false,
            len: 0,
        },
        Node::File(bytes) => FileStat {
            is_dir: false,
            is_symlink: false,
            len: bytes.len() as u64,
        },
        Node::Link(_) => FileStat {
            is_dir: false,
            is_symlink: true,
            len: 0,
        },
    }
}

fn insert_dirs(nodes: &mut BTreeMap<PathBuf, Node>, path: &Path) {
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            continue;
        }
        nodes.entry(ancestor.to_path_buf()).or_insert(Node::Dir);
    }
}

/// Rewrites `path` through any symlinked ancestor (or itself).
fn resolve(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> WorkflowResult<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..MAX_LINK_DEPTH {
        let linked = current.ancestors().find_map(|ancestor| match nodes.get(ancestor) {
            Some(Node::Link(target)) => Some((ancestor.to_path_buf(), target.clone())),
            _ => None,
        });
        let Some((link, target)) = linked else {
            return Ok(current);
        };
        let rest = current.strip_prefix(&link).map(Path::to_path_buf).unwrap_or_default();
        current = if rest.as_os_str().is_empty() {
            target
        } else {
            target.join(rest)
        };
    }
    Err(WorkflowError::infra(
        format!("resolve {}", path.display()),
        "too many levels of symbolic links",
    ))
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// All paths currently present, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.nodes
            .lock()
            .map(|nodes| nodes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Target of the symlink at `link`, if it is one.
    pub fn link_target(&self, link: &Path) -> Option<PathBuf> {
        let nodes = self.nodes.lock().ok()?;
        match nodes.get(link) {
            Some(Node::Link(target)) => Some(target.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn create_dir_all(&self, path: &Path) -> WorkflowResult<()> {
        let mut nodes = self.nodes.lock().map_err(|_| poisoned())?;
        insert_dirs(&mut nodes, path);
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> WorkflowResult<()> {
        let mut nodes = self.nodes.lock().map_err(|_| poisoned())?;
        nodes.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> WorkflowResult<()> {
        let mut nodes = self.nodes.lock().map_err(|_| poisoned())?;
        let path = resolve(&nodes, path)?;
        if matches!(nodes.get(&path), Some(Node::Dir)) {
            return Err(WorkflowError::infra(
                format!("write {}", path.display()),
                "is a directory",
            ));
        }
        if let Some(parent) = path.parent() {
            insert_dirs(&mut nodes, parent);
        }
        nodes.insert(path, Node::File(contents.to_vec()));
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> WorkflowResult<Vec<u8>> {
        let nodes = self.nodes.lock().map_err(|_| poisoned())?;
        let resolved = resolve(&nodes, path)?;
        match nodes.get(&resolved) {
            Some(Node::File(bytes)) => Ok(bytes.clone()),
            Some(_) => Err(WorkflowError::infra(
                format!("read {}", path.display()),
                "not a file",
            )),
            None => Err(WorkflowError::not_found("file", path.display())),
        }
    }

    async fn remove_file(&self, path: &Path) -> WorkflowResult<()> {
        let mut nodes = self.nodes.lock().map_err(|_| poisoned())?;
        if let Some(Node::File(_)) = nodes.get(path) {
            nodes.remove(path);
        }
        Ok(())
    }

    async fn create_symlink(&self, target: &Path, link: &Path) -> WorkflowResult<()> {
        let mut nodes = self.nodes.lock().map_err(|_| poisoned())?;
        if nodes.contains_key(link) {
            return Err(WorkflowError::infra(
                format!("symlink {}", link.display()),
                "already exists",
            ));
        }
        if let Some(parent) = link.parent() {
            insert_dirs(&mut nodes, parent);
        }
        nodes.insert(link.to_path_buf(), Node::Link(target.to_path_buf()));
        Ok(())
    }

    async fn remove_symlink(&self, link: &Path) -> WorkflowResult<()> {
        let mut nodes = self.nodes.lock().map_err(|_| poisoned())?;
        if let Some(Node::Link(_)) = nodes.get(link) {
            nodes.remove(link);
        }
        Ok(())
    }

    async fn stat(&self, path: &Path) -> WorkflowResult<Option<FileStat>> {
        let nodes = self.nodes.lock().map_err(|_| poisoned())?;
        Ok(nodes.get(path).map(stat_of))
    }

    async fn list_dir(&self, path: &Path) -> WorkflowResult<Vec<DirEntry>> {
        let nodes = self.nodes.lock().map_err(|_| poisoned())?;
        let dir = resolve(&nodes, path)?;
        if !matches!(nodes.get(&dir), Some(Node::Dir)) {
            return Err(WorkflowError::not_found("directory", path.display()));
        }
        Ok(nodes
            .iter()
            .filter(|(p, _)| p.parent() == Some(dir.as_path()))
            .filter_map(|(p, node)| {
                let name = p.file_name()?.to_string_lossy().into_owned();
                Some(DirEntry {
                    path: path.join(&name),
                    name,
                    stat: stat_of(node),
                })
            })
            .collect())
    }

    async fn copy(&self, from: &Path, to: &Path) -> WorkflowResult<()> {
        let bytes = self.read_file(from).await?;
        self.write_file(to, &bytes).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> WorkflowResult<()> {
        let mut nodes = self.nodes.lock().map_err(|_| poisoned())?;
        let moved: Vec<(PathBuf, Node)> = nodes
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect();
        if moved.is_empty() {
            return Err(WorkflowError::not_found("path", from.display()));
        }
        for (old, node) in moved {
            nodes.remove(&old);
            let suffix = old.strip_prefix(from).map(Path::to_path_buf).unwrap_or_default();
            let new = if suffix.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(suffix)
            };
            nodes.insert(new, node);
        }
        if let Some(parent) = to.parent() {
            insert_dirs(&mut nodes, parent);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/memory_fs_tests.rs"]
mod tests;
