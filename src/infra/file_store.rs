//! File-backed entity store.
//!
//! Stores one JSON document per entity under `<root>/<kind>/<id>.json` with:
//! - Optimistic concurrency checked under an exclusive `fs2` lock
//! - Atomic writes via temp file + rename
//! - Per-entity pre-mutation snapshots for the snapshot unit of work

use crate::domain::{WorkflowError, WorkflowResult};
use crate::ports::repository::check_version;
use crate::ports::{Entity, EntityStore, PreImages, Snapshotable, UnitId};
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOCK_FILE: &str = ".lock";

pub struct FileStore<T: Entity> {
    dir: PathBuf,
    undo: PreImages<T>,
    _entity: PhantomData<fn() -> T>,
}

/// Held for the duration of one store operation.
struct DirLock(File);

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = self.0.unlock();
    }
}

fn io_err(operation: &str, path: &Path, err: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::infra(format!("{} {}", operation, path.display()), err)
}

impl<T: Entity> FileStore<T> {
    /// Creates the store under `root/<kind>`.
    pub fn open(root: &Path) -> WorkflowResult<Self> {
        let dir = root.join(T::KIND);
        std::fs::create_dir_all(&dir).map_err(|e| io_err("create", &dir, e))?;
        Ok(Self {
            dir,
            undo: PreImages::default(),
            _entity: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &T::Id) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn lock(&self, exclusive: bool) -> WorkflowResult<DirLock> {
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_err("open", &path, e))?;
        let locked = if exclusive {
            file.lock_exclusive()
        } else {
            file.lock_shared()
        };
        locked.map_err(|e| io_err("lock", &path, e))?;
        Ok(DirLock(file))
    }

    fn read_entity(&self, path: &Path) -> WorkflowResult<Option<T>> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err("read", path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| io_err("decode", path, e))
    }

    /// Entity documents currently on disk, as (file name, bytes).
    fn read_documents(&self) -> WorkflowResult<Vec<(String, Vec<u8>)>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| io_err("list", &self.dir, e))?;
        let mut documents = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err("list", &self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") {
                continue;
            }
            let bytes = std::fs::read(entry.path()).map_err(|e| io_err("read", &entry.path(), e))?;
            documents.push((name, bytes));
        }
        documents.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(documents)
    }
}

/// Writes to a temp file, then renames for atomicity.
fn write_atomic(path: &Path, content: &[u8]) -> WorkflowResult<()> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content).map_err(|e| io_err("write", &tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| io_err("rename", path, e))
}

#[async_trait]
impl<T: Entity> EntityStore<T> for FileStore<T> {
    async fn get(&self, id: &T::Id) -> WorkflowResult<Option<T>> {
        let _lock = self.lock(false)?;
        self.read_entity(&self.path_for(id))
    }

    async fn list(&self) -> WorkflowResult<Vec<T>> {
        let _lock = self.lock(false)?;
        self.read_documents()?
            .into_iter()
            .map(|(name, bytes)| {
                serde_json::from_slice(&bytes).map_err(|e| io_err("decode", &self.dir.join(name), e))
            })
            .collect()
    }

    async fn save(&self, entity: &mut T) -> WorkflowResult<()> {
        let _lock = self.lock(true)?;
        let id = entity.entity_id();
        let path = self.path_for(&id);

        // Check for concurrent writes (optimistic concurrency)
        let stored = self.read_entity(&path)?;
        let next = check_version(stored.as_ref(), entity)?;

        let mut record = entity.clone();
        record.set_version(next);
        let content = serde_json::to_vec_pretty(&record).map_err(|e| io_err("encode", &path, e))?;
        write_atomic(&path, &content)?;
        self.undo.record(&id, stored.as_ref(), Some(next))?;
        entity.set_version(next);
        debug!(kind = T::KIND, id = %id, version = next, "saved");
        Ok(())
    }

    async fn remove(&self, id: &T::Id) -> WorkflowResult<bool> {
        let _lock = self.lock(true)?;
        let path = self.path_for(id);
        let Some(existing) = self.read_entity(&path)? else {
            return Ok(false);
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {
                self.undo.record(id, Some(&existing), None)?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err("remove", &path, e)),
        }
    }
}

#[async_trait]
impl<T: Entity> Snapshotable for FileStore<T> {
    fn name(&self) -> &'static str {
        T::KIND
    }

    async fn commit_unit(&self, unit: UnitId) -> WorkflowResult<()> {
        self.undo.take(unit)?;
        Ok(())
    }

    async fn rollback_unit(&self, unit: UnitId) -> WorkflowResult<()> {
        let _lock = self.lock(true)?;
        for (id, pre) in self.undo.take(unit)? {
            let path = self.path_for(&id);
            let current = self.read_entity(&path)?.map(|e| e.version());
            if current != pre.written {
                warn!(kind = T::KIND, id = %id, "written outside the unit of work, not restored");
                continue;
            }
            match pre.before {
                Some(before) => {
                    let content =
                        serde_json::to_vec_pretty(&before).map_err(|e| io_err("encode", &path, e))?;
                    write_atomic(&path, &content)?;
                }
                None => match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(io_err("remove", &path, e)),
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/file_store_tests.rs"]
mod tests;
