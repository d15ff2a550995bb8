//! Directory-backed object store.
//!
//! ```text
//! <root>/
//!   states/<state_id>.json     content-addressed state blobs
//!   commits/<commit_id>.json   content-addressed commit records
//!   refs.json                  ref table
//!   snapshots.json             snapshot pin table
//!   tables.lock                guards rewrites of the two tables
//! ```
//!
//! Objects are written to a temporary file in the target directory and
//! renamed into place, so a reader never observes a half-written object.
//! The two tables are rewritten whole while holding an exclusive file lock,
//! which arbitrates between processes; the in-process mutex does the same
//! between threads sharing one handle.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::storage::backend::{check_expected, check_insertable, ObjectStore};
use crate::storage::commit::Commit;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::state::State;
use crate::storage::types::{CommitId, Ref, RefName, StateId};

const STATES_DIR: &str = "states";
const COMMITS_DIR: &str = "commits";
const REFS_FILE: &str = "refs.json";
const PINS_FILE: &str = "snapshots.json";
const LOCK_FILE: &str = "tables.lock";

type RefTable = BTreeMap<RefName, Ref>;
type PinTable = BTreeMap<CommitId, StateId>;

/// Object store persisted in a directory.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Debug, Clone)]
pub struct FileStore {
    inner: Arc<FileStoreInner>,
}

#[derive(Debug)]
struct FileStoreInner {
    root: PathBuf,
    table_lock: Mutex<()>,
}

impl FileStore {
    /// Open an existing store.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.join(STATES_DIR).is_dir() || !root.join(COMMITS_DIR).is_dir() {
            return Err(StorageError::NotInitialized(root));
        }
        Ok(Self::with_root(root))
    }

    /// Create the directory layout (idempotent) and open the store.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(root.join(STATES_DIR))?;
        fs::create_dir_all(root.join(COMMITS_DIR))?;
        debug!(path = %root.display(), "initialized file store");
        Ok(Self::with_root(root))
    }

    /// Check whether a directory holds a store.
    pub fn exists(path: impl AsRef<Path>) -> bool {
        let root = path.as_ref();
        root.join(STATES_DIR).is_dir() && root.join(COMMITS_DIR).is_dir()
    }

    fn with_root(root: PathBuf) -> Self {
        Self {
            inner: Arc::new(FileStoreInner {
                root,
                table_lock: Mutex::new(()),
            }),
        }
    }

    /// Get the store's root directory.
    pub fn path(&self) -> &Path {
        &self.inner.root
    }

    fn state_path(&self, id: &StateId) -> PathBuf {
        self.inner.root.join(STATES_DIR).join(format!("{}.json", id))
    }

    fn commit_path(&self, id: &CommitId) -> PathBuf {
        self.inner.root.join(COMMITS_DIR).join(format!("{}.json", id))
    }

    // ==================== Object Files ====================

    /// write an object once; returns false if it was already present
    fn write_object<T: Serialize>(&self, dir: &str, path: &Path, value: &T) -> StorageResult<bool> {
        if path.exists() {
            return Ok(false);
        }
        write_atomic(&self.inner.root.join(dir), path, value)?;
        Ok(true)
    }

    fn read_object<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_ids(&self, dir: &str) -> StorageResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.inner.root.join(dir))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    // ==================== Tables ====================

    fn read_table<T: DeserializeOwned + Default>(&self, file: &str) -> StorageResult<T> {
        Ok(Self::read_object(&self.inner.root.join(file))?.unwrap_or_default())
    }

    /// read-modify-write a table under both locks
    ///
    /// the table is only rewritten when `f` succeeds
    fn update_table<T, R, F>(&self, file: &str, f: F) -> StorageResult<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> StorageResult<R>,
    {
        let _guard = self.inner.table_lock.lock();
        let lock_file = self.open_lock_file()?;
        lock_file.lock_exclusive()?;

        let result = (|| -> StorageResult<R> {
            let mut table: T = self.read_table(file)?;
            let out = f(&mut table)?;
            write_atomic(&self.inner.root, &self.inner.root.join(file), &table)?;
            Ok(out)
        })();

        lock_file.unlock()?;
        result
    }

    fn open_lock_file(&self) -> StorageResult<File> {
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.inner.root.join(LOCK_FILE))?)
    }

    fn require_commit(&self, id: &CommitId) -> StorageResult<()> {
        if !self.has_commit(id)? {
            return Err(StorageError::CommitNotFound(id.to_string()));
        }
        Ok(())
    }
}

/// serialize into a temp file in `dir`, then rename over `path`
fn write_atomic<T: Serialize>(dir: &Path, path: &Path, value: &T) -> StorageResult<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl ObjectStore for FileStore {
    fn has_state(&self, id: &StateId) -> StorageResult<bool> {
        Ok(self.state_path(id).exists())
    }

    fn get_state(&self, id: &StateId) -> StorageResult<State> {
        let state: State = Self::read_object(&self.state_path(id))?
            .ok_or_else(|| StorageError::StateNotFound(id.clone()))?;
        let actual = state.id();
        if &actual != id {
            return Err(StorageError::CorruptedObject {
                id: id.to_string(),
                reason: format!("content hashes to {}", actual),
            });
        }
        Ok(state)
    }

    fn put_state(&self, state: &State) -> StorageResult<StateId> {
        let id = state.id();
        if self.write_object(STATES_DIR, &self.state_path(&id), state)? {
            debug!(state = %id.short(), "stored state blob");
        }
        Ok(id)
    }

    fn delete_state(&self, id: &StateId) -> StorageResult<bool> {
        match fs::remove_file(self.state_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_state_ids(&self) -> StorageResult<Vec<StateId>> {
        Ok(self
            .list_ids(STATES_DIR)?
            .iter()
            .filter_map(|s| StateId::from_hex(s).ok())
            .collect())
    }

    fn has_commit(&self, id: &CommitId) -> StorageResult<bool> {
        Ok(self.commit_path(id).exists())
    }

    fn get_commit(&self, id: &CommitId) -> StorageResult<Commit> {
        let commit: Commit = Self::read_object(&self.commit_path(id))?
            .ok_or_else(|| StorageError::CommitNotFound(id.to_string()))?;
        if &commit.id != id {
            return Err(StorageError::CorruptedObject {
                id: id.to_string(),
                reason: format!("file holds commit {}", commit.id),
            });
        }
        commit.verify()?;
        Ok(commit)
    }

    fn put_commit(&self, commit: &Commit) -> StorageResult<bool> {
        if self.has_commit(&commit.id)? {
            return Ok(false);
        }
        check_insertable(self, commit)?;
        let stored = self.write_object(COMMITS_DIR, &self.commit_path(&commit.id), commit)?;
        if stored {
            debug!(commit = %commit.id.short(), event = %commit.event_name, "stored commit");
        }
        Ok(stored)
    }

    fn list_commit_ids(&self) -> StorageResult<Vec<CommitId>> {
        Ok(self
            .list_ids(COMMITS_DIR)?
            .iter()
            .filter_map(|s| CommitId::from_hex(s).ok())
            .collect())
    }

    fn find_ref(&self, name: &RefName) -> StorageResult<Option<Ref>> {
        let mut refs: RefTable = self.read_table(REFS_FILE)?;
        Ok(refs.remove(name))
    }

    fn list_refs(&self) -> StorageResult<Vec<Ref>> {
        let refs: RefTable = self.read_table(REFS_FILE)?;
        Ok(refs.into_values().collect())
    }

    fn upsert_ref(&self, r: &Ref) -> StorageResult<()> {
        self.require_commit(&r.commit_id)?;
        self.update_table(REFS_FILE, |refs: &mut RefTable| {
            refs.insert(r.name.clone(), r.clone());
            Ok(())
        })
    }

    fn compare_and_swap_ref(&self, expected: Option<&CommitId>, new: &Ref) -> StorageResult<()> {
        self.require_commit(&new.commit_id)?;
        self.update_table(REFS_FILE, |refs: &mut RefTable| {
            check_expected(&new.name, expected, refs.get(&new.name))?;
            refs.insert(new.name.clone(), new.clone());
            Ok(())
        })
    }

    fn delete_ref(&self, name: &RefName) -> StorageResult<bool> {
        self.update_table(REFS_FILE, |refs: &mut RefTable| Ok(refs.remove(name).is_some()))
    }

    fn pin_snapshot(&self, commit: &CommitId, state: &StateId) -> StorageResult<()> {
        self.require_commit(commit)?;
        if !self.has_state(state)? {
            return Err(StorageError::StateNotFound(state.clone()));
        }
        self.update_table(PINS_FILE, |pins: &mut PinTable| {
            pins.insert(commit.clone(), state.clone());
            Ok(())
        })
    }

    fn pinned_snapshot(&self, commit: &CommitId) -> StorageResult<Option<StateId>> {
        let mut pins: PinTable = self.read_table(PINS_FILE)?;
        Ok(pins.remove(commit))
    }

    fn unpin_snapshot(&self, commit: &CommitId) -> StorageResult<bool> {
        self.update_table(PINS_FILE, |pins: &mut PinTable| Ok(pins.remove(commit).is_some()))
    }

    fn list_pins(&self) -> StorageResult<Vec<(CommitId, StateId)>> {
        let pins: PinTable = self.read_table(PINS_FILE)?;
        Ok(pins.into_iter().collect())
    }
}
