//! Filesystem Registry
//!
//! Per-node map of filesystem name to descriptor plus live block store.
//!
//! ## Lifecycle
//! - **CREATE** is idempotent: an existing name is left untouched.
//! - **DELETE** drops the store, removes its directory tree, and erases
//!   the entry.
//! - Every mutation rewrites a full-map JSON snapshot, written to a temp
//!   file and renamed into place. The write is best-effort: a failure is
//!   logged and the in-memory map stays authoritative until the next
//!   successful snapshot.
//!
//! All mutations run on the node's event loop, which is what serializes
//! concurrent CREATE/DELETE traffic within one process. Across processes
//! the snapshot file itself is the shared state: reads and rewrites hold
//! an exclusive sidecar lock so a node starting up from the same root
//! never observes a half-written map.

pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

use self::store::BlockStore;
use self::types::FilesystemConfig;
use crate::error::{NodeError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SNAPSHOT_FILE: &str = "filesystems.json";
const SNAPSHOT_LOCK_FILE: &str = "filesystems.lock";

const LOCK_ATTEMPTS: u32 = 60;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Exclusive lock on the descriptor snapshot, taken as a sidecar file
/// created with `create_new` and removed on drop. Serializes a running
/// node's snapshot writes with another process restoring from the same
/// root. A lock left behind by a crashed process is broken after a
/// bounded wait.
struct SnapshotLock {
    path: PathBuf,
}

impl SnapshotLock {
    fn acquire(root: &Path) -> Result<SnapshotLock> {
        let path = root.join(SNAPSHOT_LOCK_FILE);
        for _ in 0..LOCK_ATTEMPTS {
            match Self::try_create(&path) {
                Ok(lock) => return Ok(lock),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::warn!("breaking stale snapshot lock {}", path.display());
        let _ = fs::remove_file(&path);
        Self::try_create(&path).map_err(Into::into)
    }

    fn try_create(path: &Path) -> std::io::Result<SnapshotLock> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let _ = write!(file, "{}", std::process::id());
        Ok(SnapshotLock {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub struct FilesystemRegistry {
    root: PathBuf,
    snapshot_path: PathBuf,
    map: HashMap<String, BlockStore>,
}

impl FilesystemRegistry {
    /// Load the registry from the node root, restoring every filesystem
    /// named in the snapshot. A filesystem that fails to restore is logged
    /// and skipped; the rest come up.
    pub fn restore(root: &Path) -> Result<FilesystemRegistry> {
        fs::create_dir_all(root)?;
        let snapshot_path = root.join(SNAPSHOT_FILE);
        let mut map = HashMap::new();
        if snapshot_path.exists() {
            let text = {
                let _lock = SnapshotLock::acquire(root)?;
                fs::read_to_string(&snapshot_path)?
            };
            if !text.trim().is_empty() {
                let configs: BTreeMap<String, FilesystemConfig> = serde_json::from_str(&text)
                    .map_err(|e| NodeError::Serialization(e.to_string()))?;
                for (name, config) in configs {
                    match BlockStore::open(root, config) {
                        Ok(store) => {
                            tracing::info!("restored filesystem {}", name);
                            map.insert(name, store);
                        }
                        Err(e) => {
                            tracing::error!("could not restore filesystem {}: {}", name, e);
                        }
                    }
                }
            }
        }
        Ok(FilesystemRegistry {
            root: root.to_path_buf(),
            snapshot_path,
            map,
        })
    }

    pub fn create(&mut self, config: FilesystemConfig) -> Result<()> {
        if self.map.contains_key(&config.name) {
            tracing::debug!("filesystem {} already present, ignoring create", config.name);
            return Ok(());
        }
        let name = config.name.clone();
        let store = BlockStore::create(&self.root, config)?;
        self.map.insert(name.clone(), store);
        tracing::info!("created filesystem {}", name);
        self.snapshot();
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        if self.map.remove(name).is_some() {
            let dir = self.root.join(name);
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
            tracing::info!("deleted filesystem {}", name);
        }
        self.snapshot();
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&BlockStore> {
        self.map.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BlockStore> {
        self.map.get_mut(name)
    }

    pub fn configs(&self) -> Vec<FilesystemConfig> {
        let mut configs: Vec<FilesystemConfig> =
            self.map.values().map(|s| s.config().clone()).collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }

    pub fn stores(&self) -> impl Iterator<Item = &BlockStore> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Write the full descriptor map under the snapshot lock. Failures
    /// leave the previous snapshot in place and are only logged.
    pub fn snapshot(&self) {
        let configs: BTreeMap<&str, &FilesystemConfig> = self
            .map
            .iter()
            .map(|(name, store)| (name.as_str(), store.config()))
            .collect();
        let written = SnapshotLock::acquire(&self.root)
            .and_then(|_lock| self.write_snapshot(&configs));
        if let Err(e) = written {
            tracing::error!("failed to snapshot filesystem registry: {}", e);
        }
    }

    fn write_snapshot(&self, configs: &BTreeMap<&str, &FilesystemConfig>) -> Result<()> {
        let text = serde_json::to_string_pretty(configs)
            .map_err(|e| NodeError::Serialization(e.to_string()))?;
        let tmp = self.snapshot_path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.snapshot_path)?;
        Ok(())
    }
}
