//! Cluster snapshot persistence
//!
//! One `<cluster>.json` per cluster holds the last converged [`Cluster`].
//! A snapshot is only ever replaced as a whole, never patched, and a run
//! that did not fully succeed never touches it.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clusterflow_core::Cluster;
use clusterflow_core::naming::sanitize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_EXT: &str = "json";
const BACKUP_EXT: &str = "json.backup";
const TEMP_EXT: &str = "json.tmp";
const LOCK_EXT: &str = "lock";

/// Locks older than this are considered abandoned
const STALE_LOCK_HOURS: i64 = 1;

/// Last converged state of one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Snapshot format version
    pub version: u32,

    pub updated_at: DateTime<Utc>,

    pub cluster: Cluster,
}

impl StateSnapshot {
    pub fn new(cluster: Cluster) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            updated_at: Utc::now(),
            cluster,
        }
    }
}

/// Snapshot persistence keyed by cluster name
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Last converged snapshot, `None` if the cluster was never created
    async fn get(&self, cluster: &str) -> Result<Option<StateSnapshot>>;

    /// Atomically replace the snapshot
    async fn put(&self, snapshot: &StateSnapshot) -> Result<()>;

    /// Take the single-writer lock for a cluster
    async fn lock(&self, cluster: &str) -> Result<StateLock>;

    /// Forget a cluster after teardown
    async fn delete(&self, cluster: &str) -> Result<()>;
}

/// Snapshots stored as JSON files in one directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Move the stale lock whose content was `observed` out of the way.
    ///
    /// The file is renamed to a private path first, so of several
    /// processes reclaiming at once only one removes it. If what was moved
    /// is no longer the observed lock, another process has already
    /// reclaimed it and its fresh lock is put back.
    async fn reclaim(
        &self,
        cluster: &str,
        lock_path: &Path,
        observed: &str,
        token: &str,
    ) -> Result<()> {
        let moved = self
            .dir
            .join(format!("{}.{LOCK_EXT}.{token}.stale", sanitize(cluster)));
        match fs::rename(lock_path, &moved).await {
            Ok(()) => {}
            // someone else moved it; the create that follows decides
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let content = fs::read_to_string(&moved).await.unwrap_or_default();
        if content != observed {
            if let Err(e) = fs::hard_link(&moved, lock_path).await {
                tracing::warn!(cluster, error = %e, "Could not restore a lock taken during reclaim");
            }
            fs::remove_file(&moved).await?;
            return Err(CloudError::LockError(format!(
                "Cluster '{cluster}' was locked by another process while reclaiming a stale lock"
            )));
        }
        fs::remove_file(&moved).await?;
        Ok(())
    }

    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, cluster: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", sanitize(cluster), ext))
    }

    /// Path of a cluster's snapshot file
    pub fn snapshot_path(&self, cluster: &str) -> PathBuf {
        self.path(cluster, SNAPSHOT_EXT)
    }

    fn backup_path(&self, cluster: &str) -> PathBuf {
        self.path(cluster, BACKUP_EXT)
    }

    fn lock_path(&self, cluster: &str) -> PathBuf {
        self.path(cluster, LOCK_EXT)
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
            tracing::debug!("Created state directory: {}", self.dir.display());
        }
        Ok(())
    }

    async fn try_create_lock(&self, path: &Path, token: &str) -> std::io::Result<()> {
        let info = LockInfo {
            holder: hostname(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
            token: token.to_string(),
        };
        let content = serde_json::to_vec_pretty(&info).map_err(std::io::Error::other)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(&content).await?;
        file.flush().await
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, cluster: &str) -> Result<Option<StateSnapshot>> {
        let path = self.snapshot_path(cluster);
        if !path.exists() {
            tracing::debug!(cluster, "No snapshot found");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let snapshot: StateSnapshot = serde_json::from_str(&content)?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(CloudError::StateError(format!(
                "Snapshot version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        tracing::debug!(
            cluster,
            resources = snapshot.cluster.resources.len(),
            "Loaded snapshot"
        );
        Ok(Some(snapshot))
    }

    async fn put(&self, snapshot: &StateSnapshot) -> Result<()> {
        self.ensure_dir().await?;

        let name = &snapshot.cluster.name;
        let path = self.snapshot_path(name);
        let temp = self.path(name, TEMP_EXT);

        let content = serde_json::to_string_pretty(snapshot)?;
        fs::write(&temp, content).await?;

        if path.exists() {
            fs::copy(&path, self.backup_path(name)).await?;
            tracing::debug!(cluster = %name, "Created snapshot backup");
        }

        // rename is atomic on the same filesystem
        fs::rename(&temp, &path).await?;

        tracing::debug!(
            cluster = %name,
            resources = snapshot.cluster.resources.len(),
            "Saved snapshot"
        );
        Ok(())
    }

    async fn lock(&self, cluster: &str) -> Result<StateLock> {
        self.ensure_dir().await?;
        let lock_path = self.lock_path(cluster);
        let token = Uuid::new_v4().to_string();

        match self.try_create_lock(&lock_path, &token).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let observed = match fs::read_to_string(&lock_path).await {
                    Ok(content) => content,
                    // released between the two calls
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                    Err(e) => return Err(e.into()),
                };
                if !observed.is_empty() {
                    match serde_json::from_str::<LockInfo>(&observed) {
                        Ok(info) => {
                            let age = Utc::now().signed_duration_since(info.acquired_at);
                            if age.num_hours() < STALE_LOCK_HOURS {
                                return Err(CloudError::LockError(format!(
                                    "Cluster '{}' is locked by {} (pid {}) since {}",
                                    cluster, info.holder, info.pid, info.acquired_at
                                )));
                            }
                            tracing::warn!(cluster, holder = %info.holder, "Reclaiming stale lock");
                        }
                        Err(_) => tracing::warn!(cluster, "Reclaiming unreadable lock file"),
                    }
                    self.reclaim(cluster, &lock_path, &observed, &token).await?;
                }
                self.try_create_lock(&lock_path, &token).await.map_err(|e| {
                    CloudError::LockError(format!("Failed to lock cluster '{cluster}': {e}"))
                })?;
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(cluster, "Acquired state lock");
        Ok(StateLock {
            lock_path,
            token,
            released: false,
        })
    }

    async fn delete(&self, cluster: &str) -> Result<()> {
        for path in [self.snapshot_path(cluster), self.backup_path(cluster)] {
            if path.exists() {
                fs::remove_file(&path).await?;
            }
        }
        tracing::debug!(cluster, "Deleted snapshot");
        Ok(())
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
    /// Identifies the guard that wrote the file
    #[serde(default)]
    token: String,
}

/// RAII guard for a cluster lock
///
/// Only removes the lock file while it still carries this guard's token,
/// so a guard whose lock was reclaimed as stale never deletes the new
/// holder's lock.
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    token: String,
    released: bool,
}

impl StateLock {
    fn owns(&self, content: &str) -> bool {
        serde_json::from_str::<LockInfo>(content).is_ok_and(|info| info.token == self.token)
    }

    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            match fs::read_to_string(&self.lock_path).await {
                Ok(content) if self.owns(&content) => {
                    fs::remove_file(&self.lock_path).await?;
                    tracing::debug!("Released state lock");
                }
                Ok(_) => tracing::warn!(
                    path = %self.lock_path.display(),
                    "State lock was taken over; leaving it in place"
                ),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let owned = std::fs::read_to_string(&self.lock_path).is_ok_and(|c| self.owns(&c));
        if owned {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
