// Cross-process writer lease for one project store


use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::CodeRagError;

pub const LEASE_FILE_NAME: &str = "writer.lock";
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// A lease whose heartbeat is older than this is considered abandoned
pub const STALE_AFTER: Duration = Duration::from_secs(120);
const BREAK_FILE_NAME: &str = "writer.lock.break";
/// A break lock this old belongs to a breaker that died mid-way
const BREAK_STALE_AFTER: Duration = Duration::from_secs(10);

/// Contents of `writer.lock`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub pid: u32,
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat: DateTime<Utc>,
}

impl LeaseInfo {
    fn fresh(token: String) -> Self {
        let now = Utc::now();
        Self {
            pid: std::process::id(),
            token,
            acquired_at: now,
            heartbeat: now,
        }
    }

    /// Whether the holder has stopped heartbeating or is gone
    #[inline]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let age = now
            .signed_duration_since(self.heartbeat)
            .num_seconds()
            .max(0)
            .unsigned_abs();
        age > STALE_AFTER.as_secs() || !pid_alive(self.pid)
    }
}

/// Exclusive right to write one store, held for as long as the value lives
#[derive(Debug)]
pub struct WriterLease {
    path: PathBuf,
    token: String,
    heartbeat_handle: JoinHandle<()>,
}

impl WriterLease {
    /// Take the lease for the store in `store_dir`
    ///
    /// # Returns
    /// The lease, or `ResourceBusy` naming the holder when another live
    /// writer owns it. Stale leases are broken, one breaker at a time.
    #[inline]
    pub async fn acquire(store_dir: &Path) -> Result<Self, CodeRagError> {
        let path = store_dir.join(LEASE_FILE_NAME);
        let token = Uuid::new_v4().to_string();

        if try_create(&path, &token).await? {
            return Ok(Self::started(path, token));
        }

        let busy = |holder_pid: u32| CodeRagError::ResourceBusy {
            store: store_dir.to_path_buf(),
            holder_pid,
        };

        match read_lease(&path).await {
            Some(holder) if !holder.is_stale(Utc::now()) => return Err(busy(holder.pid)),
            _ => {}
        }

        // Only the holder of the break lock may delete a lease file
        let Some(_guard) = BreakGuard::take(&path, &token).await? else {
            return Err(busy(0));
        };

        match read_lease(&path).await {
            Some(holder) if !holder.is_stale(Utc::now()) => return Err(busy(holder.pid)),
            Some(holder) => info!(
                "Breaking stale writer lease held by pid {} (last heartbeat {})",
                holder.pid, holder.heartbeat
            ),
            None if path.exists() => warn!("Breaking unreadable writer lease {}", path.display()),
            None => {}
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CodeRagError::Database(format!(
                    "Failed to remove stale writer lease {}: {}",
                    path.display(),
                    e
                )));
            }
        }

        if try_create(&path, &token).await? {
            return Ok(Self::started(path, token));
        }

        // a plain acquire took it between our delete and create
        let holder_pid = read_lease(&path).await.map_or(0, |holder| holder.pid);
        Err(busy(holder_pid))
    }

    fn started(path: PathBuf, token: String) -> Self {
        debug!("Acquired writer lease {}", path.display());
        let heartbeat_handle = start_heartbeat_task(path.clone(), token.clone());
        Self {
            path,
            token,
            heartbeat_handle,
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Current holder recorded in `store_dir`, if any
    #[inline]
    pub async fn holder(store_dir: &Path) -> Option<LeaseInfo> {
        read_lease(&store_dir.join(LEASE_FILE_NAME)).await
    }
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        self.heartbeat_handle.abort();

        let ours = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| serde_json::from_str::<LeaseInfo>(&content).ok())
            .is_some_and(|info| info.token == self.token);

        if ours {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to release writer lease {}: {}", self.path.display(), e);
            } else {
                debug!("Released writer lease {}", self.path.display());
            }
        } else {
            warn!(
                "Writer lease {} was taken over; leaving it in place",
                self.path.display()
            );
        }
    }
}

/// Serialized break lock next to the lease, removed on drop
struct BreakGuard {
    path: PathBuf,
}

impl BreakGuard {
    /// Take the break lock, clearing one left behind by a dead breaker
    async fn take(lease_path: &Path, token: &str) -> Result<Option<Self>, CodeRagError> {
        let path = lease_path.with_file_name(BREAK_FILE_NAME);

        for _ in 0..2 {
            let info = LeaseInfo::fresh(token.to_string());
            match create_exclusive(&path, &info).await {
                Ok(()) => return Ok(Some(Self { path })),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(CodeRagError::Database(format!(
                        "Failed to create {}: {}",
                        path.display(),
                        e
                    )));
                }
            }

            let seen = read_lease(&path).await;
            let abandoned = seen.as_ref().is_none_or(|breaker| {
                let age = Utc::now()
                    .signed_duration_since(breaker.acquired_at)
                    .num_seconds()
                    .max(0)
                    .unsigned_abs();
                age > BREAK_STALE_AFTER.as_secs() || !pid_alive(breaker.pid)
            });
            if !abandoned {
                return Ok(None);
            }
            warn!("Clearing abandoned break lock {}", path.display());
            if !clear_abandoned(&path, token, seen.map(|breaker| breaker.token)).await {
                return Ok(None);
            }
        }
        Ok(None)
    }
}

impl Drop for BreakGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove break lock {}: {}", self.path.display(), e);
        }
    }
}

/// Move an abandoned break lock aside and confirm it was the one we judged
///
/// If a live breaker replaced it in the meantime, its file is linked back
/// and false is returned.
async fn clear_abandoned(path: &Path, token: &str, expected: Option<String>) -> bool {
    let tombstone = path.with_file_name(format!("{}.{}.dead", BREAK_FILE_NAME, token));
    match tokio::fs::rename(path, &tombstone).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return true,
        Err(e) => {
            warn!("Failed to move break lock {}: {}", path.display(), e);
            return false;
        }
    }

    let moved = read_lease(&tombstone).await.map(|breaker| breaker.token);
    let same = moved == expected;
    if !same {
        if let Err(e) = tokio::fs::hard_link(&tombstone, path).await {
            debug!("Could not restore break lock {}: {}", path.display(), e);
        }
    }
    if let Err(e) = tokio::fs::remove_file(&tombstone).await {
        debug!("Failed to remove {}: {}", tombstone.display(), e);
    }
    same
}

/// Create the lease file with our token; false when one already exists
async fn try_create(path: &Path, token: &str) -> Result<bool, CodeRagError> {
    match create_exclusive(path, &LeaseInfo::fresh(token.to_string())).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(CodeRagError::Database(format!(
            "Failed to create writer lease {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Write `info` to a private temp file and hard-link it into place
///
/// Readers never observe a half-written file, and the link fails with
/// `AlreadyExists` when `path` is taken.
async fn create_exclusive(path: &Path, info: &LeaseInfo) -> std::io::Result<()> {
    let content = serde_json::to_vec(info).map_err(std::io::Error::other)?;
    let file_name = path
        .file_name()
        .map_or_else(|| "lease".into(), |name| name.to_string_lossy());
    let temp = path.with_file_name(format!("{}.{}.tmp", file_name, info.token));

    let mut file = tokio::fs::File::create(&temp).await?;
    file.write_all(&content).await?;
    file.sync_all().await?;
    drop(file);

    let linked = tokio::fs::hard_link(&temp, path).await;
    if let Err(e) = tokio::fs::remove_file(&temp).await {
        debug!("Failed to remove {}: {}", temp.display(), e);
    }
    linked
}

async fn read_lease(path: &Path) -> Option<LeaseInfo> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&content).ok()
}

/// Rewrite the heartbeat while the file still carries our token
async fn refresh_heartbeat(path: &Path, token: &str) -> anyhow::Result<bool> {
    use anyhow::Context;

    let Some(mut info) = read_lease(path).await else {
        return Ok(false);
    };
    if info.token != token {
        return Ok(false);
    }
    info.heartbeat = Utc::now();

    let temp = path.with_extension("lock.tmp");
    tokio::fs::write(&temp, serde_json::to_vec(&info)?)
        .await
        .context("Failed to write lease heartbeat")?;
    tokio::fs::rename(&temp, path)
        .await
        .context("Failed to replace lease file")?;
    Ok(true)
}

fn start_heartbeat_task(path: PathBuf, token: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(HEARTBEAT_INTERVAL).await;
            match refresh_heartbeat(&path, &token).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Writer lease {} is no longer ours", path.display());
                    break;
                }
                Err(e) => error!("Failed to update writer lease heartbeat: {:#}", e),
            }
        }
    })
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// without /proc the heartbeat age is the only signal
#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    true
}
