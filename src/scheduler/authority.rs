//! Named exclusive locks.
//!
//! A [`NamedLock`] guards one critical section system-wide: an in-process
//! mutex serialises tasks inside this process and an exclusive lock file
//! (created with `create_new`) serialises separate processes, such as the
//! daemon and a pre-suspend hook invocation.

use crate::error::{Result, UpkeepError};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// How often a waiting acquirer re-checks a contended lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A lock file whose content cannot be parsed is only evicted once it is at
/// least this old, so a writer caught between create and write keeps it.
const MALFORMED_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    owner: String,
    pid: u32,
    acquired_at_ms: u64,
}

/// Holds an exclusive lock file. The file is removed on drop if it still
/// carries this guard's owner token.
#[derive(Debug)]
pub struct LockFileGuard {
    path: PathBuf,
    owner: String,
}

impl Drop for LockFileGuard {
    fn drop(&mut self) {
        let still_ours = read_lock_record(&self.path)
            .map(|record| record.owner == self.owner)
            .unwrap_or(false);
        if still_ours {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Try once to create the lock file at `path`.
///
/// Returns `Ok(None)` when a live holder owns it. A stale file (dead pid, or
/// older than `stale_after`) is evicted and creation retried once.
pub fn try_lock_file(path: &Path, stale_after: Duration) -> Result<Option<LockFileGuard>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            UpkeepError::Lock(format!(
                "cannot create lock directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    for _ in 0..2 {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let record = LockRecord {
                    owner: uuid::Uuid::new_v4().to_string(),
                    pid: std::process::id(),
                    acquired_at_ms: now_epoch_millis(),
                };
                let json = serde_json::to_vec(&record)
                    .map_err(|e| UpkeepError::Lock(format!("cannot encode lock record: {e}")))?;
                let guard = LockFileGuard {
                    path: path.to_path_buf(),
                    owner: record.owner,
                };
                file.write_all(&json).map_err(|e| {
                    UpkeepError::Lock(format!("cannot write lock {}: {e}", path.display()))
                })?;
                return Ok(Some(guard));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !evict_if_stale(path, stale_after) {
                    return Ok(None);
                }
            }
            Err(e) => {
                return Err(UpkeepError::Lock(format!(
                    "cannot create lock {}: {e}",
                    path.display()
                )));
            }
        }
    }

    Ok(None)
}

/// Block the current thread until the lock file at `path` is acquired.
pub fn acquire_lock_file(
    path: &Path,
    timeout: Duration,
    stale_after: Duration,
) -> Result<LockFileGuard> {
    let started = std::time::Instant::now();
    loop {
        if let Some(guard) = try_lock_file(path, stale_after)? {
            return Ok(guard);
        }
        if started.elapsed() > timeout {
            return Err(UpkeepError::Lock(format!(
                "timed out waiting for lock {}",
                path.display()
            )));
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn read_lock_record(path: &Path) -> Option<LockRecord> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn evict_if_stale(path: &Path, stale_after: Duration) -> bool {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => return e.kind() == std::io::ErrorKind::NotFound,
    };
    let stale = match serde_json::from_slice::<LockRecord>(&bytes) {
        Ok(record) => {
            let age_ms = now_epoch_millis().saturating_sub(record.acquired_at_ms);
            if !process_alive(record.pid) {
                warn!(pid = record.pid, "evicting lock {} held by dead process", path.display());
                true
            } else if u128::from(age_ms) > stale_after.as_millis() {
                warn!(age_ms, "evicting expired lock {}", path.display());
                true
            } else {
                false
            }
        }
        Err(_) => file_age(path).is_some_and(|age| age > MALFORMED_GRACE),
    };

    stale && retire(path, &bytes)
}

/// Move the lock file aside and delete it, provided it still holds
/// `judged_stale`. If another acquirer already replaced it, its lock is put
/// back and `false` returned.
fn retire(path: &Path, judged_stale: &[u8]) -> bool {
    let tombstone = path.with_extension(format!("stale-{}", uuid::Uuid::new_v4()));
    if std::fs::rename(path, &tombstone).is_err() {
        return false;
    }
    let unchanged = std::fs::read(&tombstone).is_ok_and(|bytes| bytes == judged_stale);
    if !unchanged {
        debug!("lock {} was re-acquired before eviction", path.display());
        if let Err(e) = std::fs::hard_link(&tombstone, path) {
            warn!("cannot restore lock {}: {e}", path.display());
        }
    }
    let _ = std::fs::remove_file(&tombstone);
    unchanged
}

fn file_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    std::time::SystemTime::now().duration_since(modified).ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Current epoch time in milliseconds.
#[must_use]
pub fn now_epoch_millis() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}

/// A named, system-wide exclusive lock.
///
/// Clones share the in-process mutex.
#[derive(Debug, Clone)]
pub struct NamedLock {
    name: String,
    path: Option<PathBuf>,
    local: Arc<Mutex<()>>,
    stale_after: Duration,
}

/// Proof of holding a [`NamedLock`]. Released on drop.
#[derive(Debug)]
pub struct NamedLockGuard {
    name: String,
    _file: Option<LockFileGuard>,
    _local: OwnedMutexGuard<()>,
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        debug!(lock = %self.name, "released");
    }
}

impl NamedLock {
    /// A lock backed by `<dir>/<name>.lock` in addition to the in-process mutex.
    pub fn new(name: impl Into<String>, dir: &Path, stale_after: Duration) -> Self {
        let name = name.into();
        let path = dir.join(format!("{name}.lock"));
        Self {
            name,
            path: Some(path),
            local: Arc::new(Mutex::new(())),
            stale_after,
        }
    }

    /// A lock that only excludes tasks within this process.
    pub fn in_process(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            local: Arc::new(Mutex::new(())),
            stale_after: Duration::MAX,
        }
    }

    /// Try to take the lock without waiting.
    pub fn try_acquire(&self) -> Result<Option<NamedLockGuard>> {
        let Ok(local) = Arc::clone(&self.local).try_lock_owned() else {
            return Ok(None);
        };

        let file = match &self.path {
            Some(path) => match try_lock_file(path, self.stale_after)? {
                Some(guard) => Some(guard),
                None => return Ok(None),
            },
            None => None,
        };

        debug!(lock = %self.name, "acquired");
        Ok(Some(NamedLockGuard {
            name: self.name.clone(),
            _file: file,
            _local: local,
        }))
    }

    /// Wait up to `timeout` for the lock. `Ok(None)` means the wait timed out.
    pub async fn acquire_within(&self, timeout: Duration) -> Result<Option<NamedLockGuard>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(Some(guard));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
