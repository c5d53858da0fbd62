//! Install lock management
//!
//! Provides machine-wide exclusive locking so only one readiness run installs
//! at a time. The lock file records the owner's pid and acquisition time.
//!
//! Exclusion comes from the OS advisory lock alone. The kernel drops it when
//! the owner exits, so a record left behind by a dead owner never blocks: the
//! next process locks the same file and rewrites the record. Only the holder
//! ever unlinks the path.

use crate::core::error::{InstallError, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Age past which a dead owner's leftover record is reported as stale (24 hours)
const STALE_LOCK_AGE_SECS: u64 = 86400;

/// Attempts to re-open the lock path after losing a race with a releasing owner
const ACQUIRE_ATTEMPTS: usize = 3;

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    acquired_at: u64,
}

fn read_record(lock_path: &Path) -> Option<LockRecord> {
    let text = std::fs::read_to_string(lock_path).ok()?;
    serde_json::from_str(&text).ok()
}

fn lock_age_secs(lock_path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(lock_path).ok()?.modified().ok()?;
    SystemTime::now()
        .duration_since(modified)
        .ok()
        .map(|age| age.as_secs())
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // SAFETY: signal 0 performs permission and existence checks only.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// A record is stale when it is older than the threshold and its owner is gone.
fn is_stale_record(lock_path: &Path) -> bool {
    let old = lock_age_secs(lock_path).is_some_and(|age| age > STALE_LOCK_AGE_SECS);
    old && read_record(lock_path).is_none_or(|r| !process_alive(r.pid))
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}

/// RAII guard for the install lock - releases the lock and deletes the lock file when dropped
#[derive(Debug)]
pub struct InstallLock {
    file: File,
    path: PathBuf,
}

impl InstallLock {
    /// Acquire the install lock at `lock_path` without blocking.
    ///
    /// Fails with [`InstallError::LockUnavailable`] when another process holds it.
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                InstallError::io(format!("cannot create directory {}", parent.display()), e)
            })?;
        }

        for _ in 0..ACQUIRE_ATTEMPTS {
            // Never truncate on open: the file may belong to a live holder.
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(lock_path)
                .map_err(|e| {
                    InstallError::io(
                        format!("cannot create lock file {}", lock_path.display()),
                        e,
                    )
                })?;

            if file.try_lock_exclusive().is_err() {
                return Err(InstallError::LockUnavailable {
                    path: lock_path.to_path_buf(),
                    holder: read_record(lock_path).map(|r| r.pid),
                });
            }

            // The previous holder unlinked the path between our open and lock.
            if !same_file(&file, lock_path) {
                continue;
            }

            if is_stale_record(lock_path) {
                tracing::warn!(path = %lock_path.display(), "reclaiming stale install lock");
            }
            let lock = Self {
                file,
                path: lock_path.to_path_buf(),
            };
            lock.write_record()?;
            tracing::debug!(path = %lock_path.display(), "install lock acquired");
            return Ok(lock);
        }

        Err(InstallError::LockUnavailable {
            path: lock_path.to_path_buf(),
            holder: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&self) -> Result<()> {
        let record = LockRecord {
            pid: std::process::id(),
            acquired_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        let body = serde_json::to_vec(&record)
            .map_err(|e| InstallError::Config(format!("cannot encode lock record: {e}")))?;
        self.file
            .set_len(0)
            .and_then(|_| (&self.file).write_all(&body))
            .map_err(|e| InstallError::io("cannot write lock record", e))
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        // Unlink while still holding the lock; closing the file releases it.
        let _ = std::fs::remove_file(&self.path);
    }
}
