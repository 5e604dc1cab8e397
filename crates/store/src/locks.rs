//! Advisory lock files.
//!
//! Two locks guard the keeper. Per-asset entry locks serialize buys of the
//! same token across processes, and the exit manager holds a single-instance
//! lock for its whole run. Both are plain files created with `O_EXCL`,
//! carrying the owner pid and a timestamp. A lock whose owner is dead, or
//! (for entry locks) older than the stale TTL, is broken and retaken.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Entry locks older than this are treated as abandoned. Longer than the
/// broker subprocess deadline, so a slow live entry is never broken.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum LockError {
    /// A fresh lock file exists and its owner looks alive.
    #[error("{target} is locked by another process")]
    Busy { target: String },
    /// The lock file could not be created or inspected.
    #[error("lock file error for {target}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    fn io(target: &str, source: std::io::Error) -> Self {
        Self::Io {
            target: target.to_string(),
            source,
        }
    }
}

/// Directory of per-asset entry lock files.
#[derive(Debug, Clone)]
pub struct EntryLockDir {
    dir: PathBuf,
    stale_after: Duration,
}

impl EntryLockDir {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Tries to take the entry lock for `key` without blocking.
    ///
    /// `key` is the canonical asset key; the lock file is
    /// `entry-<key>.lock` under the lock directory.
    ///
    /// # Errors
    ///
    /// [`LockError::Busy`] when a live lock exists, [`LockError::Io`] when
    /// the file cannot be created.
    pub fn try_acquire(&self, key: &str) -> Result<EntryLock, LockError> {
        fs::create_dir_all(&self.dir).map_err(|source| LockError::io(key, source))?;
        let path = self.dir.join(format!("entry-{key}.lock"));

        match create_lock_file(&path) {
            Ok(()) => Ok(EntryLock { path }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if owner_dead(&path) || older_than(&path, self.stale_after) {
                    warn!(lock = %path.display(), "breaking stale entry lock");
                    let _ = fs::remove_file(&path);
                    match create_lock_file(&path) {
                        Ok(()) => Ok(EntryLock { path }),
                        // Lost the race to another process retaking it.
                        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                            Err(LockError::Busy {
                                target: key.to_string(),
                            })
                        }
                        Err(source) => Err(LockError::io(key, source)),
                    }
                } else {
                    Err(LockError::Busy {
                        target: key.to_string(),
                    })
                }
            }
            Err(source) => Err(LockError::io(key, source)),
        }
    }
}

/// Held entry lock. The file is removed on drop.
#[derive(Debug)]
pub struct EntryLock {
    path: PathBuf,
}

impl EntryLock {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            debug!(lock = %self.path.display(), %err, "entry lock file already gone");
        }
    }
}

/// Single-instance lock for the exit manager daemon.
///
/// Held for the whole process lifetime, so staleness is judged by owner
/// liveness alone, never by file age.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Takes the instance lock or reports who holds it.
    ///
    /// # Errors
    ///
    /// [`LockError::Busy`] when another live instance holds the lock.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        let target = path.display().to_string();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|source| LockError::io(&target, source))?;
            }
        }

        match create_lock_file(&path) {
            Ok(()) => Ok(Self { path }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if owner_dead(&path) {
                    warn!(lock = %path.display(), "breaking instance lock left by dead process");
                    let _ = fs::remove_file(&path);
                    match create_lock_file(&path) {
                        Ok(()) => Ok(Self { path }),
                        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                            Err(LockError::Busy { target })
                        }
                        Err(source) => Err(LockError::io(&target, source)),
                    }
                } else {
                    Err(LockError::Busy { target })
                }
            }
            Err(source) => Err(LockError::io(&target, source)),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            debug!(lock = %self.path.display(), %err, "instance lock file already gone");
        }
    }
}

fn create_lock_file(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339())?;
    Ok(())
}

/// True when the pid recorded in the lock file is provably gone.
/// Unreadable or unparseable files stay conservative and report alive.
fn owner_dead(path: &Path) -> bool {
    let Ok(contents) = fs::read_to_string(path) else {
        return false;
    };
    let Some(pid) = contents.split_whitespace().next() else {
        return false;
    };
    let Ok(pid) = pid.parse::<u32>() else {
        return false;
    };
    if cfg!(target_os = "linux") {
        !Path::new("/proc").join(pid.to_string()).exists()
    } else {
        false
    }
}

fn older_than(path: &Path, age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|elapsed| elapsed > age)
}
