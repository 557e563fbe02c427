//! Advisory lock files.
//!
//! The lock is an exclusive whole-file advisory lock bound to the open file
//! descriptor. Closing the descriptor releases it, and the OS closes every
//! descriptor of a process that dies, so a crashed holder can never leave a
//! device locked.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::lock::identity::DeviceIdentity;
use crate::lock::retry::RetryPolicy;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock file {} is held by another process ({attempts} attempts)", path.display())]
    Busy { path: PathBuf, attempts: u32 },

    #[error("Lock file {} could not be opened or locked: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    pub fn is_busy(&self) -> bool {
        matches!(self, LockError::Busy { .. })
    }

    pub fn path(&self) -> &Path {
        match self {
            LockError::Busy { path, .. } | LockError::Io { path, .. } => path,
        }
    }
}

/// An acquired advisory lock. Dropping the token releases the lock.
#[derive(Debug)]
pub struct LockToken {
    path: PathBuf,
    file: Option<File>,
}

impl LockToken {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this token still holds its lock.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Replace the lock file's contents with `note`.
    ///
    /// Contents are informational only; nothing reads them back.
    pub fn annotate(&mut self, note: &str) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(note.as_bytes())?;
        file.flush()
    }

    /// Release the lock and close the descriptor. Returns `false` if the
    /// token was already released.
    pub fn release(&mut self) -> bool {
        match self.file.take() {
            Some(file) => {
                if let Err(e) = FileExt::unlock(&file) {
                    // Closing the descriptor below releases it regardless.
                    debug!(path = %self.path.display(), error = %e, "Explicit unlock failed");
                }
                drop(file);
                debug!(path = %self.path.display(), "Released lock");
                true
            }
            None => false,
        }
    }
}

/// Maps device identities to lock files and acquires locks on them.
#[derive(Debug, Clone)]
pub struct LockStore {
    dir: PathBuf,
    prefix: String,
    policy: RetryPolicy,
}

impl LockStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            policy,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Lock-file path for `identity`.
    pub fn path_for(&self, identity: &DeviceIdentity) -> PathBuf {
        identity.lock_path(&self.dir, &self.prefix)
    }

    /// Acquire `path` using this store's retry policy.
    pub fn try_lock(&self, path: &Path) -> Result<LockToken, LockError> {
        self.try_lock_with(path, &self.policy)
    }

    /// Acquire an exclusive, non-blocking lock on `path`, creating the file
    /// if absent, retrying contention according to `policy`.
    pub fn try_lock_with(&self, path: &Path, policy: &RetryPolicy) -> Result<LockToken, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        share_with_other_users(&file, path);

        let attempts = policy.attempts();
        for attempt in 1..=attempts {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %path.display(), attempt, "Acquired lock");
                    return Ok(LockToken {
                        path: path.to_path_buf(),
                        file: Some(file),
                    });
                }
                Err(e) if is_contended(&e) => {
                    if attempt == attempts {
                        break;
                    }
                    let delay = policy.backoff();
                    warn!(
                        path = %path.display(),
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Lock is held elsewhere, waiting before retrying"
                    );
                    thread::sleep(delay);
                }
                Err(source) => {
                    return Err(LockError::Io {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }

        Err(LockError::Busy {
            path: path.to_path_buf(),
            attempts,
        })
    }

    /// Release `token`. Releasing an already released token is a no-op.
    pub fn unlock(&self, token: &mut LockToken) {
        token.release();
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Best effort: let other users on the node open the same lock file. Fails
/// when the file belongs to someone else, which is fine since only the lock
/// itself matters.
#[cfg(unix)]
fn share_with_other_users(file: &File, path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = file.set_permissions(std::fs::Permissions::from_mode(0o666)) {
        debug!(path = %path.display(), error = %e, "Could not relax lock file permissions");
    }
}

#[cfg(not(unix))]
fn share_with_other_users(_file: &File, _path: &Path) {}
