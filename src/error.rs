//! Errors surfaced by device arbitration.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::{BackendError, ProbeError};
use crate::lock::identity::DeviceIdentity;
use crate::lock::store::LockError;

/// Result type for arbitration operations.
pub type Result<T, E = ArbiterError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ArbiterError {
    /// A device's capabilities could not be read.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// A platform's vendor string matches no recognized vendor.
    #[error("Unknown platform vendor '{vendor}' (platform '{platform}')")]
    UnknownPlatformVendor { platform: String, vendor: String },

    /// Another process holds the device. Expected under contention.
    #[error("Device lock {} is held by another process", path.display())]
    LockBusy { path: PathBuf },

    /// The lock file could not be created, opened or locked.
    #[error("Lock file {} is unusable: {source}", path.display())]
    LockIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The device was locked but no execution context could be established.
    #[error("Could not establish an execution context on {device} after {attempts} attempts")]
    ContextUnavailable {
        device: DeviceIdentity,
        attempts: u32,
    },

    /// Every candidate on the platform was busy or unusable.
    #[error("All {candidates} device(s) on platform '{platform}' are unavailable")]
    AllDevicesUnavailable { platform: String, candidates: usize },

    /// The caller asked for a platform that was not discovered.
    #[error("Unknown platform key '{key}' (available: {available})")]
    UnknownPlatformKey { key: String, available: String },

    /// The backend exposes no platform at all.
    #[error("No compute platform found")]
    NoPlatforms,

    /// A pinned device index matches no device of the platform.
    #[error("Device index {index} is out of range for platform '{platform}' ({len} device(s))")]
    DeviceIndexOutOfRange {
        platform: String,
        index: usize,
        len: usize,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<LockError> for ArbiterError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Busy { path, .. } => ArbiterError::LockBusy { path },
            LockError::Io { path, source } => ArbiterError::LockIo { path, source },
        }
    }
}

impl ArbiterError {
    /// Per-device failures that acquisition recovers from by trying the next
    /// candidate.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ArbiterError::Probe(_)
                | ArbiterError::LockBusy { .. }
                | ArbiterError::LockIo { .. }
                | ArbiterError::ContextUnavailable { .. }
        )
    }
}
