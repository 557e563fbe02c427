//! Device identity and lock-file naming.
//!
//! A [`DeviceIdentity`] is assigned once at discovery. Two devices with the
//! same identity are the same resource, so the identity alone decides which
//! lock file arbitrates access to it.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lock-file suffix.
pub const LOCK_FILE_EXTENSION: &str = "lck";

/// Number of hex digits of the identity digest appended to lock-file names.
const DIGEST_LEN: usize = 16;

/// Stable key for one compute resource on this node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Position of the owning platform in the backend's platform list.
    pub platform_offset: usize,

    /// Index of the device within its platform (CPUs first, then GPUs).
    pub device_index: usize,

    /// Platform name as reported by the backend.
    pub platform_name: String,

    /// Device name as reported by the backend.
    pub device_name: String,
}

impl DeviceIdentity {
    pub fn new(
        platform_offset: usize,
        device_index: usize,
        platform_name: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Self {
        Self {
            platform_offset,
            device_index,
            platform_name: platform_name.into(),
            device_name: device_name.into(),
        }
    }

    /// Human-readable, filesystem-safe name: every character outside
    /// `[A-Za-z0-9]` is replaced with `_`.
    pub fn sanitized_name(&self) -> String {
        format!(
            "Platform{}_Device{}__{}_{}",
            self.platform_offset, self.device_index, self.platform_name, self.device_name
        )
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
    }

    /// Deterministic digest of the raw identity.
    ///
    /// Sanitizing is lossy ("GTX 1070" and "GTX-1070" both become "GTX_1070"),
    /// so the digest is computed over a length-prefixed encoding of the
    /// unsanitized fields.
    pub fn digest(&self) -> String {
        let raw = format!(
            "{}/{}/{}:{}/{}:{}",
            self.platform_offset,
            self.device_index,
            self.platform_name.len(),
            self.platform_name,
            self.device_name.len(),
            self.device_name,
        );
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, raw.as_bytes());
        let mut hex = id.simple().to_string();
        hex.truncate(DIGEST_LEN);
        hex
    }

    /// Lock-file path for this identity under `dir`.
    ///
    /// The same identity always yields the same path and distinct identities
    /// yield distinct paths.
    pub fn lock_path(&self, dir: &Path, prefix: &str) -> PathBuf {
        dir.join(format!(
            "{prefix}{}_{}.{LOCK_FILE_EXTENSION}",
            self.sanitized_name(),
            self.digest()
        ))
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({} / {})",
            self.platform_offset, self.device_index, self.platform_name, self.device_name
        )
    }
}
