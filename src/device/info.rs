//! A single compute device: what it can do and whether we hold it.
//!
//! `in_use` is observed once at discovery and never refreshed. `locked` only
//! mirrors the advisory lock this process holds; the lock file is the
//! authority, these fields are a cache of it.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{Backend, DeviceHandle, PlatformInfo, ProbeError};
use crate::lock::identity::DeviceIdentity;
use crate::lock::retry::RetryPolicy;
use crate::lock::store::{LockError, LockStore, LockToken};

/// Kind of compute unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Cpu,
    Gpu,
    Accelerator,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Cpu => write!(f, "CPU"),
            DeviceClass::Gpu => write!(f, "GPU"),
            DeviceClass::Accelerator => write!(f, "Accelerator"),
        }
    }
}

/// Immutable capability snapshot taken at discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Device name (e.g., "GeForce GTX 1070").
    pub name: String,

    pub class: DeviceClass,

    /// Number of parallel compute units.
    pub compute_units: u32,

    /// Global memory in bytes.
    pub global_mem_bytes: u64,

    /// Local (shared) memory in bytes.
    pub local_mem_bytes: u64,

    pub max_clock_mhz: u32,

    /// Vendor extensions, passed through uninterpreted.
    pub extensions: Vec<String>,
}

impl Capabilities {
    pub fn new(name: impl Into<String>, class: DeviceClass, compute_units: u32) -> Self {
        Self {
            name: name.into(),
            class,
            compute_units,
            global_mem_bytes: 0,
            local_mem_bytes: 0,
            max_clock_mhz: 0,
            extensions: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct Device {
    identity: DeviceIdentity,
    handle: DeviceHandle,
    capabilities: Capabilities,

    /// Observed at discovery: another process held the device's lock.
    in_use: bool,

    /// False when locking is disabled; such devices are never locked.
    lockable: bool,

    lock_path: PathBuf,

    /// Present only while this process holds the device's lock.
    lock: Option<LockToken>,
}

impl Device {
    /// A device with no lock file attached. Such a device is never locked.
    pub fn new(identity: DeviceIdentity, handle: DeviceHandle, capabilities: Capabilities) -> Self {
        Self {
            identity,
            handle,
            capabilities,
            in_use: false,
            lockable: false,
            lock_path: PathBuf::new(),
            lock: None,
        }
    }

    /// Attach this device to its lock file in `store`.
    pub fn with_lock_store(mut self, store: &LockStore) -> Self {
        self.lock_path = store.path_for(&self.identity);
        self.lockable = true;
        self
    }

    pub fn with_in_use(mut self, in_use: bool) -> Self {
        self.in_use = in_use;
        self
    }

    /// Query the backend for `handle`'s capabilities and build the device.
    ///
    /// With a lock store, the device is lockable and its in-use state is
    /// observed through a non-owning lock probe. Without one, locking is
    /// disabled and the device is reported free.
    pub fn probe<B: Backend>(
        backend: &B,
        platform: &PlatformInfo,
        handle: DeviceHandle,
        store: Option<&LockStore>,
    ) -> Result<Self, ProbeError> {
        let capabilities = backend.probe(&handle)?;
        let identity = DeviceIdentity::new(
            platform.offset,
            handle.index,
            platform.name.clone(),
            capabilities.name.clone(),
        );
        let mut device = Device::new(identity, handle, capabilities);

        if let Some(store) = store {
            device = device.with_lock_store(store);
            device.in_use = device.query_in_use(store);
        }

        debug!(
            device = %device.identity,
            class = %device.capabilities.class,
            compute_units = device.capabilities.compute_units,
            in_use = device.in_use,
            "Probed device"
        );
        Ok(device)
    }

    /// Non-owning, single-attempt lock probe. Busy means another process
    /// holds the device. This is a point-in-time observation only.
    pub fn query_in_use(&self, store: &LockStore) -> bool {
        if !self.lockable {
            return false;
        }
        match store.try_lock_with(&self.lock_path, &RetryPolicy::single()) {
            Ok(mut token) => {
                token.release();
                false
            }
            Err(LockError::Busy { .. }) => true,
            Err(e) => {
                warn!(device = %self.identity, error = %e, "Could not probe device lock, treating it as in use");
                true
            }
        }
    }

    /// Acquire this device's advisory lock.
    ///
    /// # Panics
    ///
    /// Panics if this process already holds the lock. Locking twice without
    /// an intervening [`Device::unlock`] is a programming error.
    pub fn lock(&mut self, store: &LockStore) -> Result<(), LockError> {
        if self.lock.is_some() {
            panic!("device {} is already locked by this process", self.identity);
        }
        if !self.lockable {
            return Ok(());
        }

        let mut token = store.try_lock(&self.lock_path)?;
        let note = format!("pid={}\ndevice={}\n", std::process::id(), self.identity);
        if let Err(e) = token.annotate(&note) {
            debug!(path = %self.lock_path.display(), error = %e, "Could not annotate lock file");
        }
        self.lock = Some(token);
        Ok(())
    }

    /// Release this device's lock. Returns `false` if it was not held.
    pub fn unlock(&mut self) -> bool {
        match self.lock.take() {
            Some(mut token) => token.release(),
            None => false,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn name(&self) -> &str {
        &self.capabilities.name
    }

    pub fn compute_units(&self) -> u32 {
        self.capabilities.compute_units
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    pub fn is_lockable(&self) -> bool {
        self.lockable
    }

    /// True only while this process holds the device's lock.
    pub fn is_locked(&self) -> bool {
        self.lock.as_ref().is_some_and(LockToken::is_held)
    }

    pub fn lock_path(&self) -> Option<&Path> {
        self.lockable.then_some(self.lock_path.as_path())
    }
}
