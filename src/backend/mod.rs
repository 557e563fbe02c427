//! Compute backend seam.
//!
//! The arbiter never talks to a vendor API directly. A [`Backend`] lists
//! platforms and their devices, reports capabilities and establishes
//! execution contexts; everything else (locking, ranking, selection) lives in
//! this crate.
//!
//! - [`simulated`]: JSON-inventory backend used by the binary and the tests

pub mod simulated;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::info::{Capabilities, DeviceClass};

/// A capability query failed. The device is excluded from its pool.
#[derive(Error, Debug, Clone)]
#[error("Capability query '{query}' failed on device {index} of platform {platform_offset}: {reason}")]
pub struct ProbeError {
    pub platform_offset: usize,
    pub index: usize,
    pub query: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Platform enumeration failed: {0}")]
    Enumeration(String),

    #[error("Device enumeration failed on platform {platform}: {reason}")]
    DeviceEnumeration { platform: String, reason: String },

    #[error("Execution context creation failed: {0}")]
    Context(String),
}

/// A platform as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// Position in the backend's platform list.
    pub offset: usize,

    /// Platform name (e.g. "NVIDIA CUDA").
    pub name: String,

    /// Vendor string, classified into a [`crate::platform::vendor::Vendor`].
    pub vendor: String,
}

/// Opaque reference to one device of one platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub platform_offset: usize,

    /// Index within the platform, in enumeration order.
    pub index: usize,

    pub class: DeviceClass,

    /// Backend-private slot.
    pub raw: u64,
}

pub trait Backend {
    /// Execution context kept alive for as long as the device is owned.
    type Context;

    /// All platforms, in backend order.
    fn platforms(&self) -> Result<Vec<PlatformInfo>, BackendError>;

    /// Devices of `platform`: CPUs first, then GPUs, then accelerators.
    fn devices(&self, platform: &PlatformInfo) -> Result<Vec<DeviceHandle>, BackendError>;

    /// Capability snapshot of one device.
    fn probe(&self, device: &DeviceHandle) -> Result<Capabilities, ProbeError>;

    /// Establish an execution context on `device`. May fail transiently while
    /// other processes are setting up their own contexts.
    fn create_context(&self, device: &DeviceHandle) -> Result<Self::Context, BackendError>;
}
