//! Simulated compute backend.
//!
//! Serves platforms and devices from a JSON inventory instead of a vendor
//! driver. Devices can be told to fail probing or to fail their first few
//! context creations, which is how contention and flaky drivers are
//! reproduced in tests.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{Backend, BackendError, DeviceHandle, PlatformInfo, ProbeError};
use crate::device::info::{Capabilities, DeviceClass};

/// Inventory of simulated platforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedInventory {
    pub platforms: Vec<SimulatedPlatform>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedPlatform {
    pub name: String,
    pub vendor: String,
    #[serde(default)]
    pub devices: Vec<SimulatedDevice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedDevice {
    pub name: String,
    pub class: DeviceClass,
    pub compute_units: u32,
    #[serde(default)]
    pub global_mem_bytes: u64,
    #[serde(default)]
    pub local_mem_bytes: u64,
    #[serde(default)]
    pub max_clock_mhz: u32,
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Every capability query fails.
    #[serde(default)]
    pub probe_fails: bool,

    /// Number of context creations that fail before one succeeds.
    #[serde(default)]
    pub context_failures: u32,
}

impl SimulatedDevice {
    pub fn new(name: impl Into<String>, class: DeviceClass, compute_units: u32) -> Self {
        Self {
            name: name.into(),
            class,
            compute_units,
            global_mem_bytes: 0,
            local_mem_bytes: 0,
            max_clock_mhz: 0,
            extensions: Vec::new(),
            probe_fails: false,
            context_failures: 0,
        }
    }
}

impl Default for SimulatedInventory {
    /// A workstation with two GTX 1070s on the NVIDIA platform and the host
    /// CPU on the Intel platform.
    fn default() -> Self {
        let gtx_1070 = || SimulatedDevice {
            global_mem_bytes: 8 * 1024 * 1024 * 1024, // 8 GB
            local_mem_bytes: 48 * 1024,
            max_clock_mhz: 1683,
            extensions: vec!["cl_khr_fp64".to_string(), "cl_nv_device_attribute_query".to_string()],
            ..SimulatedDevice::new("GeForce GTX 1070", DeviceClass::Gpu, 15)
        };
        Self {
            platforms: vec![
                SimulatedPlatform {
                    name: "NVIDIA CUDA".to_string(),
                    vendor: "NVIDIA Corporation".to_string(),
                    devices: vec![gtx_1070(), gtx_1070()],
                },
                SimulatedPlatform {
                    name: "Intel(R) OpenCL".to_string(),
                    vendor: "Intel(R) Corporation".to_string(),
                    devices: vec![SimulatedDevice {
                        global_mem_bytes: 16 * 1024 * 1024 * 1024, // 16 GB
                        local_mem_bytes: 32 * 1024,
                        max_clock_mhz: 3400,
                        extensions: vec!["cl_khr_fp64".to_string()],
                        ..SimulatedDevice::new("Intel(R) Core(TM) i7-6700 CPU @ 3.40GHz", DeviceClass::Cpu, 8)
                    }],
                },
            ],
        }
    }
}

/// Context handed out by [`SimulatedBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedContext {
    pub platform_offset: usize,
    pub index: usize,
    pub device_name: String,
}

pub struct SimulatedBackend {
    inventory: SimulatedInventory,

    /// Context creation attempts per device, indexed like the inventory.
    context_attempts: Vec<Vec<AtomicU32>>,
}

impl SimulatedBackend {
    pub fn new(inventory: SimulatedInventory) -> Self {
        let context_attempts = inventory
            .platforms
            .iter()
            .map(|p| p.devices.iter().map(|_| AtomicU32::new(0)).collect())
            .collect();
        Self {
            inventory,
            context_attempts,
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn inventory(&self) -> &SimulatedInventory {
        &self.inventory
    }

    /// Number of context creations attempted on `device` so far.
    pub fn context_attempts(&self, device: &DeviceHandle) -> u32 {
        self.context_attempts
            .get(device.platform_offset)
            .and_then(|p| p.get(device.raw as usize))
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn device(&self, handle: &DeviceHandle) -> Option<&SimulatedDevice> {
        self.inventory
            .platforms
            .get(handle.platform_offset)?
            .devices
            .get(handle.raw as usize)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(SimulatedInventory::default())
    }
}

impl Backend for SimulatedBackend {
    type Context = SimulatedContext;

    fn platforms(&self) -> Result<Vec<PlatformInfo>, BackendError> {
        Ok(self
            .inventory
            .platforms
            .iter()
            .enumerate()
            .map(|(offset, p)| PlatformInfo {
                offset,
                name: p.name.clone(),
                vendor: p.vendor.clone(),
            })
            .collect())
    }

    fn devices(&self, platform: &PlatformInfo) -> Result<Vec<DeviceHandle>, BackendError> {
        let entry = self
            .inventory
            .platforms
            .get(platform.offset)
            .ok_or_else(|| BackendError::DeviceEnumeration {
                platform: platform.name.clone(),
                reason: "no such platform".to_string(),
            })?;

        let mut handles = Vec::with_capacity(entry.devices.len());
        for class in [DeviceClass::Cpu, DeviceClass::Gpu, DeviceClass::Accelerator] {
            for (raw, device) in entry.devices.iter().enumerate() {
                if device.class == class {
                    handles.push(DeviceHandle {
                        platform_offset: platform.offset,
                        index: handles.len(),
                        class,
                        raw: raw as u64,
                    });
                }
            }
        }
        Ok(handles)
    }

    fn probe(&self, handle: &DeviceHandle) -> Result<Capabilities, ProbeError> {
        let probe_error = |reason: &str| ProbeError {
            platform_offset: handle.platform_offset,
            index: handle.index,
            query: "max_compute_units".to_string(),
            reason: reason.to_string(),
        };

        let device = self.device(handle).ok_or_else(|| probe_error("no such device"))?;
        if device.probe_fails {
            return Err(probe_error("device did not answer"));
        }

        Ok(Capabilities {
            name: device.name.clone(),
            class: device.class,
            compute_units: device.compute_units,
            global_mem_bytes: device.global_mem_bytes,
            local_mem_bytes: device.local_mem_bytes,
            max_clock_mhz: device.max_clock_mhz,
            extensions: device.extensions.clone(),
        })
    }

    fn create_context(&self, handle: &DeviceHandle) -> Result<SimulatedContext, BackendError> {
        let device = self
            .device(handle)
            .ok_or_else(|| BackendError::Context("no such device".to_string()))?;

        let attempt = self
            .context_attempts
            .get(handle.platform_offset)
            .and_then(|p| p.get(handle.raw as usize))
            .map(|c| c.fetch_add(1, Ordering::SeqCst) + 1)
            .unwrap_or(1);

        if attempt <= device.context_failures {
            debug!(device = %device.name, attempt, "Simulated context creation failure");
            return Err(BackendError::Context(format!(
                "device {} is still being set up by another process",
                device.name
            )));
        }

        Ok(SimulatedContext {
            platform_offset: handle.platform_offset,
            index: handle.index,
            device_name: device.name.clone(),
        })
    }
}
