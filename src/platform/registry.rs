//! Process-wide view of the node's compute platforms.
//!
//! The registry is built once at startup: every backend platform is
//! classified by vendor, devices of the same vendor are pooled together and
//! each device's in-use state is observed. After that the only mutation is
//! the acquisition of the preferred device.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::{Backend, PlatformInfo};
use crate::device::info::DeviceClass;
use crate::device::pool::DevicePool;
use crate::error::{ArbiterError, Result};
use crate::lock::identity::DeviceIdentity;
use crate::lock::retry::RetryPolicy;
use crate::lock::store::LockStore;
use crate::platform::acquirer::{ContextAcquirer, OwnedDevice};
use crate::platform::vendor::Vendor;

/// Default lock-file name prefix.
pub const DEFAULT_LOCK_PREFIX: &str = "device_arbiter_";

/// Keys that select the first platform.
const DEFAULT_KEYS: [&str; 3] = ["", "default", "-1"];

/// Knobs for building a [`PlatformRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub lock_store: LockStore,

    /// When false no lock file is ever touched: devices are reported free and
    /// acquisition only establishes a context. For jobs whose devices are
    /// already assigned by a queueing system.
    pub locking: bool,

    pub context_policy: RetryPolicy,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            lock_store: LockStore::new(std::env::temp_dir(), DEFAULT_LOCK_PREFIX, RetryPolicy::default()),
            locking: true,
            context_policy: RetryPolicy::default(),
        }
    }
}

/// All devices of one vendor.
#[derive(Debug)]
pub struct Platform {
    vendor: Vendor,

    /// Backend platforms merged into this one, in backend order.
    infos: Vec<PlatformInfo>,

    pool: DevicePool,
}

impl Platform {
    fn new(vendor: Vendor) -> Self {
        Self {
            vendor,
            infos: Vec::new(),
            pool: DevicePool::default(),
        }
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    pub fn key(&self) -> &'static str {
        self.vendor.key()
    }

    /// Name of the first backend platform of this vendor.
    pub fn name(&self) -> &str {
        self.infos.first().map(|i| i.name.as_str()).unwrap_or_default()
    }

    pub fn infos(&self) -> &[PlatformInfo] {
        &self.infos
    }

    pub fn pool(&self) -> &DevicePool {
        &self.pool
    }
}

pub struct PlatformRegistry<B: Backend> {
    backend: B,
    store: LockStore,
    locking: bool,
    context_policy: RetryPolicy,
    platforms: BTreeMap<Vendor, Platform>,
    preferred: Vendor,
}

impl<B: Backend> PlatformRegistry<B> {
    /// Enumerate every platform, build one device pool per vendor and pick
    /// the preferred platform (`"default"` or empty selects the first one in
    /// key order).
    pub fn initialize(backend: B, options: RegistryOptions, preferred_platform: &str) -> Result<Self> {
        let infos = backend.platforms()?;
        if infos.is_empty() {
            return Err(ArbiterError::NoPlatforms);
        }

        if options.locking {
            info!(lock_dir = %options.lock_store.dir().display(), "File locking enabled");
        } else {
            info!("File locking disabled, devices are assumed to be assigned externally");
        }

        // Classify everything before touching any lock file.
        let classified = infos
            .into_iter()
            .map(|info| match Vendor::classify(&info.vendor) {
                Some(vendor) => Ok((vendor, info)),
                None => Err(ArbiterError::UnknownPlatformVendor {
                    platform: info.name,
                    vendor: info.vendor,
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        let store = options.locking.then_some(&options.lock_store);
        let mut platforms = BTreeMap::new();
        for (vendor, info) in classified {
            let platform = platforms.entry(vendor).or_insert_with(|| Platform::new(vendor));
            platform.pool.discover(&backend, &info, store)?;
            info!(
                key = vendor.key(),
                platform = %info.name,
                offset = info.offset,
                devices = platform.pool.len(),
                "Initialized platform"
            );
            platform.infos.push(info);
        }

        for platform in platforms.values() {
            if platform.pool.all_in_use() {
                warn!(key = platform.key(), "All devices on platform are in use");
            }
        }

        let preferred = resolve_vendor(&platforms, preferred_platform)?;
        info!(preferred = preferred.key(), platforms = platforms.len(), "Platform registry ready");

        Ok(Self {
            backend,
            store: options.lock_store,
            locking: options.locking,
            context_policy: options.context_policy,
            platforms,
            preferred,
        })
    }

    /// Platform for `key`; `"default"` or empty selects the first platform.
    /// Never mutates the registry.
    pub fn resolve(&self, key: &str) -> Result<&Platform> {
        let vendor = resolve_vendor(&self.platforms, key)?;
        Ok(&self.platforms[&vendor])
    }

    pub fn preferred(&self) -> &Platform {
        &self.platforms[&self.preferred]
    }

    pub fn preferred_key(&self) -> &'static str {
        self.preferred.key()
    }

    /// Platforms in key order.
    pub fn platforms(&self) -> impl Iterator<Item = &Platform> {
        self.platforms.values()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn lock_store(&self) -> &LockStore {
        &self.store
    }

    pub fn locking(&self) -> bool {
        self.locking
    }

    /// Rank every pool that has not been ranked since enumeration.
    pub fn rank_all(&mut self) {
        for platform in self.platforms.values_mut() {
            platform.pool.ensure_ranked();
        }
    }

    /// Acquire a device on the preferred platform.
    pub fn acquire(&mut self, explicit_index: Option<usize>) -> Result<OwnedDevice<'_, B::Context>> {
        self.acquire_preferred_device(self.preferred.key(), explicit_index)
    }

    /// Acquire a device on the platform selected by `key`.
    ///
    /// With `explicit_index`, only the device with that index is attempted.
    /// Otherwise candidates are tried in ranked order until one can be locked
    /// and given a context. Running out of candidates is terminal.
    pub fn acquire_preferred_device(
        &mut self,
        key: &str,
        explicit_index: Option<usize>,
    ) -> Result<OwnedDevice<'_, B::Context>> {
        let vendor = resolve_vendor(&self.platforms, key)?;
        let Self {
            backend,
            store,
            context_policy,
            platforms,
            ..
        } = self;
        let acquirer = ContextAcquirer::new(&*backend, &*store, *context_policy);
        let key = vendor.key();
        let Some(platform) = platforms.get_mut(&vendor) else {
            return Err(ArbiterError::UnknownPlatformKey {
                key: key.to_string(),
                available: String::new(),
            });
        };
        let pool = &mut platform.pool;

        if let Some(index) = explicit_index {
            let len = pool.len();
            let position = pool
                .position_of(index)
                .ok_or_else(|| ArbiterError::DeviceIndexOutOfRange {
                    platform: key.to_string(),
                    index,
                    len,
                })?;
            let device = &mut pool.devices_mut()[position];
            info!(platform = key, device = %device.identity(), "Acquiring pinned device");
            return acquirer.acquire(device);
        }

        if pool.is_empty() {
            if let Some(e) = pool.excluded().first() {
                return Err(e.clone().into());
            }
        }

        pool.ensure_ranked();
        let candidates = pool.len();
        for (rank, device) in pool.devices_mut().iter_mut().enumerate() {
            info!(
                platform = key,
                rank,
                device = %device.identity(),
                compute_units = device.compute_units(),
                in_use = device.in_use(),
                "Trying device"
            );
            match acquirer.acquire(device) {
                Ok(owned) => return Ok(owned),
                Err(e @ ArbiterError::LockBusy { .. }) => {
                    info!(platform = key, rank, reason = %e, "Device busy, trying next");
                }
                Err(e) if e.is_recoverable() => {
                    warn!(platform = key, rank, error = %e, "Device unusable, trying next");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ArbiterError::AllDevicesUnavailable {
            platform: key.to_string(),
            candidates,
        })
    }

    /// Serializable snapshot of platforms and devices in their current order.
    pub fn summary(&self) -> RegistrySummary {
        RegistrySummary {
            preferred: self.preferred.key().to_string(),
            locking: self.locking,
            platforms: self
                .platforms
                .values()
                .map(|p| PlatformSummary {
                    key: p.key().to_string(),
                    names: p.infos.iter().map(|i| i.name.clone()).collect(),
                    ranked: p.pool.is_ranked(),
                    excluded: p.pool.excluded().len(),
                    devices: p
                        .pool
                        .devices()
                        .iter()
                        .map(|d| DeviceSummary {
                            identity: d.identity().clone(),
                            class: d.capabilities().class,
                            compute_units: d.compute_units(),
                            global_mem_bytes: d.capabilities().global_mem_bytes,
                            in_use: d.in_use(),
                            locked: d.is_locked(),
                            lock_path: d.lock_path().map(PathBuf::from),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

fn resolve_vendor(platforms: &BTreeMap<Vendor, Platform>, key: &str) -> Result<Vendor> {
    if DEFAULT_KEYS.contains(&key.trim()) {
        return platforms
            .keys()
            .next()
            .copied()
            .ok_or(ArbiterError::NoPlatforms);
    }
    key.trim()
        .parse::<Vendor>()
        .ok()
        .filter(|v| platforms.contains_key(v))
        .ok_or_else(|| unknown_key(key, platforms))
}

fn unknown_key(key: &str, platforms: &BTreeMap<Vendor, Platform>) -> ArbiterError {
    ArbiterError::UnknownPlatformKey {
        key: key.to_string(),
        available: platforms
            .keys()
            .map(Vendor::key)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySummary {
    pub preferred: String,
    pub locking: bool,
    pub platforms: Vec<PlatformSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformSummary {
    pub key: String,
    pub names: Vec<String>,
    pub ranked: bool,
    /// Devices dropped because probing failed.
    pub excluded: usize,
    pub devices: Vec<DeviceSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub identity: DeviceIdentity,
    pub class: DeviceClass,
    pub compute_units: u32,
    pub global_mem_bytes: u64,
    pub in_use: bool,
    pub locked: bool,
    pub lock_path: Option<PathBuf>,
}
