//! Integration tests for ranking and acquisition across simulated processes.
//!
//! Separate `LockStore` handles open their own descriptors, so a lock taken
//! through one of them is seen as foreign by the registry under test, just as
//! a lock held by another process would be.

use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use device_arbiter::backend::simulated::{
    SimulatedBackend, SimulatedDevice, SimulatedInventory, SimulatedPlatform,
};
use device_arbiter::{
    ArbiterError, DeviceClass, DeviceIdentity, LockStore, PlatformRegistry, RegistryOptions,
    RetryPolicy,
};

const PLATFORM: &str = "NVIDIA CUDA";

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
}

fn options(dir: &Path) -> RegistryOptions {
    RegistryOptions {
        lock_store: LockStore::new(dir, "it_", fast_policy()),
        locking: true,
        context_policy: fast_policy(),
    }
}

fn nvidia_backend(devices: Vec<SimulatedDevice>) -> SimulatedBackend {
    SimulatedBackend::new(SimulatedInventory {
        platforms: vec![SimulatedPlatform {
            name: PLATFORM.to_string(),
            vendor: "NVIDIA Corporation".to_string(),
            devices,
        }],
    })
}

#[test]
fn test_free_small_device_beats_busy_large_device() {
    let tmp = TempDir::new().unwrap();
    let opts = options(tmp.path());
    let other_process = opts.lock_store.clone();

    // B is held by someone else before this process starts.
    let b = DeviceIdentity::new(0, 1, PLATFORM, "B");
    let _held = other_process.try_lock(&other_process.path_for(&b)).unwrap();

    let backend = nvidia_backend(vec![
        SimulatedDevice::new("A", DeviceClass::Gpu, 8),
        SimulatedDevice::new("B", DeviceClass::Gpu, 32),
    ]);
    let mut registry = PlatformRegistry::initialize(backend, opts, "nvidia").unwrap();

    registry.rank_all();
    let ranked: Vec<_> = registry
        .resolve("nvidia")
        .unwrap()
        .pool()
        .devices()
        .iter()
        .map(|d| (d.name().to_string(), d.in_use()))
        .collect();
    assert_eq!(ranked, vec![("A".to_string(), false), ("B".to_string(), true)]);

    let owned = registry.acquire_preferred_device("nvidia", None).unwrap();
    assert_eq!(owned.name(), "A");
    assert!(owned.is_locked());
}

#[test]
fn test_more_compute_units_win_when_all_free() {
    let tmp = TempDir::new().unwrap();
    let backend = nvidia_backend(vec![
        SimulatedDevice::new("small", DeviceClass::Gpu, 8),
        SimulatedDevice::new("large", DeviceClass::Gpu, 32),
    ]);
    let mut registry = PlatformRegistry::initialize(backend, options(tmp.path()), "default").unwrap();

    let owned = registry.acquire(None).unwrap();
    assert_eq!(owned.name(), "large");
}

#[test]
fn test_single_locked_device_is_terminal() {
    let tmp = TempDir::new().unwrap();
    let opts = options(tmp.path());
    let other_process = opts.lock_store.clone();
    let only = DeviceIdentity::new(0, 0, PLATFORM, "only");
    let _held = other_process.try_lock(&other_process.path_for(&only)).unwrap();

    let backend = nvidia_backend(vec![SimulatedDevice::new("only", DeviceClass::Gpu, 16)]);
    let mut registry = PlatformRegistry::initialize(backend, opts, "nvidia").unwrap();

    let err = registry.acquire(None).err().unwrap();
    match err {
        ArbiterError::AllDevicesUnavailable { platform, candidates } => {
            assert_eq!(platform, "nvidia");
            assert_eq!(candidates, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_context_failure_falls_through_to_next_device() {
    let tmp = TempDir::new().unwrap();
    let opts = options(tmp.path());
    let store = opts.lock_store.clone();
    let backend = nvidia_backend(vec![
        SimulatedDevice {
            context_failures: 100,
            ..SimulatedDevice::new("flaky", DeviceClass::Gpu, 64)
        },
        SimulatedDevice::new("steady", DeviceClass::Gpu, 8),
    ]);
    let mut registry = PlatformRegistry::initialize(backend, opts, "nvidia").unwrap();

    {
        let owned = registry.acquire(None).unwrap();
        assert_eq!(owned.name(), "steady");
    }

    // The flaky device was unlocked again when its context never came up.
    let flaky = DeviceIdentity::new(0, 0, PLATFORM, "flaky");
    assert!(store
        .try_lock_with(&store.path_for(&flaky), &RetryPolicy::single())
        .is_ok());
}

#[test]
fn test_resolve_unknown_key_leaves_registry_untouched() {
    let tmp = TempDir::new().unwrap();
    let registry =
        PlatformRegistry::initialize(SimulatedBackend::default(), options(tmp.path()), "nvidia")
            .unwrap();
    let before = registry.summary();

    let err = registry.resolve("does-not-exist").err().unwrap();
    assert!(matches!(err, ArbiterError::UnknownPlatformKey { .. }));

    assert_eq!(registry.summary(), before);
    assert_eq!(registry.preferred_key(), "nvidia");
}

#[test]
fn test_release_makes_device_available_to_next_process() {
    let tmp = TempDir::new().unwrap();
    let backend = || nvidia_backend(vec![SimulatedDevice::new("gpu", DeviceClass::Gpu, 16)]);

    let mut first = PlatformRegistry::initialize(backend(), options(tmp.path()), "nvidia").unwrap();
    let owned = first.acquire(None).unwrap();

    let mut second = PlatformRegistry::initialize(backend(), options(tmp.path()), "nvidia").unwrap();
    assert!(second.resolve("nvidia").unwrap().pool().all_in_use());
    assert!(matches!(
        second.acquire(None).err().unwrap(),
        ArbiterError::AllDevicesUnavailable { .. }
    ));

    owned.release();

    let mut third = PlatformRegistry::initialize(backend(), options(tmp.path()), "nvidia").unwrap();
    let owned = third.acquire(None).unwrap();
    assert_eq!(owned.name(), "gpu");
}
