//! Per-platform device pool and ranking.
//!
//! Devices are ranked by:
//! 1. availability: devices nobody else holds come before devices in use
//! 2. compute units: more before fewer
//! 3. discovery order for anything still tied (stable sort)

use std::cmp::Ordering;

use tracing::warn;

use crate::backend::{Backend, BackendError, PlatformInfo, ProbeError};
use crate::device::info::Device;
use crate::lock::store::LockStore;

/// Preference order between two devices. `Less` means `a` is tried first.
pub fn preference(a: &Device, b: &Device) -> Ordering {
    a.in_use()
        .cmp(&b.in_use())
        .then_with(|| b.compute_units().cmp(&a.compute_units()))
}

#[derive(Debug, Default)]
pub struct DevicePool {
    devices: Vec<Device>,

    /// Devices dropped because their capabilities could not be probed.
    excluded: Vec<ProbeError>,

    ranked: bool,
}

impl DevicePool {
    /// A pool over already-probed devices, in discovery order.
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices,
            excluded: Vec::new(),
            ranked: false,
        }
    }

    /// Enumerate and probe every device of `platform`, appending them to the
    /// pool. Devices that fail probing are excluded, not fatal.
    pub fn discover<B: Backend>(
        &mut self,
        backend: &B,
        platform: &PlatformInfo,
        store: Option<&LockStore>,
    ) -> Result<(), BackendError> {
        for handle in backend.devices(platform)? {
            match Device::probe(backend, platform, handle, store) {
                Ok(device) => self.devices.push(device),
                Err(e) => {
                    warn!(platform = %platform.name, index = handle.index, error = %e, "Excluding device that could not be probed");
                    self.excluded.push(e);
                }
            }
        }
        self.ranked = false;
        Ok(())
    }

    /// Sort devices into preference order. Repeated calls are idempotent.
    pub fn rank(&mut self) {
        // Vec::sort_by is stable, which keeps discovery order among ties.
        self.devices.sort_by(preference);
        self.ranked = true;
    }

    /// Rank once per enumeration.
    pub fn ensure_ranked(&mut self) {
        if !self.ranked {
            self.rank();
        }
    }

    pub fn is_ranked(&self) -> bool {
        self.ranked
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    pub fn excluded(&self) -> &[ProbeError] {
        &self.excluded
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Every device was observed in use at discovery.
    pub fn all_in_use(&self) -> bool {
        !self.devices.is_empty() && self.devices.iter().all(Device::in_use)
    }

    /// Position of the first device, in current order, whose device index
    /// is `index`.
    pub fn position_of(&self, index: usize) -> Option<usize> {
        self.devices
            .iter()
            .position(|d| d.identity().device_index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use crate::backend::DeviceHandle;
    use crate::device::info::{Capabilities, DeviceClass};
    use crate::lock::identity::DeviceIdentity;

    fn device(index: usize, compute_units: u32, in_use: bool) -> Device {
        Device::new(
            DeviceIdentity::new(0, index, "test", format!("dev{index}")),
            DeviceHandle {
                platform_offset: 0,
                index,
                class: DeviceClass::Gpu,
                raw: index as u64,
            },
            Capabilities::new(format!("dev{index}"), DeviceClass::Gpu, compute_units),
        )
        .with_in_use(in_use)
    }

    fn indices(pool: &DevicePool) -> Vec<usize> {
        pool.devices().iter().map(|d| d.identity().device_index).collect()
    }

    #[test]
    fn test_free_before_busy() {
        let mut pool = DevicePool::new(vec![device(0, 32, true), device(1, 8, false)]);
        pool.rank();
        assert_eq!(indices(&pool), vec![1, 0]);
    }

    #[test]
    fn test_more_compute_units_first() {
        let mut pool = DevicePool::new(vec![
            device(0, 4, false),
            device(1, 16, false),
            device(2, 8, false),
        ]);
        pool.rank();
        assert_eq!(indices(&pool), vec![1, 2, 0]);
    }

    #[test]
    fn test_ties_keep_discovery_order() {
        let mut pool = DevicePool::new(vec![
            device(0, 15, false),
            device(1, 15, true),
            device(2, 15, false),
            device(3, 15, true),
        ]);
        pool.rank();
        assert_eq!(indices(&pool), vec![0, 2, 1, 3]);
    }

    #[test]
    fn test_all_in_use() {
        assert!(!DevicePool::default().all_in_use());
        assert!(DevicePool::new(vec![device(0, 1, true), device(1, 2, true)]).all_in_use());
        assert!(!DevicePool::new(vec![device(0, 1, true), device(1, 2, false)]).all_in_use());
    }

    #[test]
    fn test_position_of() {
        let mut pool = DevicePool::new(vec![device(0, 1, false), device(1, 2, false)]);
        pool.rank();
        assert_eq!(pool.position_of(1), Some(0));
        assert_eq!(pool.position_of(0), Some(1));
        assert_eq!(pool.position_of(7), None);
    }

    fn pool_strategy() -> impl Strategy<Value = Vec<(bool, u32)>> {
        prop::collection::vec((any::<bool>(), 0u32..8), 0..24)
    }

    fn pool_from(layout: &[(bool, u32)]) -> DevicePool {
        DevicePool::new(
            layout.iter()
                .enumerate()
                .map(|(i, &(in_use, cu))| device(i, cu, in_use))
                .collect(),
        )
    }

    proptest! {
        #[test]
        fn prop_free_devices_precede_busy_ones(layout in pool_strategy()) {
            let mut pool = pool_from(&layout);
            pool.rank();
            let first_busy = pool.devices().iter().position(Device::in_use).unwrap_or(pool.len());
            prop_assert!(pool.devices()[first_busy..].iter().all(Device::in_use));
        }

        #[test]
        fn prop_compute_units_descend_within_availability(layout in pool_strategy()) {
            let mut pool = pool_from(&layout);
            pool.rank();
            for pair in pool.devices().windows(2) {
                if pair[0].in_use() == pair[1].in_use() {
                    prop_assert!(pair[0].compute_units() >= pair[1].compute_units());
                    if pair[0].compute_units() == pair[1].compute_units() {
                        prop_assert!(pair[0].identity().device_index < pair[1].identity().device_index);
                    }
                }
            }
        }

        #[test]
        fn prop_ranking_is_idempotent(layout in pool_strategy()) {
            let mut pool = pool_from(&layout);
            pool.rank();
            let once = indices(&pool);
            pool.rank();
            prop_assert_eq!(once, indices(&pool));
        }
    }
}
