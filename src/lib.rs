//! device-arbiter: exclusive compute device arbitration on a single node.
//!
//! Independent processes that each want one accelerator from a shared pool
//! agree on who owns what through advisory file locks, with no broker or
//! daemon. A lock is bound to its file descriptor, so a process that crashes
//! never leaves a device locked.
//!
//! ```text
//! PlatformRegistry::initialize
//!     → Backend::platforms, grouped by Vendor
//!     → DevicePool::discover (probe + in-use lock probe per device)
//! PlatformRegistry::acquire_preferred_device
//!     → DevicePool::rank (free first, then most compute units)
//!     → ContextAcquirer::acquire per candidate (lock, then context)
//!     → OwnedDevice, released on drop
//! ```

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod lock;
pub mod platform;

pub use backend::{Backend, BackendError, DeviceHandle, PlatformInfo, ProbeError};
pub use device::info::{Capabilities, Device, DeviceClass};
pub use device::pool::DevicePool;
pub use error::{ArbiterError, Result};
pub use lock::identity::DeviceIdentity;
pub use lock::retry::RetryPolicy;
pub use lock::store::{LockError, LockStore, LockToken};
pub use platform::acquirer::{ContextAcquirer, OwnedDevice};
pub use platform::registry::{Platform, PlatformRegistry, RegistryOptions};
pub use platform::vendor::Vendor;
