//! Turning a ranked candidate into an exclusively held, ready device.
//!
//! Acquisition locks the device first and only then establishes an execution
//! context, retrying the context the same way lock contention is retried.
//! A device whose context never comes up is unlocked again before the caller
//! moves on to the next candidate.

use std::ops::Deref;
use std::thread;

use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::device::info::Device;
use crate::error::{ArbiterError, Result};
use crate::lock::retry::RetryPolicy;
use crate::lock::store::LockStore;

/// Locks devices and establishes execution contexts on them.
pub struct ContextAcquirer<'a, B: Backend> {
    backend: &'a B,
    store: &'a LockStore,
    policy: RetryPolicy,
}

impl<'a, B: Backend> ContextAcquirer<'a, B> {
    pub fn new(backend: &'a B, store: &'a LockStore, policy: RetryPolicy) -> Self {
        Self {
            backend,
            store,
            policy,
        }
    }

    /// Lock `device` and establish an execution context on it.
    ///
    /// Returns [`ArbiterError::LockBusy`] / [`ArbiterError::LockIo`] without
    /// touching the backend if the lock cannot be taken, and
    /// [`ArbiterError::ContextUnavailable`] (with the lock released) if every
    /// context attempt fails.
    pub fn acquire<'d>(&self, device: &'d mut Device) -> Result<OwnedDevice<'d, B::Context>> {
        if device.is_lockable() {
            device.lock(self.store)?;
        }

        let attempts = self.policy.attempts();
        for attempt in 1..=attempts {
            match self.backend.create_context(device.handle()) {
                Ok(context) => {
                    info!(
                        device = %device.identity(),
                        locked = device.is_locked(),
                        attempt,
                        "Established execution context"
                    );
                    return Ok(OwnedDevice {
                        context,
                        lease: Lease { device },
                    });
                }
                Err(e) if attempt < attempts => {
                    let delay = self.policy.backoff();
                    warn!(
                        device = %device.identity(),
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Context creation failed, waiting before retrying"
                    );
                    thread::sleep(delay);
                }
                Err(e) => {
                    warn!(device = %device.identity(), attempts, error = %e, "Context creation failed");
                }
            }
        }

        device.unlock();
        Err(ArbiterError::ContextUnavailable {
            device: device.identity().clone(),
            attempts,
        })
    }
}

/// Releases the device's lock when dropped.
#[derive(Debug)]
struct Lease<'d> {
    device: &'d mut Device,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if self.device.unlock() {
            info!(device = %self.device.identity(), "Released device");
        } else {
            debug!(device = %self.device.identity(), "Released unlocked device");
        }
    }
}

/// An exclusively held device with a live execution context.
///
/// Dropping it tears down the context and then releases the lock. If the
/// process dies instead, the OS releases the lock with the descriptor.
#[derive(Debug)]
pub struct OwnedDevice<'d, C> {
    // Declared before `lease` so the context is dropped while the lock is
    // still held.
    context: C,
    lease: Lease<'d>,
}

impl<'d, C> OwnedDevice<'d, C> {
    pub fn device(&self) -> &Device {
        &*self.lease.device
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Explicitly give the device back. Equivalent to dropping it.
    pub fn release(self) {
        drop(self);
    }
}

impl<C> Deref for OwnedDevice<'_, C> {
    type Target = Device;

    fn deref(&self) -> &Device {
        &*self.lease.device
    }
}
