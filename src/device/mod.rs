//! Devices and per-platform device pools.
//!
//! - [`info`]: Capability snapshot and lock state of a single device
//! - [`pool`]: Ordered device collection and the ranking algorithm

pub mod info;
pub mod pool;
