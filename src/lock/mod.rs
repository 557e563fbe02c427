//! Cross-process device locks.
//!
//! - [`identity`]: DeviceIdentity and the identity → lock-file path mapping
//! - [`retry`]: Attempt budget and randomized backoff shared by all retry loops
//! - [`store`]: Advisory lock acquisition and release on lock files

pub mod identity;
pub mod retry;
pub mod store;
