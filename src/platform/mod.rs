//! Platform registry and device acquisition.
//!
//! - [`vendor`]: Closed set of recognized vendors
//! - [`registry`]: Vendor-keyed platforms and preferred-device resolution
//! - [`acquirer`]: Lock + context establishment with retry, owned device guard

pub mod acquirer;
pub mod registry;
pub mod vendor;
