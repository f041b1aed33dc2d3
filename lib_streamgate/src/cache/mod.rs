//! # Response Cache
//!
//! Shields the upstream query service from read load. Identical requests are
//! reduced to a canonical `Fingerprint`; the `CacheStore` keeps one response
//! per fingerprint and makes sure at most one upstream fetch per fingerprint
//! is in flight at any moment.

/// Canonical request keys.
pub mod fingerprint;
/// Endpoint classes and their TTLs.
pub mod policy;
/// TTL + LRU store with single-flight fills.
pub mod store;

pub use fingerprint::Fingerprint;
pub use policy::{EndpointClass, TtlPolicy};
pub use store::{CacheLookup, CacheStats, CacheStore, CachedResponse};
