//! Cache module for storing fetched payloads on disk
//!
//! This module provides a store that persists values to the filesystem with a
//! per-entry TTL (time-to-live). Expired entries read as misses through
//! [`CacheStore::get`] but stay available through [`CacheStore::peek`], so
//! callers can fall back to stale data when the API is unavailable.

mod store;

pub use store::{CacheStore, CachedEntry};
