//! nsefetch library
//!
//! The core is the cache-first, retrying, bounded fan-out in [`fetch`],
//! built from the on-disk [`cache`] and the [`retry`] policy. The market
//! client, exporters and CLI sit on top of it.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod logging;
pub mod market;
pub mod retry;

pub use cache::CacheStore;
pub use error::{CacheError, Error, FetchError, FetchErrorKind, Result};
pub use fetch::{FailurePolicy, FetchOptions, FetchOrchestrator, Resolution};
pub use retry::BackoffRetrier;
