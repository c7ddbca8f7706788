//! Cache-first, bounded-concurrency fan-out of fetches
//!
//! [`FetchOrchestrator::resolve_all`] takes a set of opaque keys and a fetch
//! function, answers what it can from the [`CacheStore`](crate::cache::CacheStore),
//! and fetches the rest in parallel under a [`BackoffRetrier`](crate::retry::BackoffRetrier).

mod options;
mod orchestrator;

pub use options::{FailurePolicy, FetchOptions};
pub use orchestrator::{FetchOrchestrator, Resolution};
