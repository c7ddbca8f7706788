//! Market-data endpoints built on top of the fetch layer
//!
//! The orchestrator only sees opaque keys. This module owns the mapping from
//! symbols to cache keys and back, and the HTTP client that turns a key into
//! a JSON payload.

mod client;
mod movers;
mod status;

pub use client::{classify_status, MarketClient, NSE_BASE_URL};
pub use movers::{top_movers, Direction};
pub use status::{parse_market_status, MarketStatus};

const QUOTE_KEY_PREFIX: &str = "quote_";
const INDEX_KEY_PREFIX: &str = "index_";

/// Cache key for the quote of `symbol`
pub fn quote_cache_key(symbol: &str) -> String {
    format!("{}{}", QUOTE_KEY_PREFIX, symbol.trim().to_uppercase())
}

/// Symbol encoded in a key built by [`quote_cache_key`]
pub fn symbol_from_quote_key(key: &str) -> Option<&str> {
    key.strip_prefix(QUOTE_KEY_PREFIX)
}

/// Cache key for the constituents of `index`
pub fn index_cache_key(index: &str) -> String {
    format!("{}{}", INDEX_KEY_PREFIX, index.trim().to_uppercase())
}
