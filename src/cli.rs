//! Command-line interface parsing for nsefetch
//!
//! This module handles parsing of CLI arguments using clap. Global flags tune
//! the cache, retry and concurrency behavior; subcommands pick what to fetch.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use thiserror::Error;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// The symbol contains characters NSE never uses
    #[error("Invalid symbol: '{0}'. Symbols may contain letters, digits, '&', '-', '_' and '.'")]
    InvalidSymbol(String),

    #[error("Invalid concurrency: must be at least 1")]
    ZeroConcurrency,

    #[error("Invalid timeout: must be at least 1 second")]
    ZeroTimeout,

    #[error("Invalid output file: '{0}'. Use a .json or .csv extension")]
    UnsupportedOutput(PathBuf),

    #[error("Invalid index: name must not be empty")]
    EmptyIndex,
}

/// nsefetch - NSE India market data with caching, retries and concurrent fetches
#[derive(Parser, Debug)]
#[command(name = "nsefetch")]
#[command(about = "NSE India market data with caching, retries and concurrent fetches")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory for cached responses (defaults to the XDG cache directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Neither read nor write the cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Seconds a cached response stays fresh
    #[arg(long, global = true, value_name = "SECS", default_value_t = 300)]
    pub ttl: u64,

    /// Maximum number of requests in flight
    #[arg(long, global = true, value_name = "N", default_value_t = 8)]
    pub concurrency: usize,

    /// Attempts per request, including the first
    #[arg(long, global = true, value_name = "N", default_value_t = 3)]
    pub retries: u32,

    /// Wait before the first retry, doubled for each further retry
    #[arg(long, global = true, value_name = "MS", default_value_t = 1000)]
    pub base_delay_ms: u64,

    /// Timeout for a single HTTP request
    #[arg(long, global = true, value_name = "SECS", default_value_t = 15)]
    pub timeout: u64,

    /// Give up on whatever is still pending after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Leave failed symbols out instead of reporting them
    #[arg(long, global = true)]
    pub keep_going: bool,

    /// Fall back to an expired cached response when a request fails
    #[arg(long, global = true)]
    pub stale_on_error: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Also append logs to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch equity quotes for one or more symbols concurrently
    ///
    /// Examples:
    ///   nsefetch quote INFY TCS HDFCBANK
    ///   nsefetch quote INFY TCS --output quotes.csv
    Quote {
        /// Stock symbols, e.g. INFY
        #[arg(required = true, value_name = "SYMBOL")]
        symbols: Vec<String>,

        /// Write the quotes to a .json or .csv file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show whether each market segment is open
    Status,

    /// Constituents of an index that gained the most today
    ///
    /// Example:
    ///   nsefetch gainers --index "NIFTY BANK" --count 5
    Gainers(MoversArgs),

    /// Constituents of an index that lost the most today
    Losers(MoversArgs),

    /// Manage cached responses
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

/// Arguments shared by `gainers` and `losers`
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct MoversArgs {
    /// Index whose constituents are ranked
    #[arg(long, default_value = "NIFTY 50")]
    pub index: String,

    /// Number of constituents to show
    #[arg(long, default_value_t = 10)]
    pub count: usize,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum CacheCommand {
    /// Remove every cached response
    Clear,

    /// Remove the cached quotes for the given symbols
    Delete {
        #[arg(required = true, value_name = "SYMBOL")]
        symbols: Vec<String>,
    },
}

/// Parses a symbol argument into its canonical upper-case form.
///
/// # Arguments
/// * `s` - The symbol string from CLI
///
/// # Returns
/// * `Ok(String)` with the trimmed, upper-cased symbol
/// * `Err(CliError::InvalidSymbol)` if the symbol is empty or has stray characters
pub fn parse_symbol_arg(s: &str) -> Result<String, CliError> {
    let symbol = s.trim();
    let valid = !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '&' | '-' | '_' | '.'));
    if valid {
        Ok(symbol.to_ascii_uppercase())
    } else {
        Err(CliError::InvalidSymbol(s.to_string()))
    }
}
