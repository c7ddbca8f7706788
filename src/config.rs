//! Runtime configuration
//!
//! Everything the binary needs is collected into one [`Config`] value up front
//! and handed to the constructors that need it.

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::{parse_symbol_arg, Cli, CliError, Command};
use crate::export::ExportFormat;
use crate::fetch::{FailurePolicy, FetchOptions};
use crate::market::NSE_BASE_URL;

/// Configuration for the on-disk cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether responses are cached at all
    pub enabled: bool,
    /// Cache directory; `None` uses the XDG cache directory
    pub dir: Option<PathBuf>,
    /// TTL for entries stored without an explicit one
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            default_ttl: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Configuration for the HTTP client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Timeout for a single request
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: NSE_BASE_URL.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Configuration for log output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig {
    /// Number of `-v` flags given
    pub verbosity: u8,
    /// Additional log file, appended to
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub cache: CacheConfig,
    pub client: ClientConfig,
    pub fetch: FetchOptions,
    pub log: LogConfig,
}

impl Config {
    /// Builds the configuration from parsed CLI arguments
    ///
    /// # Returns
    /// * `Ok(Config)` with every section filled in
    /// * `Err(CliError)` if an argument is out of range or a symbol is invalid
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        if cli.concurrency == 0 {
            return Err(CliError::ZeroConcurrency);
        }
        if cli.timeout == 0 {
            return Err(CliError::ZeroTimeout);
        }

        match &cli.command {
            Command::Quote { symbols, output } => {
                for symbol in symbols {
                    parse_symbol_arg(symbol)?;
                }
                if let Some(path) = output {
                    ExportFormat::from_path(path)
                        .map_err(|_| CliError::UnsupportedOutput(path.clone()))?;
                }
            }
            Command::Gainers(args) | Command::Losers(args) => {
                if args.index.trim().is_empty() {
                    return Err(CliError::EmptyIndex);
                }
            }
            Command::Cache { .. } | Command::Status => {}
        }

        let ttl = Duration::from_secs(cli.ttl);
        let cache = CacheConfig {
            enabled: !cli.no_cache,
            dir: cli.cache_dir.clone(),
            default_ttl: ttl,
        };

        let client = ClientConfig {
            timeout: Duration::from_secs(cli.timeout),
            ..ClientConfig::default()
        };

        let fetch = FetchOptions {
            cache_ttl: Some(ttl),
            max_concurrency: Some(cli.concurrency),
            max_retries: cli.retries,
            base_delay: Duration::from_millis(cli.base_delay_ms),
            failure_policy: if cli.keep_going {
                FailurePolicy::DropSilently
            } else {
                FailurePolicy::CollectErrors
            },
            attempt_timeout: None,
            deadline: cli.deadline.map(Duration::from_secs),
            stale_on_error: cli.stale_on_error,
        };

        let log = LogConfig {
            verbosity: cli.verbose,
            file: cli.log_file.clone(),
        };

        Ok(Config {
            cache,
            client,
            fetch,
            log,
        })
    }
}
