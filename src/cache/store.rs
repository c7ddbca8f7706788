//! On-disk TTL cache for fetched payloads
//!
//! Each key is stored as its own JSON file holding the value, the time it was
//! written and its time-to-live. Expiry is checked lazily on read.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::CacheError;

/// Record stored on disk for every key
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    /// The cached payload
    value: T,
    /// When the payload was written
    stored_at: DateTime<Utc>,
    /// Time-to-live in milliseconds
    ttl_ms: u64,
}

impl<T> CacheEntry<T> {
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        // A record from the future (clock skew) counts as brand new.
        let age = (now - self.stored_at).to_std().unwrap_or(Duration::ZERO);
        age < Duration::from_millis(self.ttl_ms)
    }
}

/// A cached value together with its freshness
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry<T> {
    pub value: T,
    pub stored_at: DateTime<Utc>,
    /// Whether the entry's time-to-live has run out
    pub is_expired: bool,
}

/// Durable key-value store with per-entry time-to-live
///
/// Cloning is cheap and every clone addresses the same directory. Writes go
/// through a temporary file that is renamed into place, so a reader never sees
/// a half-written record.
#[derive(Debug, Clone)]
pub struct CacheStore {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
    /// TTL applied by [`CacheStore::set_default`]
    default_ttl: Duration,
}

impl CacheStore {
    /// Creates a store in the XDG cache directory (`~/.cache/nsefetch/` on Linux)
    ///
    /// Returns `None` if the cache directory cannot be determined.
    pub fn new(default_ttl: Duration) -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "nsefetch")?;
        Some(Self::with_dir(project_dirs.cache_dir(), default_ttl))
    }

    /// Creates a store rooted at a specific directory
    pub fn with_dir(cache_dir: impl Into<PathBuf>, default_ttl: Duration) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            default_ttl,
        }
    }

    /// Builds the store described by the configuration, if caching is enabled
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        match &config.dir {
            Some(dir) => Some(Self::with_dir(dir, config.default_ttl)),
            None => Self::new(config.default_ttl),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", file_stem(key)))
    }

    /// Returns the value for `key` if it exists and has not expired
    ///
    /// Missing, expired, unreadable and corrupt records are all a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.peek(key)
            .filter(|entry| !entry.is_expired)
            .map(|entry| entry.value)
    }

    /// Returns the entry for `key` even if it has expired
    pub fn peek<T: DeserializeOwned>(&self, key: &str) -> Option<CachedEntry<T>> {
        let entry = match self.read_entry::<T>(key) {
            Ok(entry) => entry?,
            Err(err) => {
                debug!(key, error = %err, "treating unreadable cache record as a miss");
                return None;
            }
        };

        let is_expired = !entry.is_valid_at(Utc::now());
        Some(CachedEntry {
            value: entry.value,
            stored_at: entry.stored_at,
            is_expired,
        })
    }

    fn read_entry<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<CacheEntry<T>>, CacheError> {
        let path = self.cache_path(key);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(CacheError::Read {
                    path,
                    reason: err.to_string(),
                })
            }
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|err| CacheError::Read {
                path,
                reason: err.to_string(),
            })
    }

    /// Stores `value` under `key` with the store's default TTL
    pub fn set_default<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        self.set(key, value, self.default_ttl)
    }

    /// Stores `value` under `key`, replacing any previous entry
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError> {
        let path = self.cache_path(key);
        let write_err = |source: io::Error| CacheError::Write {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.cache_dir).map_err(write_err)?;

        let entry = CacheEntry {
            value,
            stored_at: Utc::now(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        let json = serde_json::to_vec(&entry)
            .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let mut file = NamedTempFile::new_in(&self.cache_dir).map_err(write_err)?;
        file.write_all(&json).map_err(write_err)?;
        file.persist(&path).map_err(|e| write_err(e.error))?;

        debug!(key, ttl_ms = entry.ttl_ms, "stored cache entry");
        Ok(())
    }

    /// Removes the entry for `key`; a missing entry is not an error
    pub fn delete(&self, key: &str) -> Result<(), CacheError> {
        let path = self.cache_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Remove { path, source }),
        }
    }

    /// Removes every entry, returning how many records were deleted
    ///
    /// Records that vanish concurrently are skipped, and records that cannot be
    /// removed are logged and left behind.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(CacheError::Remove {
                    path: self.cache_dir.clone(),
                    source,
                })
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to remove cache record")
                }
            }
        }

        Ok(removed)
    }
}

/// Maps an arbitrary key onto a file name that cannot escape the cache directory
///
/// Bytes outside `[A-Za-z0-9_.-]` (and a leading dot) are written as `%XX`.
fn file_stem(key: &str) -> String {
    if key.is_empty() {
        return "%".to_string();
    }

    let mut stem = String::with_capacity(key.len());
    for (i, byte) in key.bytes().enumerate() {
        let safe = byte.is_ascii_alphanumeric()
            || byte == b'_'
            || byte == b'-'
            || (byte == b'.' && i > 0);
        if safe {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}
