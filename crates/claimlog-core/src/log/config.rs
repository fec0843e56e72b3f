//! Durable log configuration.

use std::path::{Path, PathBuf};

/// Default page cache for the constraint trees.
pub const DEFAULT_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

/// Default background flush interval.
pub const DEFAULT_FLUSH_EVERY_MS: u64 = 500;

/// How to open the sled database behind a [`SledLog`](super::SledLog).
///
/// Claims are tiny and write-once, so the defaults favour a small cache and
/// frequent background flushes. Call [`SledLog::flush`](super::SledLog::flush)
/// when a claim must be on disk before replying.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory of the log; `None` opens a throwaway database that is
    /// removed when dropped.
    pub location: Option<PathBuf>,

    /// Bytes of page cache.
    pub cache_capacity: u64,

    /// Background flush interval. `None` leaves flushing to the caller.
    pub flush_every_ms: Option<u64>,

    /// Compress stored records with zstd.
    pub compression: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("./claimlog_data")
    }
}

impl LogConfig {
    /// Log stored under `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Some(path.into()),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            flush_every_ms: Some(DEFAULT_FLUSH_EVERY_MS),
            compression: true,
        }
    }

    /// Throwaway log, used by tests.
    pub fn temporary() -> Self {
        Self {
            location: None,
            ..Self::default()
        }
    }

    /// Whether the log disappears on drop.
    pub fn is_temporary(&self) -> bool {
        self.location.is_none()
    }

    /// Directory of a persistent log.
    pub fn path(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    pub fn with_flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(self.compression)
            .flush_every_ms(self.flush_every_ms);

        match &self.location {
            Some(path) => config.path(path),
            None => config.temporary(true),
        }
    }
}
