//! Region Configuration
//!
//! [`RegionConfig`] is a plain struct with public fields: create it with struct
//! update syntax over [`Default`] and hand it to
//! [`ReadWriteStrategy::new`](crate::ReadWriteStrategy::new), which calls
//! [`RegionConfig::validate`] before building anything.
//!
//! # Timing Parameters
//!
//! ```text
//!   lock()                 release()                      purge
//!     │◀──── lock_timeout ────▶│                             │
//!     │   (held; abandoned     │◀─────── unlock_grace ──────▶│ record dropped
//!     │    if exceeded)        │  (record kept so late loads │
//!                              │   are still rejected)       │
//! ```
//!
//! `unlock_grace` must comfortably exceed the longest time between a load
//! capturing its timestamp and calling `put_from_load`. A record purged before a
//! slow load arrives can no longer reject it.
//!
//! # Examples
//!
//! ```
//! use core::time::Duration;
//! use rw_cache::config::RegionConfig;
//!
//! let config = RegionConfig {
//!     name: "com.example.Order".into(),
//!     segments: 8,
//!     unlock_grace: Duration::from_secs(120),
//!     ..RegionConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{CacheError, Result};
use core::fmt;
use core::time::Duration;

/// Returns the default number of lock-table and map segments based on available
/// parallelism.
pub fn default_segment_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(16)
        .clamp(4, 64)
}

/// Configuration of one cache region.
#[derive(Clone)]
pub struct RegionConfig {
    /// Region name, used in errors, logs and metrics.
    pub name: String,

    /// Number of independently locked segments of the soft-lock table and of the
    /// local entry map.
    pub segments: usize,

    /// How long a released lock record is retained so that loads which started
    /// before the release are still rejected.
    pub unlock_grace: Duration,

    /// How long a soft lock may stay held before `purge_expired_locks` treats its
    /// holders as abandoned.
    pub lock_timeout: Duration,

    /// Skip `put_from_load` whenever a valid entry already exists, for every call
    /// regardless of the per-call flag.
    pub minimal_puts: bool,

    /// Physically clear the entry map on `evict_all` after raising the marker.
    /// When `false`, invalidated entries are discarded lazily.
    pub clear_on_evict_all: bool,
}

impl RegionConfig {
    /// Creates a default configuration for region `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CacheError::InvalidConfig(
                "region name must not be empty".to_string(),
            ));
        }
        if self.segments == 0 {
            return Err(CacheError::InvalidConfig(format!(
                "region '{}': segments must be > 0",
                self.name
            )));
        }
        if self.lock_timeout.is_zero() {
            return Err(CacheError::InvalidConfig(format!(
                "region '{}': lock_timeout must be > 0",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            segments: default_segment_count(),
            unlock_grace: Duration::from_secs(60),
            lock_timeout: Duration::from_secs(60),
            minimal_puts: false,
            clear_on_evict_all: false,
        }
    }
}

impl fmt::Debug for RegionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionConfig")
            .field("name", &self.name)
            .field("segments", &self.segments)
            .field("unlock_grace", &self.unlock_grace)
            .field("lock_timeout", &self.lock_timeout)
            .field("minimal_puts", &self.minimal_puts)
            .field("clear_on_evict_all", &self.clear_on_evict_all)
            .finish()
    }
}
