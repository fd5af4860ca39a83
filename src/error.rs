//! Error Types
//!
//! Only two things can go wrong at this layer: the backing store is unreachable,
//! or the caller broke the lock contract. A load that loses a race is *not* an
//! error; see [`PutOutcome`](crate::strategy::PutOutcome).

/// Errors surfaced by the read-write strategy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The distributed map behind the region could not be reached.
    ///
    /// Callers must treat the cache as absent and go to the authoritative store.
    /// This is never reported as a plain miss.
    #[error("cache region '{region}' is unavailable: {reason}")]
    InfrastructureUnavailable {
        /// Region name.
        region: String,
        /// Substrate-provided description.
        reason: String,
    },

    /// `release` or `after_update` was called with a token that does not hold the
    /// key's soft lock (double release, expired hold, wrong key).
    #[error("cache region '{region}': lock token {holder} does not hold lock {lock_id}")]
    InvalidLockToken {
        /// Region name.
        region: String,
        /// Generation of the lock the token was issued for.
        lock_id: u64,
        /// Holder id carried by the token.
        holder: u64,
    },

    /// A region was configured with values it cannot run with.
    #[error("invalid region configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Returns `true` if the error means "fall back to the authoritative store".
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::InfrastructureUnavailable { .. })
    }
}

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, CacheError>;
