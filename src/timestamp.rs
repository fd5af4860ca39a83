//! Logical Timestamps
//!
//! Every ordering decision the read-write strategy makes (is this load older than
//! that unlock? was this entry written before the region was invalidated?) is a
//! comparison between two [`Timestamp`]s handed out by a [`TimestampSource`].
//!
//! # Tick Resolution
//!
//! A timestamp is a `u64` counted in *ticks*. One millisecond is 4096 ticks: the
//! upper bits carry wall-clock milliseconds, the lower 12 bits carry a tie-break
//! counter so that thousands of timestamps can be issued within one millisecond
//! while staying strictly increasing.
//!
//! ```text
//! ┌────────────────────────────────────────────┬──────────────┐
//! │          milliseconds since epoch          │  tie-break   │
//! │                 (52 bits)                  │  (12 bits)   │
//! └────────────────────────────────────────────┴──────────────┘
//! ```
//!
//! The protocol only relies on the ordering property, never on wall-clock meaning.
//! Durations (grace windows, lock timeouts) are converted to ticks with
//! [`Timestamp::saturating_add`].
//!
//! # Sources
//!
//! | Source | Use |
//! |--------|-----|
//! | [`LocalTimestamper`] | Production default, wall clock plus tie-break |
//! | [`ManualClock`] | Deterministic tests and simulations |

use core::fmt;
use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of bits reserved for the tie-break counter.
const TIE_BREAK_BITS: u32 = 12;

/// A point on the region's logical clock.
///
/// Ordering is total; equality means "issued at the same logical instant", which
/// the strategy treats as *not newer* (ties reject).
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The zero timestamp. Older than anything a source hands out.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Ticks per millisecond.
    pub const TICKS_PER_MILLI: u64 = 1 << TIE_BREAK_BITS;

    /// Creates a timestamp from a raw tick count.
    #[inline]
    pub const fn from_ticks(ticks: u64) -> Self {
        Timestamp(ticks)
    }

    /// Creates a timestamp at the start of the given millisecond.
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis.saturating_mul(Self::TICKS_PER_MILLI))
    }

    /// Returns the raw tick count.
    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Returns the millisecond part, dropping the tie-break counter.
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 >> TIE_BREAK_BITS
    }

    /// Returns this timestamp moved `duration` into the future, saturating at `u64::MAX`.
    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration_to_ticks(duration)))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{}",
            self.millis(),
            self.0 & (Self::TICKS_PER_MILLI - 1)
        )
    }
}

fn duration_to_ticks(duration: Duration) -> u64 {
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    millis.saturating_mul(Timestamp::TICKS_PER_MILLI)
}

/// Hands out monotonically increasing timestamps.
///
/// # Contract
///
/// - `next()` never fails. If the backing clock is unavailable the implementation
///   must fall back to a local counter rather than error.
/// - Each returned value is strictly greater than every value previously returned
///   by the same source.
///
/// A cluster deployment shares one logical clock across nodes by implementing this
/// trait over a cluster-coordinated counter.
pub trait TimestampSource: Send + Sync {
    /// Returns the next timestamp.
    fn next(&self) -> Timestamp;
}

/// Wall-clock-plus-tie-break timestamp source.
///
/// Combines `SystemTime::now()` (in milliseconds, shifted into the upper bits) with
/// a compare-and-swap loop over the last issued value, so the result is
/// `max(wall_clock, last + 1)`. A wall clock that steps backwards never makes the
/// source go backwards; it just degrades to a counter until the clock catches up.
///
/// # Example
///
/// ```
/// use rw_cache::timestamp::{LocalTimestamper, TimestampSource};
///
/// let clock = LocalTimestamper::new();
/// let a = clock.next();
/// let b = clock.next();
/// assert!(b > a);
/// ```
#[derive(Debug, Default)]
pub struct LocalTimestamper {
    last: AtomicU64,
}

impl LocalTimestamper {
    /// Creates a new timestamper.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    fn wall_clock() -> u64 {
        // Before the epoch means no usable clock: the counter alone carries order.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX >> TIE_BREAK_BITS))
            .map(|millis| millis << TIE_BREAK_BITS)
            .unwrap_or(0)
    }
}

impl TimestampSource for LocalTimestamper {
    fn next(&self) -> Timestamp {
        let wall = Self::wall_clock();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = wall.max(last.saturating_add(1));
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Timestamp(candidate),
                Err(observed) => last = observed,
            }
        }
    }
}

/// A hand-driven clock for deterministic tests and simulations.
///
/// Every call to `next()` moves the clock forward by one tick and returns the new
/// value. [`advance`](Self::advance) jumps further ahead, modelling elapsed time.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use rw_cache::timestamp::{ManualClock, TimestampSource};
///
/// let clock = ManualClock::new();
/// let t0 = clock.next();
/// clock.advance(Duration::from_secs(1));
/// let t1 = clock.next();
/// assert!(t1.millis() >= t0.millis() + 1000);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock at tick zero.
    pub fn new() -> Self {
        Self::starting_at(Timestamp::ZERO)
    }

    /// Creates a clock whose next timestamp follows `start`.
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start.ticks()),
        }
    }

    /// Returns the last issued timestamp without advancing.
    pub fn peek(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::Acquire))
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.now.fetch_add(duration_to_ticks(duration), Ordering::AcqRel);
    }

    /// Moves the clock forward to `to`. Never moves it backwards.
    pub fn advance_to(&self, to: Timestamp) {
        self.now.fetch_max(to.ticks(), Ordering::AcqRel);
    }
}

impl TimestampSource for ManualClock {
    fn next(&self) -> Timestamp {
        Timestamp(self.now.fetch_add(1, Ordering::AcqRel) + 1)
    }
}
