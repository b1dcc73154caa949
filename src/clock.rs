//! Time sources.
//!
//! Every decision samples a [`Now`] once: a wall-clock instant for the
//! durable timestamps and a monotonic reading for idle measurements, which
//! must survive wall-clock adjustments.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// A reading on the monotonic clock, expressed as the time elapsed since a
/// fixed origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MonotonicTime(Duration);

impl MonotonicTime {
    pub const fn from_duration(since_origin: Duration) -> Self {
        Self(since_origin)
    }

    pub const fn as_duration(self) -> Duration {
        self.0
    }

    /// Time elapsed since `earlier`, or `None` when `earlier` is in the future.
    pub fn checked_duration_since(self, earlier: MonotonicTime) -> Option<Duration> {
        self.0.checked_sub(earlier.0)
    }

    /// Moves the reading back by `delta`, saturating at the origin.
    pub fn saturating_sub(self, delta: Duration) -> Self {
        Self(self.0.saturating_sub(delta))
    }

    pub fn saturating_add(self, delta: Duration) -> Self {
        Self(self.0.saturating_add(delta))
    }
}

/// A single sample of both clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Now {
    /// Wall-clock time, used for everything that is persisted.
    pub wall: DateTime<Utc>,
    /// Monotonic time, used for idle measurements.
    pub monotonic: MonotonicTime,
}

/// Supplies the current time. All scheduling logic is expressed relative to it.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Now;
}

/// Elapsed wall-clock time between two instants.
///
/// Returns `None` when `later` precedes `earlier` (clock skew).
pub fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Option<Duration> {
    (later - earlier).to_std().ok()
}

/// Shifts a wall-clock instant forward, saturating at the far future.
pub fn wall_after(at: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delta)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn process_origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// Reads `CLOCK_MONOTONIC`, the clock session managers report idle hints on.
#[cfg(unix)]
fn system_monotonic() -> MonotonicTime {
    // SAFETY: timespec is plain old data; all-zero is a valid value.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: `ts` is a valid, writable timespec.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return MonotonicTime::from_duration(process_origin().elapsed());
    }
    let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
    let nanos = u32::try_from(ts.tv_nsec).unwrap_or(0);
    MonotonicTime::from_duration(Duration::new(secs, nanos))
}

#[cfg(not(unix))]
fn system_monotonic() -> MonotonicTime {
    MonotonicTime::from_duration(process_origin().elapsed())
}

/// The real clocks.
///
/// On unix the monotonic reading is `CLOCK_MONOTONIC` (time since boot, not
/// counting suspend), so idle hints from the session manager compare directly.
/// Elsewhere all instances share one process-wide origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> Now {
        Now {
            wall: Utc::now(),
            monotonic: system_monotonic(),
        }
    }
}

/// A hand-driven clock for tests and simulations.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<Now>>,
}

impl ManualClock {
    /// Start at `wall` with the monotonic clock at `monotonic`.
    pub fn new(wall: DateTime<Utc>, monotonic: MonotonicTime) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Now { wall, monotonic })),
        }
    }

    /// Start at `wall`, with an arbitrary monotonic origin far enough from zero
    /// that idle readings can reach back several days.
    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self::new(
            wall,
            MonotonicTime::from_duration(Duration::from_secs(30 * 24 * 3600)),
        )
    }

    /// Advance both clocks by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.lock();
        now.wall = wall_after(now.wall, delta);
        now.monotonic = now.monotonic.saturating_add(delta);
    }

    /// Move only the wall clock, as an NTP step or manual adjustment would.
    pub fn set_wall(&self, wall: DateTime<Utc>) {
        self.lock().wall = wall;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Now> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Now {
        *self.lock()
    }
}
