//! Timeline reference shared between the camera pipeline and other
//! subsystems (e.g. a depth pipeline).
//!
//! Sensor timestamps are monotonic nanoseconds. A [`TimelineBase`] pins one
//! monotonic instant to one wall-clock instant so every frame can be tagged
//! with a wall-clock millisecond value that external consumers understand.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the two clocks a timeline base is captured from.
pub trait Clock: Send + Sync {
    /// Monotonic time in nanoseconds, same domain as sensor timestamps.
    fn monotonic_ns(&self) -> i64;

    /// Wall-clock time in milliseconds since the Unix epoch.
    fn wall_clock_ms(&self) -> i64;
}

/// Clock backed by `CLOCK_MONOTONIC` and the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn monotonic_ns(&self) -> i64 {
        monotonic_now_ns()
    }

    fn wall_clock_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[cfg(unix)]
fn monotonic_now_ns() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec and CLOCK_MONOTONIC is always available.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        tracing::warn!("clock_gettime(CLOCK_MONOTONIC) failed with rc {}", rc);
        return 0;
    }
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

#[cfg(not(unix))]
fn monotonic_now_ns() -> i64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    ORIGIN.get_or_init(Instant::now).elapsed().as_nanos() as i64
}

/// Hand-driven clock for simulations and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    monotonic_ns: AtomicI64,
    wall_clock_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(monotonic_ns: i64, wall_clock_ms: i64) -> Self {
        Self {
            monotonic_ns: AtomicI64::new(monotonic_ns),
            wall_clock_ms: AtomicI64::new(wall_clock_ms),
        }
    }

    pub fn set(&self, monotonic_ns: i64, wall_clock_ms: i64) {
        self.monotonic_ns.store(monotonic_ns, Ordering::SeqCst);
        self.wall_clock_ms.store(wall_clock_ms, Ordering::SeqCst);
    }

    /// Advance both clocks by the same amount of nanoseconds.
    pub fn advance_ns(&self, delta_ns: i64) {
        self.monotonic_ns.fetch_add(delta_ns, Ordering::SeqCst);
        self.wall_clock_ms
            .fetch_add(delta_ns / 1_000_000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn monotonic_ns(&self) -> i64 {
        self.monotonic_ns.load(Ordering::SeqCst)
    }

    fn wall_clock_ms(&self) -> i64 {
        self.wall_clock_ms.load(Ordering::SeqCst)
    }
}

/// A (monotonic, wall-clock) origin pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineBase {
    pub monotonic_origin_ns: i64,
    pub wall_clock_origin_ms: i64,
}

impl TimelineBase {
    pub fn new(monotonic_origin_ns: i64, wall_clock_origin_ms: i64) -> Self {
        Self {
            monotonic_origin_ns,
            wall_clock_origin_ms,
        }
    }

    /// Read both clocks now. The origin always comes from the clock, never
    /// from a frame timestamp.
    pub fn capture(clock: &dyn Clock) -> Self {
        let monotonic_origin_ns = clock.monotonic_ns();
        let wall_clock_origin_ms = clock.wall_clock_ms();
        Self::new(monotonic_origin_ns, wall_clock_origin_ms)
    }

    /// Wall-clock milliseconds for a frame's monotonic timestamp.
    pub fn derive_wall_clock_ms(&self, frame_monotonic_ns: i64) -> i64 {
        let delta_ns = frame_monotonic_ns - self.monotonic_origin_ns;
        self.wall_clock_origin_ms + delta_ns / 1_000_000
    }
}
