use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// One-shot "capture the next frame" latch.
///
/// Any thread may arm it any number of times; each arming is consumed by at
/// most one frame, whichever frame-arrival event wins the compare-and-swap.
#[derive(Debug, Default)]
pub struct CaptureSignal {
    armed: AtomicBool,
}

impl CaptureSignal {
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
        }
    }

    /// Arm the latch. Arming an already armed latch has no further effect.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
        trace!("Capture signal armed");
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Atomically clear the latch; returns true only for the caller that
    /// observed it armed.
    pub fn try_consume(&self) -> bool {
        self.armed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
