//! Millisecond time source shared by the update core.
//!
//! The device counter is 32 bits wide and wraps after ~49.7 days, so every
//! comparison goes through [`remaining_ms`] instead of plain `<`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Monotonic millisecond clock. Wraps at `u32::MAX`.
pub trait Clock: Send {
    fn now_ms(&self) -> u32;
}

/// Signed distance from `now` to `deadline`, correct across one wrap.
pub fn remaining_ms(deadline: u32, now: u32) -> i32 {
    deadline.wrapping_sub(now) as i32
}

/// Signed time elapsed since `since`, correct across one wrap.
pub fn elapsed_ms(since: u32, now: u32) -> i32 {
    now.wrapping_sub(since) as i32
}

/// Hand-driven clock for host tests and simulations.
///
/// Clones share the same counter, so a test can keep one handle and give
/// another to the controller.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u32) {
        let now = self.now.load(Ordering::SeqCst);
        self.now.store(now.wrapping_add(ms), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}
