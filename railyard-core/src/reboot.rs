use crate::clock::elapsed_ms;

/// Deferred restart after a successful commit.
///
/// The success reply must reach the client before the device goes down, so
/// a due reboot is only reported once `drain_ms` has passed since arming.
/// There is no way to cancel an armed reboot.
#[derive(Debug)]
pub struct RebootScheduler {
    pending: bool,
    armed_at_ms: u32,
    drain_ms: u32,
    fired: bool,
}

impl RebootScheduler {
    pub fn new(drain_ms: u32) -> Self {
        Self {
            pending: false,
            armed_at_ms: 0,
            drain_ms,
            fired: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn arm(&mut self, now: u32) {
        if self.pending || self.fired {
            return;
        }
        self.pending = true;
        self.armed_at_ms = now;
        log::info!("Reboot armed, restarting in {} ms", self.drain_ms);
    }

    /// True exactly once, when the drain delay has elapsed.
    pub fn take_due(&mut self, now: u32) -> bool {
        if !self.pending || self.fired {
            return false;
        }
        if elapsed_ms(self.armed_at_ms, now) < self.drain_ms as i32 {
            return false;
        }
        self.fired = true;
        true
    }
}
