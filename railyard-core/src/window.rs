//! Time-limited authorization for update endpoints.

use crate::clock::remaining_ms;

pub const DEFAULT_WINDOW_MS: u32 = 60_000;

/// Tracks whether updates are currently authorized.
///
/// Expiry is lazy: the window closes the first time anyone observes
/// `now >= expires_at_ms`, there is no timer behind it. The main loop and
/// every gated handler poll it, which bounds how stale it can get.
#[derive(Debug, Clone)]
pub struct AccessWindow {
    is_open: bool,
    expires_at_ms: u32,
    duration_ms: u32,
}

impl Default for AccessWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

impl AccessWindow {
    /// Created closed.
    pub fn new(duration_ms: u32) -> Self {
        Self {
            is_open: false,
            expires_at_ms: 0,
            duration_ms,
        }
    }

    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    /// (Re)arms the window to `now + duration`, whatever its prior state.
    pub fn open(&mut self, now: u32) {
        self.is_open = true;
        self.expires_at_ms = now.wrapping_add(self.duration_ms);
        log::info!("OTA window opened for {} ms", self.duration_ms);
    }

    pub fn cancel(&mut self) {
        if self.is_open {
            log::info!("OTA window cancelled");
        }
        self.is_open = false;
    }

    pub fn is_active(&mut self, now: u32) -> bool {
        if !self.is_open {
            return false;
        }
        if remaining_ms(self.expires_at_ms, now) <= 0 {
            self.is_open = false;
            log::info!("OTA window expired");
            return false;
        }
        true
    }

    pub fn seconds_left(&mut self, now: u32) -> u32 {
        if !self.is_active(now) {
            return 0;
        }
        let ms_left = remaining_ms(self.expires_at_ms, now) as u32;
        ms_left.div_ceil(1000)
    }
}
