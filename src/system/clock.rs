use railyard_core::Clock;

/// Milliseconds since boot, truncated to 32 bits so it wraps like a hardware tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct EspClock;

impl Clock for EspClock {
    fn now_ms(&self) -> u32 {
        let micros = unsafe { esp_idf_sys::esp_timer_get_time() };
        (micros / 1000) as u32
    }
}
