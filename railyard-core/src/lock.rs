use crate::error::OtaError;

/// Device-wide single-flight guard for update sessions.
///
/// Shared by both flash targets. There is no queue and no timeout here;
/// the controller's idle timeout is what eventually frees a stalled holder.
#[derive(Debug, Default)]
pub struct ExclusivityLock {
    locked: bool,
}

impl ExclusivityLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only check used by non-update endpoints.
    pub fn is_busy(&self) -> bool {
        self.locked
    }

    /// Not reentrant: a second acquire fails while held.
    pub fn acquire(&mut self) -> Result<(), OtaError> {
        if self.locked {
            return Err(OtaError::SessionBusy);
        }
        self.locked = true;
        log::debug!("OTA lock acquired");
        Ok(())
    }

    pub fn release(&mut self) {
        if self.locked {
            log::debug!("OTA lock released");
        }
        self.locked = false;
    }
}
