//! Flash destinations and the driver seam that programs them.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Which flash region an update session writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateTarget {
    /// Executable image, committed to the next boot partition.
    Firmware,
    /// Filesystem image for the data volume.
    DataVolume,
}

impl UpdateTarget {
    /// Short tag used in log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            UpdateTarget::Firmware => "FW",
            UpdateTarget::DataVolume => "FS",
        }
    }

    /// Human name used in HTTP replies.
    pub fn label(&self) -> &'static str {
        match self {
            UpdateTarget::Firmware => "Firmware",
            UpdateTarget::DataVolume => "Filesystem",
        }
    }
}

impl fmt::Display for UpdateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Driver failure carrying its textual reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FlashError(pub String);

impl FlashError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Low-level erase/program/commit cycle against one flash region.
///
/// Sessions never announce a total length: multipart framing makes the
/// transport's Content-Length larger than the payload.
pub trait FlashUpdater: Send {
    /// Starts a write of unknown total length.
    fn begin(&mut self, target: UpdateTarget) -> Result<(), FlashError>;

    /// Returns how many bytes were accepted; fewer than `data.len()` is a failure.
    fn write(&mut self, data: &[u8]) -> Result<usize, FlashError>;

    /// Makes the written image active for the next boot.
    fn commit(&mut self) -> Result<(), FlashError>;

    /// Discards a partial write. Safe to call with nothing in flight.
    fn abort(&mut self);

    /// Reason for the most recent failure, for short writes.
    fn last_error(&self) -> String;
}
