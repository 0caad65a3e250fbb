//! Railyard Core - hardware-independent logic for the railyard controller
//!
//! The network update path (access window, single-writer lock, data volume
//! coordination, the per-upload state machine and the deferred reboot), the
//! HTTP routing and replies, multipart decoding and the layout control logic.
//! Everything here builds and tests on the host; the firmware crate supplies
//! the flash, filesystem, I2C and PWM drivers.

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod flash;
pub mod http;
pub mod lock;
pub mod multipart;
pub mod railway;
pub mod reboot;
pub mod session;
pub mod upload;
pub mod volume;
pub mod window;

#[cfg(test)]
mod testing;

pub use clock::Clock;
pub use config::Config;
pub use controller::{OtaStatus, RequestId, ServiceAction, UpdateController};
pub use error::OtaError;
pub use flash::{FlashError, FlashUpdater, UpdateTarget};
pub use session::{Outcome, UploadEvent};
pub use upload::{BodyUpload, UploadRequest};
pub use volume::{VolumeCoordinator, VolumeDriver, VolumeError};
