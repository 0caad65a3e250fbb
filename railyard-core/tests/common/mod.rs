//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use railyard_core::clock::ManualClock;
use railyard_core::config::OtaConfig;
use railyard_core::{
    FlashError, FlashUpdater, UpdateController, UpdateTarget, VolumeCoordinator, VolumeDriver,
    VolumeError,
};

/// Flash driver that keeps every committed image.
#[derive(Debug, Default)]
pub struct RecordingFlash {
    pub staged: Vec<u8>,
    pub in_flight: Option<UpdateTarget>,
    pub commits: Vec<(UpdateTarget, Vec<u8>)>,
    pub aborts: usize,
    /// Total bytes accepted before writes start failing.
    pub capacity: Option<usize>,
}

impl FlashUpdater for RecordingFlash {
    fn begin(&mut self, target: UpdateTarget) -> Result<(), FlashError> {
        self.in_flight = Some(target);
        self.staged.clear();
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, FlashError> {
        if let Some(capacity) = self.capacity {
            if self.staged.len() + data.len() > capacity {
                return Err(FlashError::new("Not Enough Space"));
            }
        }
        self.staged.extend_from_slice(data);
        Ok(data.len())
    }

    fn commit(&mut self) -> Result<(), FlashError> {
        let target = self
            .in_flight
            .take()
            .ok_or_else(|| FlashError::new("Not begun"))?;
        self.commits.push((target, std::mem::take(&mut self.staged)));
        Ok(())
    }

    fn abort(&mut self) {
        self.in_flight = None;
        self.staged.clear();
        self.aborts += 1;
    }

    fn last_error(&self) -> String {
        String::new()
    }
}

#[derive(Debug)]
pub struct RecordingVolume {
    pub base: PathBuf,
    pub mounted: bool,
    pub mounts: u32,
    pub unmounts: u32,
}

impl Default for RecordingVolume {
    fn default() -> Self {
        Self {
            base: PathBuf::from("/littlefs"),
            mounted: false,
            mounts: 0,
            unmounts: 0,
        }
    }
}

impl VolumeDriver for RecordingVolume {
    fn mount(&mut self) -> Result<(), VolumeError> {
        self.mounted = true;
        self.mounts += 1;
        Ok(())
    }

    fn unmount(&mut self) {
        self.mounted = false;
        self.unmounts += 1;
    }

    fn base_path(&self) -> &Path {
        &self.base
    }
}

pub type Controller = UpdateController<ManualClock, RecordingFlash, RecordingVolume>;

/// Controller as it looks after boot: volume mounted, window closed.
pub fn booted() -> (Controller, ManualClock) {
    booted_with(RecordingFlash::default())
}

pub fn booted_with(flash: RecordingFlash) -> (Controller, ManualClock) {
    let clock = ManualClock::new(1_000);
    let mut volume = VolumeCoordinator::new(RecordingVolume::default());
    volume.ensure_mounted();
    let controller = UpdateController::new(&OtaConfig::default(), clock.clone(), flash, volume);
    (controller, clock)
}

pub fn multipart_body(boundary: &str, field: &str, filename: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"{n}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n",
        b = boundary,
        f = field,
        n = filename
    )
    .into_bytes();
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
