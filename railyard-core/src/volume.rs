//! Exclusive owner of the on-device data volume.
//!
//! The web assets live on a small filesystem partition. A data-volume update
//! rewrites that partition, so the filesystem must be unmounted before the
//! first byte is written and must never be touched by file serving while it
//! is down.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VolumeError {
    #[error("volume mount failed: {0}")]
    MountFailed(String),
}

/// Filesystem driver behind the coordinator.
pub trait VolumeDriver: Send {
    fn mount(&mut self) -> Result<(), VolumeError>;

    /// Assumed infallible once no file handles are open.
    fn unmount(&mut self);

    /// Where the mounted volume appears in the VFS.
    fn base_path(&self) -> &Path;
}

pub struct VolumeCoordinator<V> {
    driver: V,
    mounted: bool,
    last_mount_failed: bool,
}

impl<V: VolumeDriver> VolumeCoordinator<V> {
    /// Takes ownership of an unmounted driver.
    pub fn new(driver: V) -> Self {
        Self {
            driver,
            mounted: false,
            last_mount_failed: false,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn last_mount_failed(&self) -> bool {
        self.last_mount_failed
    }

    /// Mounts if needed. A refused mount is logged and reported as `false`;
    /// callers carry on and file requests turn into 404s.
    pub fn ensure_mounted(&mut self) -> bool {
        if self.mounted {
            return true;
        }
        match self.driver.mount() {
            Ok(()) => {
                self.mounted = true;
                self.last_mount_failed = false;
                log::info!("Volume mounted at {}", self.driver.base_path().display());
            }
            Err(e) => {
                self.last_mount_failed = true;
                log::error!("{}", e);
            }
        }
        self.mounted
    }

    pub fn ensure_unmounted(&mut self) {
        if self.mounted {
            self.driver.unmount();
            self.mounted = false;
            log::info!("Volume unmounted");
        }
    }

    /// Path of `path` on the mounted volume, mounting on demand.
    pub fn resolve(&mut self, path: &str) -> Option<PathBuf> {
        if !self.ensure_mounted() {
            return None;
        }
        let relative = path.trim_start_matches('/');
        if relative.split('/').any(|part| part == "..") {
            return None;
        }
        Some(self.driver.base_path().join(relative))
    }

    pub fn driver(&self) -> &V {
        &self.driver
    }
}
