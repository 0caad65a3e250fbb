use esp_idf_sys::{esp, esp_vfs_littlefs_conf_t, esp_vfs_littlefs_register, esp_vfs_littlefs_unregister};
use railyard_core::{VolumeDriver, VolumeError};
use std::ffi::CStr;
use std::path::Path;

const BASE_PATH: &CStr = c"/littlefs";

/// Label of the data partition in `partitions.csv`; the filesystem updater
/// writes to the same entry.
pub const PARTITION_LABEL: &CStr = c"littlefs";

/// LittleFS data partition registered in the VFS under `/littlefs`.
pub struct LittleFsVolume;

impl LittleFsVolume {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LittleFsVolume {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeDriver for LittleFsVolume {
    fn mount(&mut self) -> Result<(), VolumeError> {
        let mut conf = esp_vfs_littlefs_conf_t {
            base_path: BASE_PATH.as_ptr(),
            partition_label: PARTITION_LABEL.as_ptr(),
            ..Default::default()
        };
        // A freshly flashed image that fails to mount must stay intact
        conf.set_format_if_mount_failed(0);
        esp!(unsafe { esp_vfs_littlefs_register(&conf) })
            .map_err(|e| VolumeError::MountFailed(e.to_string()))
    }

    fn unmount(&mut self) {
        if let Err(e) = esp!(unsafe { esp_vfs_littlefs_unregister(PARTITION_LABEL.as_ptr()) }) {
            log::warn!("LittleFS unregister failed: {}", e);
        }
    }

    fn base_path(&self) -> &Path {
        Path::new("/littlefs")
    }
}
