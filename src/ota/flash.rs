// Flash programming through the ESP-IDF OTA and partition APIs

use core::ffi::c_void;
use esp_idf_sys::{
    esp, esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_next_update_partition,
    esp_ota_handle_t, esp_ota_set_boot_partition, esp_ota_write, esp_partition_erase_range,
    esp_partition_find_first, esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
    esp_partition_t, esp_partition_type_t_ESP_PARTITION_TYPE_DATA, esp_partition_write, EspError,
    OTA_SIZE_UNKNOWN,
};
use railyard_core::{FlashError, FlashUpdater, UpdateTarget};

use crate::system::storage::PARTITION_LABEL;

const SECTOR_SIZE: u32 = 4096;

/// Partition table entry; the table lives in flash for the program's lifetime.
#[derive(Clone, Copy)]
struct Partition(*const esp_partition_t);

// Pointers into the read-only partition table can move between tasks
unsafe impl Send for Partition {}

impl Partition {
    fn size(&self) -> u32 {
        unsafe { (*self.0).size }
    }

    fn label(&self) -> String {
        let label = unsafe { core::ffi::CStr::from_ptr((*self.0).label.as_ptr()) };
        label.to_string_lossy().into_owned()
    }
}

enum Active {
    Ota {
        handle: esp_ota_handle_t,
        partition: Partition,
    },
    Raw {
        partition: Partition,
        offset: u32,
        erased_to: u32,
    },
}

pub struct EspFlashUpdater {
    active: Option<Active>,
    last_error: String,
}

impl EspFlashUpdater {
    pub fn new() -> Self {
        Self {
            active: None,
            last_error: String::new(),
        }
    }

    fn fail(&mut self, reason: impl Into<String>) -> FlashError {
        let reason = reason.into();
        self.last_error = reason.clone();
        FlashError::new(reason)
    }

    fn begin_firmware(&mut self) -> Result<Active, FlashError> {
        let partition = unsafe { esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            return Err(self.fail("No OTA partition"));
        }
        let partition = Partition(partition);
        let mut handle: esp_ota_handle_t = 0;
        esp!(unsafe { esp_ota_begin(partition.0, OTA_SIZE_UNKNOWN as _, &mut handle) })
            .map_err(|e| self.fail(esp_reason(e)))?;
        log::info!("Writing firmware to partition '{}'", partition.label());
        Ok(Active::Ota { handle, partition })
    }

    fn begin_volume(&mut self) -> Result<Active, FlashError> {
        let partition = unsafe {
            esp_partition_find_first(
                esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
                PARTITION_LABEL.as_ptr(),
            )
        };
        if partition.is_null() {
            return Err(self.fail("Partition Could Not be Found"));
        }
        let partition = Partition(partition);
        log::info!(
            "Writing filesystem to partition '{}' ({} bytes)",
            partition.label(),
            partition.size()
        );
        Ok(Active::Raw {
            partition,
            offset: 0,
            erased_to: 0,
        })
    }
}

impl Default for EspFlashUpdater {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashUpdater for EspFlashUpdater {
    fn begin(&mut self, target: UpdateTarget) -> Result<(), FlashError> {
        if self.active.is_some() {
            self.abort();
        }
        self.last_error.clear();
        let active = match target {
            UpdateTarget::Firmware => self.begin_firmware()?,
            UpdateTarget::DataVolume => self.begin_volume()?,
        };
        self.active = Some(active);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, FlashError> {
        let result = match self.active.as_mut() {
            None => return Err(self.fail("Nothing to write to")),
            Some(Active::Ota { handle, .. }) => {
                esp!(unsafe { esp_ota_write(*handle, data.as_ptr() as *const c_void, data.len()) })
                    .map(|_| data.len())
                    .map_err(esp_reason)
            }
            Some(Active::Raw {
                partition,
                offset,
                erased_to,
            }) => write_raw(*partition, offset, erased_to, data),
        };
        result.map_err(|reason| self.fail(reason))
    }

    fn commit(&mut self) -> Result<(), FlashError> {
        match self.active.take() {
            None => Err(self.fail("Nothing to commit")),
            Some(Active::Ota { handle, partition }) => {
                esp!(unsafe { esp_ota_end(handle) }).map_err(|e| self.fail(esp_reason(e)))?;
                esp!(unsafe { esp_ota_set_boot_partition(partition.0) })
                    .map_err(|e| self.fail(esp_reason(e)))?;
                log::info!("Boot partition set to '{}'", partition.label());
                Ok(())
            }
            Some(Active::Raw { offset, .. }) => {
                log::info!("Filesystem image complete: {} bytes", offset);
                Ok(())
            }
        }
    }

    fn abort(&mut self) {
        if let Some(Active::Ota { handle, .. }) = self.active.take() {
            if let Err(e) = esp!(unsafe { esp_ota_abort(handle) }) {
                log::warn!("esp_ota_abort failed: {}", e);
            }
        }
    }

    fn last_error(&self) -> String {
        self.last_error.clone()
    }
}

fn write_raw(
    partition: Partition,
    offset: &mut u32,
    erased_to: &mut u32,
    data: &[u8],
) -> Result<usize, String> {
    let end = *offset as u64 + data.len() as u64;
    if end > partition.size() as u64 {
        return Err("Not Enough Space".to_string());
    }
    let end = end as u32;
    if end > *erased_to {
        let erase_end = end.div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
        esp!(unsafe {
            esp_partition_erase_range(
                partition.0,
                *erased_to as usize,
                (erase_end - *erased_to) as usize,
            )
        })
        .map_err(esp_reason)?;
        *erased_to = erase_end;
    }
    esp!(unsafe {
        esp_partition_write(
            partition.0,
            *offset as usize,
            data.as_ptr() as *const c_void,
            data.len(),
        )
    })
    .map_err(esp_reason)?;
    *offset = end;
    Ok(data.len())
}

fn esp_reason(e: EspError) -> String {
    e.to_string()
}
