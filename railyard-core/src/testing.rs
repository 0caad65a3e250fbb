//! In-memory drivers for unit tests.

use std::path::{Path, PathBuf};

use crate::flash::{FlashError, FlashUpdater, UpdateTarget};
use crate::volume::{VolumeDriver, VolumeError};

#[derive(Default)]
pub(crate) struct FakeFlash {
    pub begun: Option<UpdateTarget>,
    pub staged: Vec<u8>,
    pub committed: Vec<u8>,
    pub refuse_begin: bool,
    pub refuse_commit: bool,
    /// Number of full writes accepted before every write comes up short.
    pub short_write_after: Option<usize>,
    pub write_calls: usize,
    pub commit_calls: usize,
    pub aborted: bool,
    error: String,
}

impl FlashUpdater for FakeFlash {
    fn begin(&mut self, target: UpdateTarget) -> Result<(), FlashError> {
        if self.refuse_begin {
            self.error = "Not Enough Space".into();
            return Err(FlashError::new("Not Enough Space"));
        }
        self.begun = Some(target);
        self.staged.clear();
        self.aborted = false;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, FlashError> {
        self.write_calls += 1;
        if let Some(limit) = self.short_write_after {
            if self.write_calls > limit {
                self.error = "Flash Write Failed".into();
                return Ok(data.len() / 2);
            }
        }
        self.staged.extend_from_slice(data);
        Ok(data.len())
    }

    fn commit(&mut self) -> Result<(), FlashError> {
        self.commit_calls += 1;
        if self.refuse_commit {
            self.error = "Magic byte is wrong".into();
            return Err(FlashError::new("Magic byte is wrong"));
        }
        self.committed = std::mem::take(&mut self.staged);
        self.begun = None;
        Ok(())
    }

    fn abort(&mut self) {
        self.staged.clear();
        self.begun = None;
        self.aborted = true;
    }

    fn last_error(&self) -> String {
        self.error.clone()
    }
}

pub(crate) struct FakeVolume {
    pub base: PathBuf,
    pub refuse_mount: bool,
    pub mounts: u32,
    pub unmounts: u32,
}

impl Default for FakeVolume {
    fn default() -> Self {
        Self {
            base: PathBuf::from("/littlefs"),
            refuse_mount: false,
            mounts: 0,
            unmounts: 0,
        }
    }
}

impl VolumeDriver for FakeVolume {
    fn mount(&mut self) -> Result<(), VolumeError> {
        if self.refuse_mount {
            return Err(VolumeError::MountFailed("corrupt superblock".into()));
        }
        self.mounts += 1;
        Ok(())
    }

    fn unmount(&mut self) {
        self.unmounts += 1;
    }

    fn base_path(&self) -> &Path {
        &self.base
    }
}
