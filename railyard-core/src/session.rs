//! Per-attempt update state machine.
//!
//! `Idle → Writing → {Committed | Failed | Aborted} → Idle`, driven one
//! transport event at a time through [`UpdateSession::handle_event`]. The
//! session owns no hardware; it borrows the lock, the volume, the flash
//! driver and the reboot scheduler for the duration of each event.

use sha2::{Digest, Sha256};

use crate::error::OtaError;
use crate::flash::{FlashUpdater, UpdateTarget};
use crate::lock::ExclusivityLock;
use crate::reboot::RebootScheduler;
use crate::volume::{VolumeCoordinator, VolumeDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Writing,
    Committed,
    Failed,
    Aborted,
}

/// One step of an upload as delivered by the transport, in order:
/// `Start, DataChunk*, (End | Abort)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadEvent<'a> {
    Start {
        target: UpdateTarget,
        filename: &'a str,
    },
    DataChunk(&'a [u8]),
    End,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub target: UpdateTarget,
    pub bytes: u64,
    /// Hex SHA-256 of the streamed payload, logged for diagnostics only.
    pub sha256: String,
}

/// Result of feeding one event to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Session is writing; the driver accepted the begin.
    Started,
    /// Chunk written; running total.
    Written { bytes_seen: u64 },
    /// Session is writing but faulted; this and later chunks are dropped.
    Faulted(OtaError),
    /// Chunk dropped because of an earlier fault.
    Discarded,
    Committed(CommitReport),
    Failed {
        target: UpdateTarget,
        error: OtaError,
    },
    Aborted {
        target: UpdateTarget,
        reason: OtaError,
    },
    /// `Start` refused before any session existed.
    Rejected(OtaError),
    /// Event with no session to apply to.
    Ignored,
}

/// Collaborators a session borrows while handling one event.
pub struct SessionDeps<'a, F, V> {
    pub lock: &'a mut ExclusivityLock,
    pub volume: &'a mut VolumeCoordinator<V>,
    pub flash: &'a mut F,
    pub reboot: &'a mut RebootScheduler,
    pub now_ms: u32,
}

pub struct UpdateSession {
    target: UpdateTarget,
    status: SessionStatus,
    error: Option<OtaError>,
    bytes_seen: u64,
    hasher: Sha256,
    last_activity_ms: u32,
}

impl Default for UpdateSession {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateSession {
    pub fn new() -> Self {
        Self {
            target: UpdateTarget::Firmware,
            status: SessionStatus::Idle,
            error: None,
            bytes_seen: 0,
            hasher: Sha256::new(),
            last_activity_ms: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn target(&self) -> UpdateTarget {
        self.target
    }

    pub fn is_writing(&self) -> bool {
        self.status == SessionStatus::Writing
    }

    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn last_error(&self) -> String {
        self.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn last_activity_ms(&self) -> u32 {
        self.last_activity_ms
    }

    pub fn handle_event<F, V>(
        &mut self,
        event: UploadEvent<'_>,
        deps: &mut SessionDeps<'_, F, V>,
    ) -> Outcome
    where
        F: FlashUpdater,
        V: VolumeDriver,
    {
        match event {
            UploadEvent::Start { target, filename } => self.start(target, filename, deps),
            UploadEvent::DataChunk(data) => self.write_chunk(data, deps),
            UploadEvent::End => self.finish(deps),
            UploadEvent::Abort => self.abort(OtaError::UploadAborted, deps),
        }
    }

    fn start<F, V>(
        &mut self,
        target: UpdateTarget,
        filename: &str,
        deps: &mut SessionDeps<'_, F, V>,
    ) -> Outcome
    where
        F: FlashUpdater,
        V: VolumeDriver,
    {
        if self.status != SessionStatus::Idle {
            return Outcome::Rejected(OtaError::SessionBusy);
        }
        if let Err(e) = deps.lock.acquire() {
            return Outcome::Rejected(e);
        }

        self.target = target;
        self.status = SessionStatus::Writing;
        self.error = None;
        self.bytes_seen = 0;
        self.hasher = Sha256::new();
        self.last_activity_ms = deps.now_ms;
        log::info!("OTA {}: Upload start: {}", target, filename);

        // The volume driver must not hold the partition while it is rewritten
        if target == UpdateTarget::DataVolume {
            deps.volume.ensure_unmounted();
        }

        match deps.flash.begin(target) {
            Ok(()) => Outcome::Started,
            Err(e) => {
                log::error!("OTA {}: begin failed: {}", target, e);
                let error = OtaError::DriverBeginFailed(e.0);
                self.error = Some(error.clone());
                Outcome::Faulted(error)
            }
        }
    }

    fn write_chunk<F, V>(&mut self, data: &[u8], deps: &mut SessionDeps<'_, F, V>) -> Outcome
    where
        F: FlashUpdater,
        V: VolumeDriver,
    {
        if self.status != SessionStatus::Writing {
            return Outcome::Ignored;
        }
        self.last_activity_ms = deps.now_ms;
        if !self.ok() {
            return Outcome::Discarded;
        }

        let reason = match deps.flash.write(data) {
            Ok(written) if written == data.len() => {
                self.bytes_seen += data.len() as u64;
                self.hasher.update(data);
                return Outcome::Written {
                    bytes_seen: self.bytes_seen,
                };
            }
            Ok(_) => deps.flash.last_error(),
            Err(e) => e.0,
        };

        log::error!("OTA {}: write failed: {}", self.target, reason);
        let error = OtaError::DriverWriteFailed(reason);
        self.error = Some(error.clone());
        Outcome::Faulted(error)
    }

    fn finish<F, V>(&mut self, deps: &mut SessionDeps<'_, F, V>) -> Outcome
    where
        F: FlashUpdater,
        V: VolumeDriver,
    {
        if self.status != SessionStatus::Writing {
            return Outcome::Ignored;
        }
        let target = self.target;
        log::info!("OTA {}: Upload end. Size: {}", target, self.bytes_seen);

        let outcome = match self.error.clone() {
            None => match deps.flash.commit() {
                Ok(()) => {
                    self.status = SessionStatus::Committed;
                    let digest = std::mem::take(&mut self.hasher).finalize();
                    let report = CommitReport {
                        target,
                        bytes: self.bytes_seen,
                        sha256: to_hex(&digest),
                    };
                    log::info!(
                        "OTA {}: committed {} bytes, sha256 {}",
                        target,
                        report.bytes,
                        report.sha256
                    );
                    deps.lock.release();
                    deps.reboot.arm(deps.now_ms);
                    Outcome::Committed(report)
                }
                Err(e) => {
                    log::error!("OTA {}: commit failed: {}", target, e);
                    self.status = SessionStatus::Failed;
                    let error = OtaError::DriverCommitFailed(e.0);
                    deps.lock.release();
                    Outcome::Failed { target, error }
                }
            },
            Some(error) => {
                // Never commit a faulted image; just release the driver
                self.status = SessionStatus::Failed;
                deps.flash.abort();
                deps.lock.release();
                Outcome::Failed { target, error }
            }
        };

        self.reset();
        outcome
    }

    /// Discards the in-flight write. Used for transport aborts and for
    /// aborts forced by the controller.
    pub fn abort<F, V>(&mut self, reason: OtaError, deps: &mut SessionDeps<'_, F, V>) -> Outcome
    where
        F: FlashUpdater,
        V: VolumeDriver,
    {
        if self.status != SessionStatus::Writing {
            return Outcome::Ignored;
        }
        let target = self.target;
        deps.flash.abort();
        self.status = SessionStatus::Aborted;
        self.error = Some(reason.clone());
        log::warn!("OTA {}: {}", target, reason);
        deps.lock.release();

        // Bring file serving back without a restart
        if target == UpdateTarget::DataVolume {
            deps.volume.ensure_mounted();
        }

        self.reset();
        Outcome::Aborted { target, reason }
    }

    fn reset(&mut self) {
        self.status = SessionStatus::Idle;
        self.error = None;
        self.bytes_seen = 0;
        self.hasher = Sha256::new();
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}
