//! Single owner of all update state.
//!
//! The window, the lock, the session, the data volume, the flash driver and
//! the reboot scheduler all live here and are only reached through these
//! methods. Firmware keeps one controller behind a mutex and hands the
//! handle to every HTTP handler and to the main loop.

use serde::{Deserialize, Serialize};

use crate::clock::{elapsed_ms, Clock};
use crate::config::OtaConfig;
use crate::error::OtaError;
use crate::flash::{FlashUpdater, UpdateTarget};
use crate::lock::ExclusivityLock;
use crate::reboot::RebootScheduler;
use crate::session::{Outcome, SessionDeps, UpdateSession, UploadEvent};
use crate::volume::{VolumeCoordinator, VolumeDriver};
use crate::window::AccessWindow;
use std::path::PathBuf;

/// Identifies the HTTP request an upload event belongs to.
pub type RequestId = u32;

/// Body of the `/ota_*` status endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaStatus {
    pub enabled: bool,
    pub seconds_left: u32,
    pub in_progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Idle,
    /// Reply drained; restart the device now.
    Restart,
}

pub struct UpdateController<C, F, V> {
    clock: C,
    window: AccessWindow,
    lock: ExclusivityLock,
    session: UpdateSession,
    owner: Option<RequestId>,
    /// Abort forced from `service()`, held for the request that owned it.
    forced: Option<(RequestId, Outcome)>,
    volume: VolumeCoordinator<V>,
    flash: F,
    reboot: RebootScheduler,
    idle_timeout_ms: u32,
    next_request: RequestId,
}

impl<C, F, V> UpdateController<C, F, V>
where
    C: Clock,
    F: FlashUpdater,
    V: VolumeDriver,
{
    pub fn new(config: &OtaConfig, clock: C, flash: F, volume: VolumeCoordinator<V>) -> Self {
        Self {
            clock,
            window: AccessWindow::new(config.window_ms),
            lock: ExclusivityLock::new(),
            session: UpdateSession::new(),
            owner: None,
            forced: None,
            volume,
            flash,
            reboot: RebootScheduler::new(config.reboot_delay_ms),
            idle_timeout_ms: config.session_idle_timeout_ms,
            next_request: 1,
        }
    }

    /// Allocates an id for a new upload request.
    pub fn begin_request(&mut self) -> RequestId {
        let id = self.next_request;
        self.next_request = self.next_request.wrapping_add(1).max(1);
        id
    }

    pub fn open_window(&mut self) -> OtaStatus {
        self.window.open(self.clock.now_ms());
        self.status()
    }

    pub fn cancel_window(&mut self) -> OtaStatus {
        self.window.cancel();
        self.status()
    }

    pub fn status(&mut self) -> OtaStatus {
        let now = self.clock.now_ms();
        let seconds_left = self.window.seconds_left(now);
        OtaStatus {
            enabled: seconds_left > 0,
            seconds_left,
            in_progress: self.is_busy(),
        }
    }

    pub fn window_active(&mut self) -> bool {
        self.window.is_active(self.clock.now_ms())
    }

    /// Gate for every endpoint other than the update and status ones.
    pub fn check_busy(&self) -> Result<(), OtaError> {
        if self.is_busy() {
            return Err(OtaError::SessionBusy);
        }
        Ok(())
    }

    /// Path of a static asset on the data volume, `Ok(None)` when the
    /// volume cannot be mounted.
    pub fn resolve_asset(&mut self, path: &str) -> Result<Option<PathBuf>, OtaError> {
        self.check_busy()?;
        Ok(self.volume.resolve(path))
    }

    pub fn session(&self) -> &UpdateSession {
        &self.session
    }

    pub fn volume(&self) -> &VolumeCoordinator<V> {
        &self.volume
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn reboot_pending(&self) -> bool {
        self.reboot.is_pending()
    }

    /// Hands the outcome of an abort forced by `service()` to the request
    /// whose session it was. Taken once.
    pub fn take_forced_outcome(&mut self, request: RequestId) -> Option<Outcome> {
        match self.forced {
            Some((owner, _)) if owner == request => self.forced.take().map(|(_, outcome)| outcome),
            _ => None,
        }
    }

    /// A session is writing, or a committed image is waiting for the restart.
    fn is_busy(&self) -> bool {
        self.lock.is_busy() || self.reboot.is_pending()
    }

    /// Feeds one transport event for `request`.
    ///
    /// Only the request that started the current session may drive it;
    /// events from anyone else are ignored. The window is re-checked on
    /// every chunk and at `End`, and a session caught writing after expiry
    /// is aborted.
    pub fn handle_upload(&mut self, request: RequestId, event: UploadEvent<'_>) -> Outcome {
        let now = self.clock.now_ms();

        if let UploadEvent::Start { target, .. } = event {
            if !self.window.is_active(now) {
                log::warn!("OTA {}: upload refused, window inactive", target);
                return Outcome::Rejected(OtaError::WindowInactive);
            }
            if self.lock.is_busy() {
                log::warn!("OTA {}: upload refused, another session is writing", target);
                return Outcome::Rejected(OtaError::SessionBusy);
            }
            if self.reboot.is_pending() {
                log::warn!("OTA {}: upload refused, restart pending", target);
                return Outcome::Rejected(OtaError::SessionBusy);
            }
            let outcome = self.dispatch(event, now);
            if self.session.is_writing() {
                self.owner = Some(request);
            }
            return outcome;
        }

        if let Some(outcome) = self.take_forced_outcome(request) {
            return outcome;
        }
        if self.owner != Some(request) {
            return Outcome::Ignored;
        }

        let needs_window = matches!(event, UploadEvent::DataChunk(_) | UploadEvent::End);
        if needs_window && !self.window.is_active(now) {
            return self.force_abort(OtaError::WindowExpired);
        }

        let outcome = self.dispatch(event, now);
        self.settle(&outcome);
        outcome
    }

    /// Periodic work for the main loop: observes window expiry, enforces
    /// the idle timeout and reports a due reboot.
    pub fn service(&mut self) -> ServiceAction {
        let now = self.clock.now_ms();
        let window_active = self.window.is_active(now);

        if self.session.is_writing() {
            let reason = if !window_active {
                Some(OtaError::WindowExpired)
            } else if elapsed_ms(self.session.last_activity_ms(), now) >= self.idle_timeout_ms as i32
            {
                Some(OtaError::IdleTimeout)
            } else {
                None
            };
            if let Some(reason) = reason {
                let owner = self.owner;
                let outcome = self.force_abort(reason);
                self.forced = owner.map(|id| (id, outcome));
            }
        }

        if self.reboot.take_due(now) {
            return ServiceAction::Restart;
        }
        ServiceAction::Idle
    }

    fn dispatch(&mut self, event: UploadEvent<'_>, now: u32) -> Outcome {
        let mut deps = SessionDeps {
            lock: &mut self.lock,
            volume: &mut self.volume,
            flash: &mut self.flash,
            reboot: &mut self.reboot,
            now_ms: now,
        };
        self.session.handle_event(event, &mut deps)
    }

    fn force_abort(&mut self, reason: OtaError) -> Outcome {
        let now = self.clock.now_ms();
        let mut deps = SessionDeps {
            lock: &mut self.lock,
            volume: &mut self.volume,
            flash: &mut self.flash,
            reboot: &mut self.reboot,
            now_ms: now,
        };
        let outcome = self.session.abort(reason, &mut deps);
        self.settle(&outcome);
        outcome
    }

    fn settle(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Committed(_) | Outcome::Aborted { .. } => self.owner = None,
            Outcome::Failed { target, .. } => {
                self.owner = None;
                // Remount whatever is on the partition so file serving resumes
                if *target == UpdateTarget::DataVolume {
                    self.volume.ensure_mounted();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::SessionStatus;
    use crate::testing::{FakeFlash, FakeVolume};

    type Controller = UpdateController<ManualClock, FakeFlash, FakeVolume>;

    fn controller() -> (Controller, ManualClock) {
        let clock = ManualClock::new(0);
        let mut volume = VolumeCoordinator::new(FakeVolume::default());
        volume.ensure_mounted();
        let ctrl = UpdateController::new(
            &OtaConfig::default(),
            clock.clone(),
            FakeFlash::default(),
            volume,
        );
        (ctrl, clock)
    }

    fn start(target: UpdateTarget) -> UploadEvent<'static> {
        UploadEvent::Start {
            target,
            filename: "image.bin",
        }
    }

    #[test]
    fn test_status_reports_window_and_lock() {
        let (mut ctrl, clock) = controller();
        assert_eq!(
            ctrl.status(),
            OtaStatus {
                enabled: false,
                seconds_left: 0,
                in_progress: false
            }
        );
        let opened = ctrl.open_window();
        assert_eq!(opened.seconds_left, 60);
        assert!(opened.enabled);

        clock.advance(15_500);
        assert_eq!(ctrl.status().seconds_left, 45);

        let cancelled = ctrl.cancel_window();
        assert!(!cancelled.enabled);
        assert_eq!(cancelled.seconds_left, 0);
    }

    #[test]
    fn test_start_rejected_without_window() {
        let (mut ctrl, _) = controller();
        let id = ctrl.begin_request();
        assert_eq!(
            ctrl.handle_upload(id, start(UpdateTarget::Firmware)),
            Outcome::Rejected(OtaError::WindowInactive)
        );
        assert!(ctrl.check_busy().is_ok());
        assert_eq!(ctrl.session().status(), SessionStatus::Idle);
    }

    #[test]
    fn test_concurrent_requests_single_writer() {
        let (mut ctrl, _) = controller();
        ctrl.open_window();
        let a = ctrl.begin_request();
        let b = ctrl.begin_request();

        assert_eq!(ctrl.handle_upload(a, start(UpdateTarget::Firmware)), Outcome::Started);
        assert_eq!(
            ctrl.handle_upload(b, start(UpdateTarget::DataVolume)),
            Outcome::Rejected(OtaError::SessionBusy)
        );
        // B's stray events never reach A's session
        assert_eq!(ctrl.handle_upload(b, UploadEvent::DataChunk(b"zz")), Outcome::Ignored);
        assert_eq!(ctrl.handle_upload(b, UploadEvent::Abort), Outcome::Ignored);
        assert!(ctrl.session().is_writing());
        assert!(ctrl.volume().is_mounted());

        ctrl.handle_upload(a, UploadEvent::DataChunk(b"fw"));
        assert!(matches!(
            ctrl.handle_upload(a, UploadEvent::End),
            Outcome::Committed(_)
        ));
        assert_eq!(ctrl.flash().committed, b"fw");
    }

    #[test]
    fn test_busy_gate_while_writing() {
        let (mut ctrl, _) = controller();
        ctrl.open_window();
        let id = ctrl.begin_request();
        ctrl.handle_upload(id, start(UpdateTarget::Firmware));
        assert_eq!(ctrl.check_busy(), Err(OtaError::SessionBusy));
        assert_eq!(ctrl.resolve_asset("/index.html"), Err(OtaError::SessionBusy));
        assert!(ctrl.status().in_progress);
    }

    #[test]
    fn test_window_expiry_mid_write_forces_abort() {
        let (mut ctrl, clock) = controller();
        ctrl.open_window();
        let id = ctrl.begin_request();
        ctrl.handle_upload(id, start(UpdateTarget::DataVolume));
        assert!(!ctrl.volume().is_mounted());

        clock.advance(60_000);
        assert_eq!(
            ctrl.handle_upload(id, UploadEvent::DataChunk(b"late")),
            Outcome::Aborted {
                target: UpdateTarget::DataVolume,
                reason: OtaError::WindowExpired,
            }
        );
        assert!(ctrl.flash().aborted);
        assert!(ctrl.volume().is_mounted());
        assert!(ctrl.check_busy().is_ok());
        assert_eq!(ctrl.handle_upload(id, UploadEvent::End), Outcome::Ignored);
    }

    #[test]
    fn test_service_observes_expiry_while_writing() {
        let (mut ctrl, clock) = controller();
        ctrl.open_window();
        let id = ctrl.begin_request();
        ctrl.handle_upload(id, start(UpdateTarget::Firmware));
        clock.advance(20_000);
        ctrl.handle_upload(id, UploadEvent::DataChunk(b"a"));
        clock.advance(20_000);
        ctrl.handle_upload(id, UploadEvent::DataChunk(b"b"));
        clock.advance(20_000);

        assert_eq!(ctrl.service(), ServiceAction::Idle);
        assert!(!ctrl.session().is_writing());
        assert!(ctrl.check_busy().is_ok());
    }

    #[test]
    fn test_idle_timeout_releases_lock() {
        let (mut ctrl, clock) = controller();
        ctrl.open_window();
        let id = ctrl.begin_request();
        ctrl.handle_upload(id, start(UpdateTarget::DataVolume));

        clock.advance(29_999);
        ctrl.service();
        assert!(ctrl.session().is_writing());

        clock.advance(1);
        ctrl.service();
        assert!(!ctrl.session().is_writing());
        assert!(ctrl.check_busy().is_ok());
        assert!(ctrl.volume().is_mounted());
    }

    #[test]
    fn test_failed_data_volume_update_remounts() {
        let (mut ctrl, _) = controller();
        ctrl.open_window();
        let id = ctrl.begin_request();
        ctrl.handle_upload(id, start(UpdateTarget::DataVolume));
        ctrl.flash.refuse_commit = true;
        ctrl.handle_upload(id, UploadEvent::DataChunk(b"fs"));
        assert!(matches!(
            ctrl.handle_upload(id, UploadEvent::End),
            Outcome::Failed { .. }
        ));
        assert!(ctrl.volume().is_mounted());
        assert!(!ctrl.reboot_pending());
    }

    #[test]
    fn test_successful_update_restarts_once_after_drain() {
        let (mut ctrl, clock) = controller();
        ctrl.open_window();
        let id = ctrl.begin_request();
        ctrl.handle_upload(id, start(UpdateTarget::Firmware));
        ctrl.handle_upload(id, UploadEvent::DataChunk(b"image"));
        ctrl.handle_upload(id, UploadEvent::End);
        assert!(ctrl.reboot_pending());

        assert_eq!(ctrl.service(), ServiceAction::Idle);
        clock.advance(250);
        assert_eq!(ctrl.service(), ServiceAction::Restart);
        assert_eq!(ctrl.service(), ServiceAction::Idle);
    }

    #[test]
    fn test_start_refused_while_restart_pending() {
        let (mut ctrl, clock) = controller();
        ctrl.open_window();
        let a = ctrl.begin_request();
        ctrl.handle_upload(a, start(UpdateTarget::Firmware));
        ctrl.handle_upload(a, UploadEvent::DataChunk(b"image"));
        assert!(matches!(
            ctrl.handle_upload(a, UploadEvent::End),
            Outcome::Committed(_)
        ));

        clock.advance(100);
        let b = ctrl.begin_request();
        assert_eq!(
            ctrl.handle_upload(b, start(UpdateTarget::DataVolume)),
            Outcome::Rejected(OtaError::SessionBusy)
        );
        assert_eq!(ctrl.check_busy(), Err(OtaError::SessionBusy));
        assert!(ctrl.status().in_progress);
        assert!(ctrl.volume().is_mounted());
        assert!(!ctrl.flash().aborted);
        assert_eq!(ctrl.flash().committed, b"image");

        clock.advance(150);
        assert_eq!(ctrl.service(), ServiceAction::Restart);
    }

    #[test]
    fn test_forced_abort_reaches_owner_once() {
        let (mut ctrl, clock) = controller();
        ctrl.open_window();
        let a = ctrl.begin_request();
        let b = ctrl.begin_request();
        ctrl.handle_upload(a, start(UpdateTarget::Firmware));
        ctrl.handle_upload(a, UploadEvent::DataChunk(b"part"));

        clock.advance(30_000);
        ctrl.service();
        assert!(!ctrl.session().is_writing());

        let forced = Outcome::Aborted {
            target: UpdateTarget::Firmware,
            reason: OtaError::IdleTimeout,
        };
        assert_eq!(ctrl.handle_upload(b, UploadEvent::DataChunk(b"zz")), Outcome::Ignored);
        assert_eq!(ctrl.handle_upload(a, UploadEvent::DataChunk(b"rest")), forced);
        assert_eq!(ctrl.handle_upload(a, UploadEvent::End), Outcome::Ignored);
        assert_eq!(ctrl.take_forced_outcome(a), None);
    }
}
