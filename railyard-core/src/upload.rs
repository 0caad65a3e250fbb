//! One HTTP upload request, from raw body reads to the final reply.

use crate::clock::Clock;
use crate::controller::{RequestId, UpdateController};
use crate::error::OtaError;
use crate::flash::{FlashUpdater, UpdateTarget};
use crate::http::{upload_reply, Reply};
use crate::multipart::{MultipartDecoder, MultipartError, Part};
use crate::session::{Outcome, UploadEvent};
use crate::volume::VolumeDriver;

/// Per-request view of an upload: forwards events until the request's
/// fate is decided and turns that into the HTTP reply.
#[derive(Debug)]
pub struct UploadRequest {
    id: RequestId,
    target: UpdateTarget,
    verdict: Option<Outcome>,
}

impl UploadRequest {
    /// `content_length` is the transport header, logged and otherwise ignored.
    pub fn new(id: RequestId, target: UpdateTarget, content_length: Option<u64>) -> Self {
        if let Some(len) = content_length {
            log::info!(
                "OTA {}: Content-Length (header) = {} (not trusted)",
                target,
                len
            );
        }
        Self {
            id,
            target,
            verdict: None,
        }
    }

    pub fn target(&self) -> UpdateTarget {
        self.target
    }

    /// True once nothing more needs to be read from the client.
    pub fn is_decided(&self) -> bool {
        self.verdict.is_some()
    }

    pub fn feed<C, F, V>(
        &mut self,
        controller: &mut UpdateController<C, F, V>,
        event: UploadEvent<'_>,
    ) -> Outcome
    where
        C: Clock,
        F: FlashUpdater,
        V: VolumeDriver,
    {
        if self.verdict.is_some() {
            return Outcome::Ignored;
        }
        let outcome = controller.handle_upload(self.id, event);
        if matches!(
            outcome,
            Outcome::Rejected(_)
                | Outcome::Committed(_)
                | Outcome::Failed { .. }
                | Outcome::Aborted { .. }
        ) {
            self.verdict = Some(outcome.clone());
        }
        outcome
    }

    /// Reply once the body has been consumed. `None` means the client is
    /// gone and nothing should be sent.
    pub fn finish<C, F, V>(&mut self, controller: &mut UpdateController<C, F, V>) -> Option<Reply>
    where
        C: Clock,
        F: FlashUpdater,
        V: VolumeDriver,
    {
        if self.verdict.is_none() {
            self.verdict = controller.take_forced_outcome(self.id);
        }
        match &self.verdict {
            Some(outcome) => upload_reply(self.target, outcome),
            None if !controller.window_active() => Some(Reply::error(&OtaError::WindowInactive)),
            None => Some(Reply::text(400, "Missing update file")),
        }
    }
}

/// Multipart request body feeding an [`UploadRequest`].
pub struct BodyUpload {
    request: UploadRequest,
    decoder: MultipartDecoder,
    fault: Option<MultipartError>,
}

impl BodyUpload {
    pub fn new(
        request: UploadRequest,
        content_type: &str,
        field: &str,
    ) -> Result<Self, MultipartError> {
        Ok(Self {
            request,
            decoder: MultipartDecoder::from_content_type(content_type, field)?,
            fault: None,
        })
    }

    /// True when further body reads would change nothing.
    pub fn is_decided(&self) -> bool {
        self.request.is_decided() || self.fault.is_some()
    }

    /// Decodes one socket read and forwards the parts.
    pub fn push<C, F, V>(&mut self, controller: &mut UpdateController<C, F, V>, chunk: &[u8])
    where
        C: Clock,
        F: FlashUpdater,
        V: VolumeDriver,
    {
        if self.is_decided() {
            return;
        }
        let target = self.request.target;
        let request = &mut self.request;
        let result = self.decoder.feed(chunk, &mut |part| {
            let event = match part {
                Part::Start { filename } => UploadEvent::Start { target, filename },
                Part::Data(data) => UploadEvent::DataChunk(data),
                Part::End => UploadEvent::End,
            };
            request.feed(controller, event);
        });
        if let Err(e) = result {
            self.fail(controller, e);
        }
    }

    /// The client disconnected or the read failed.
    pub fn abandon<C, F, V>(&mut self, controller: &mut UpdateController<C, F, V>)
    where
        C: Clock,
        F: FlashUpdater,
        V: VolumeDriver,
    {
        self.fail(controller, MultipartError::Truncated);
    }

    /// Called after the last read.
    pub fn finish<C, F, V>(&mut self, controller: &mut UpdateController<C, F, V>) -> Option<Reply>
    where
        C: Clock,
        F: FlashUpdater,
        V: VolumeDriver,
    {
        if !self.request.is_decided() && self.fault.is_none() {
            if let Err(e) = self.decoder.finish() {
                self.fail(controller, e);
            }
        }
        match &self.fault {
            Some(MultipartError::Truncated) => None,
            Some(e) => Some(Reply::text(400, e.to_string())),
            None => self.request.finish(controller),
        }
    }

    fn fail<C, F, V>(&mut self, controller: &mut UpdateController<C, F, V>, error: MultipartError)
    where
        C: Clock,
        F: FlashUpdater,
        V: VolumeDriver,
    {
        log::warn!("OTA {}: {}", self.request.target, error);
        self.request.feed(controller, UploadEvent::Abort);
        self.fault = Some(error);
    }
}
