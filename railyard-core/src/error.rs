use thiserror::Error;

/// Failures surfaced by the update core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtaError {
    #[error("OTA is disabled. Enable it from the index page for 60 seconds.")]
    WindowInactive,
    #[error("OTA update in progress. Please wait.")]
    SessionBusy,
    #[error("{0}")]
    DriverBeginFailed(String),
    #[error("{0}")]
    DriverWriteFailed(String),
    #[error("{0}")]
    DriverCommitFailed(String),
    #[error("Upload aborted")]
    UploadAborted,
    #[error("OTA window expired during upload")]
    WindowExpired,
    #[error("Upload stalled")]
    IdleTimeout,
}

impl OtaError {
    /// HTTP status for the error, `None` when the client is already gone.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            OtaError::WindowInactive | OtaError::WindowExpired => Some(403),
            OtaError::SessionBusy => Some(503),
            OtaError::DriverBeginFailed(_)
            | OtaError::DriverWriteFailed(_)
            | OtaError::DriverCommitFailed(_) => Some(500),
            OtaError::UploadAborted | OtaError::IdleTimeout => None,
        }
    }
}
