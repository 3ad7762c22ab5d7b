use thiserror::Error;

/// Errors raised by the sound-card layer.
///
/// Every failure is local to one card or one stream; none of these is fatal
/// to the process. Mixer operations a backend cannot perform return
/// [`SoundCardError::Unsupported`] so callers can hide the matching control.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SoundCardError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device busy: {0}")]
    DeviceBusy(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("card cannot be duplicated: {0}")]
    DuplicateUnsupported(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("device lost")]
    DeviceLost,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl SoundCardError {
    /// Whether the error means the device itself went away.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}
