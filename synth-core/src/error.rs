//! Error types for the engine.
//!
//! Capture failures form a closed set; they end the current listening session
//! without taking the analysis loop down. A pitch window that yields no
//! estimate is not an error and never appears here.

use thiserror::Error;

/// Why the capture device could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("audio capture is not supported on this platform")]
    UnsupportedPlatform,
    #[error("microphone access was denied")]
    PermissionDenied,
    #[error("no microphone found")]
    DeviceUnavailable,
    #[error("microphone is being used by another application")]
    DeviceBusy,
    #[error("failed to access microphone: {0}")]
    Unknown(String),
}

impl CaptureError {
    /// Classifies a backend-specific message that carries no structured code.
    pub fn from_backend_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
            CaptureError::PermissionDenied
        } else if lower.contains("busy") || lower.contains("in use") {
            CaptureError::DeviceBusy
        } else if lower.contains("not found") || lower.contains("no such device") {
            CaptureError::DeviceUnavailable
        } else {
            CaptureError::Unknown(message.to_string())
        }
    }
}

impl From<cpal::BuildStreamError> for CaptureError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceUnavailable,
            cpal::BuildStreamError::StreamConfigNotSupported => CaptureError::UnsupportedPlatform,
            cpal::BuildStreamError::BackendSpecific { err } => {
                CaptureError::from_backend_message(&err.description)
            }
            other => CaptureError::Unknown(other.to_string()),
        }
    }
}

impl From<cpal::SupportedStreamConfigsError> for CaptureError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        match err {
            cpal::SupportedStreamConfigsError::DeviceNotAvailable => CaptureError::DeviceUnavailable,
            cpal::SupportedStreamConfigsError::BackendSpecific { err } => {
                CaptureError::from_backend_message(&err.description)
            }
            other => CaptureError::Unknown(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for CaptureError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::DeviceNotAvailable => CaptureError::DeviceUnavailable,
            cpal::PlayStreamError::BackendSpecific { err } => {
                CaptureError::from_backend_message(&err.description)
            }
            #[allow(unreachable_patterns)]
            other => CaptureError::Unknown(other.to_string()),
        }
    }
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("decay factor must be in (0, 1], got {0}")]
    InvalidDecayFactor(f32),
    #[error("frequency range {min} Hz..{max} Hz is empty or non-positive")]
    InvalidFrequencyRange { min: f32, max: f32 },
    #[error("{name} must be greater than zero")]
    NotPositive { name: &'static str },
}

/// Failures of the analysis engine itself.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("high accuracy mode needs a neural pitch model, none is attached")]
    ModelUnavailable,
    #[error("the inference worker has shut down")]
    WorkerGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_messages_are_classified() {
        assert_eq!(
            CaptureError::from_backend_message("Permission denied by the user"),
            CaptureError::PermissionDenied
        );
        assert_eq!(CaptureError::from_backend_message("Device or resource busy"), CaptureError::DeviceBusy);
        assert!(matches!(
            CaptureError::from_backend_message("snd_pcm_open failed"),
            CaptureError::Unknown(_)
        ));
    }

    #[test]
    fn build_errors_map_into_taxonomy() {
        assert_eq!(
            CaptureError::from(cpal::BuildStreamError::DeviceNotAvailable),
            CaptureError::DeviceUnavailable
        );
        assert_eq!(
            CaptureError::from(cpal::BuildStreamError::StreamConfigNotSupported),
            CaptureError::UnsupportedPlatform
        );
    }
}
