//! Error taxonomy for blurred playback and overlay layout.

use std::path::PathBuf;

use thiserror::Error;

/// Terminal failure of a single playback attempt.
///
/// Every variant is non-fatal to the host: it is delivered through the
/// playback error callback and never propagated to the caller's thread.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// Audio path is empty or does not exist.
    #[error("file not found: {}", path_label(.0))]
    ResourceNotFound(PathBuf),

    /// Malformed or unsupported media.
    #[error("failed to decode {}: {reason}", path.display())]
    DecodeError { path: PathBuf, reason: String },

    /// Output device could not be opened, configured or written.
    #[error("audio device error: {0}")]
    DeviceError(String),

    /// Failure while disposing a decoder or device handle.
    ///
    /// Only ever logged; never surfaced through the error callback.
    #[error("failed to release {resource}: {reason}")]
    ResourceReleaseError {
        resource: &'static str,
        reason: String,
    },
}

impl PlaybackError {
    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DecodeError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn device(reason: impl ToString) -> Self {
        Self::DeviceError(reason.to_string())
    }
}

/// Why an overlay layer could not be laid out.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OverlayError {
    #[error("no {0} image configured")]
    ImageNotConfigured(&'static str),

    #[error("image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("failed to read image {}: {reason}", path.display())]
    ImageUnreadable { path: PathBuf, reason: String },
}

fn path_label(path: &std::path::Path) -> String {
    if path.as_os_str().is_empty() {
        "<empty path>".to_string()
    } else {
        path.display().to_string()
    }
}
