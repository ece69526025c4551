//! Local capture devices

use super::TrackKind;
use crate::Error;
use async_trait::async_trait;
use std::sync::Arc;
use watchparty_core::AudioTap;

/// Why a capture device could not be opened
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The user (or platform policy) refused access
    #[error("permission denied")]
    PermissionDenied,

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl CaptureError {
    pub(crate) fn into_error(self, kind: TrackKind) -> Error {
        match self {
            CaptureError::PermissionDenied => Error::PermissionDenied { kind },
            CaptureError::DeviceUnavailable(reason) => {
                Error::CaptureFailed(format!("{kind}: {reason}"))
            }
        }
    }
}

/// Platform media acquisition
///
/// `open` may wait on a permission prompt for an arbitrary time.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn open(&self, kind: TrackKind) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// A live capture; `stop` releases the hardware
pub trait CaptureStream: Send + Sync {
    /// Release the device. Called at most once per stream.
    fn stop(&self);

    /// Recent PCM for voice activity detection (audio captures only)
    fn audio_tap(&self) -> Option<Arc<dyn AudioTap>> {
        None
    }
}
