/// The `capture` module owns media acquisition: a [`MediaDevice`] hands out a
/// [`MediaStream`] whose tracks the session must stop on every exit path.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod frame;
#[cfg(feature = "screen")]
pub mod screen;
pub mod still;

pub use frame::{now_iso, Frame};

/// What the caller asks the device for, e.g. `{video: true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Constraints {
    pub video: bool,
    pub audio: bool,
    /// Frames wider than this are downscaled before encoding. 0 disables.
    pub max_width: u32,
    /// JPEG compression quality (1–100).
    pub jpeg_quality: u8,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: false,
            max_width: 1024,
            jpeg_quality: 75,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Permission denied, no such device, or the constraints cannot be met.
    #[error("media device unavailable: {0}")]
    Unavailable(String),
    #[error("frame unavailable: {0}")]
    FrameUnavailable(String),
}

/// Provider of live media streams (camera, screen, file, microphone...).
#[async_trait]
pub trait MediaDevice: Send + Sync {
    async fn acquire(&self, constraints: &Constraints) -> Result<Box<dyn MediaStream>, DeviceError>;

    fn name(&self) -> &str;
}

/// A live stream handed out by a [`MediaDevice`].
pub trait MediaStream: Send {
    /// Draw the current frame.
    fn grab(&mut self) -> Result<Frame, DeviceError>;

    /// Stop every track. Calling it again is a no-op.
    fn stop(&mut self);

    /// Number of tracks still live.
    fn active_tracks(&self) -> usize;
}
