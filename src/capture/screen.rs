// screen.rs: Primary-monitor capture via `xcap`. Each grab takes a fresh
// screenshot, downscales it and JPEG-encodes it.

use async_trait::async_trait;
use image::DynamicImage;

use super::{Constraints, DeviceError, Frame, MediaDevice, MediaStream};

#[derive(Default)]
pub struct ScreenDevice;

impl ScreenDevice {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaDevice for ScreenDevice {
    async fn acquire(&self, constraints: &Constraints) -> Result<Box<dyn MediaStream>, DeviceError> {
        if !constraints.video {
            return Err(DeviceError::Unavailable(
                "screen source only provides a video track".into(),
            ));
        }
        // Probe once so a missing display fails `start` instead of every cycle.
        primary_monitor().map_err(DeviceError::Unavailable)?;
        log::info!("Screen source acquired");
        Ok(Box::new(ScreenStream {
            max_width: constraints.max_width,
            jpeg_quality: constraints.jpeg_quality,
            live: true,
        }))
    }

    fn name(&self) -> &str {
        "screen"
    }
}

struct ScreenStream {
    max_width: u32,
    jpeg_quality: u8,
    live: bool,
}

impl MediaStream for ScreenStream {
    fn grab(&mut self) -> Result<Frame, DeviceError> {
        if !self.live {
            return Err(DeviceError::FrameUnavailable("stream stopped".into()));
        }
        let monitor = primary_monitor().map_err(DeviceError::FrameUnavailable)?;
        let raw = monitor
            .capture_image()
            .map_err(|e| DeviceError::FrameUnavailable(format!("capture_image: {e}")))?;
        Frame::encode_jpeg(&DynamicImage::ImageRgba8(raw), self.max_width, self.jpeg_quality)
    }

    fn stop(&mut self) {
        self.live = false;
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.live)
    }
}

fn primary_monitor() -> Result<xcap::Monitor, String> {
    let monitors = xcap::Monitor::all().map_err(|e| format!("enumerate monitors: {e}"))?;
    let mut fallback = None;
    for monitor in monitors {
        if monitor.is_primary() {
            return Ok(monitor);
        }
        fallback.get_or_insert(monitor);
    }
    fallback.ok_or_else(|| "no monitors found".to_string())
}
