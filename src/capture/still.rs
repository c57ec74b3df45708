// still.rs: "Uploaded file" source. The image is decoded and encoded once at
// acquisition; every grab returns the same pixels with a fresh timestamp.

use async_trait::async_trait;
use std::path::PathBuf;

use super::{Constraints, DeviceError, Frame, MediaDevice, MediaStream};

pub struct StillImageDevice {
    path: PathBuf,
}

impl StillImageDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MediaDevice for StillImageDevice {
    async fn acquire(&self, constraints: &Constraints) -> Result<Box<dyn MediaStream>, DeviceError> {
        if !constraints.video {
            return Err(DeviceError::Unavailable(
                "still image source only provides a video track".into(),
            ));
        }

        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| DeviceError::Unavailable(format!("{}: {e}", self.path.display())))?;

        let max_width = constraints.max_width;
        let quality = constraints.jpeg_quality;
        // Decoding a large photo is CPU-bound; keep it off the async workers.
        let frame = tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&bytes)
                .map_err(|e| DeviceError::Unavailable(format!("decode: {e}")))?;
            Frame::encode_jpeg(&img, max_width, quality)
        })
        .await
        .map_err(|e| DeviceError::Unavailable(e.to_string()))??;

        log::info!(
            "Still image source acquired: {} ({}x{})",
            self.path.display(),
            frame.width,
            frame.height
        );
        Ok(Box::new(StillStream { frame, live: true }))
    }

    fn name(&self) -> &str {
        "still-image"
    }
}

struct StillStream {
    frame: Frame,
    live: bool,
}

impl MediaStream for StillStream {
    fn grab(&mut self) -> Result<Frame, DeviceError> {
        if !self.live {
            return Err(DeviceError::FrameUnavailable("stream stopped".into()));
        }
        Ok(self.frame.restamped())
    }

    fn stop(&mut self) {
        self.live = false;
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::path::Path;

    fn write_png(dir: &Path, w: u32, h: u32) -> PathBuf {
        let path = dir.join("still.png");
        DynamicImage::ImageRgb8(RgbImage::new(w, h)).save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn acquire_grab_stop() {
        let dir = tempfile::tempdir().unwrap();
        let device = StillImageDevice::new(write_png(dir.path(), 64, 48));

        let mut stream = device.acquire(&Constraints::default()).await.unwrap();
        assert_eq!(stream.active_tracks(), 1);

        let frame = stream.grab().unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));

        stream.stop();
        stream.stop();
        assert_eq!(stream.active_tracks(), 0);
        assert!(matches!(stream.grab(), Err(DeviceError::FrameUnavailable(_))));
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let device = StillImageDevice::new("/nonexistent/lookout/frame.png");
        let err = device.acquire(&Constraints::default()).await.err().unwrap();
        assert!(matches!(err, DeviceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn audio_only_constraints_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let device = StillImageDevice::new(write_png(dir.path(), 4, 4));
        let constraints = Constraints {
            video: false,
            audio: true,
            ..Constraints::default()
        };
        assert!(device.acquire(&constraints).await.is_err());
    }
}
