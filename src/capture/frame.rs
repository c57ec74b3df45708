// frame.rs: One captured media sample plus the encoding helpers sources share:
// downscale, JPEG-encode, base64/data-URL conversion, ISO timestamps.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, GenericImageView};
use serde::Serialize;

use super::DeviceError;

/// A single captured sample, already encoded for transport.
#[derive(Clone, Serialize)]
pub struct Frame {
    /// Encoded bytes (JPEG for every built-in source)
    #[serde(skip)]
    pub data: Vec<u8>,
    /// MIME type of `data`
    pub mime: String,
    /// Width of the (possibly downscaled) image
    pub width: u32,
    /// Height of the (possibly downscaled) image
    pub height: u32,
    /// ISO-8601 timestamp of when the frame was captured
    pub timestamp: String,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("mime", &self.mime)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl Frame {
    /// Downscale `img` to at most `max_width` pixels wide and JPEG-encode it.
    pub fn encode_jpeg(img: &DynamicImage, max_width: u32, quality: u8) -> Result<Self, DeviceError> {
        let resized;
        let img = if max_width > 0 && img.width() > max_width {
            let ratio = max_width as f64 / img.width() as f64;
            let new_h = ((img.height() as f64 * ratio).round() as u32).max(1);
            resized = img.resize_exact(max_width, new_h, imageops::FilterType::Triangle);
            &resized
        } else {
            img
        };

        let (w, h) = img.dimensions();

        let mut jpeg_buf: Vec<u8> = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_buf, quality.clamp(1, 100));
            encoder
                .encode(img.to_rgb8().as_raw(), w, h, image::ExtendedColorType::Rgb8)
                .map_err(|e| DeviceError::FrameUnavailable(format!("jpeg encode: {e}")))?;
        }

        Ok(Self {
            data: jpeg_buf,
            mime: "image/jpeg".into(),
            width: w,
            height: h,
            timestamp: now_iso(),
        })
    }

    /// Same pixels, fresh capture timestamp.
    pub fn restamped(&self) -> Self {
        Self {
            timestamp: now_iso(),
            ..self.clone()
        }
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    /// `data:<mime>;base64,<payload>`, the form JSON endpoints expect.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }
}

/// Return the current UTC time as an ISO-8601 string with milliseconds.
pub fn now_iso() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = dur.as_secs();

    let days = secs / 86400;
    let time_secs = secs % 86400;
    let (year, month, day) = civil_date(days as i64);

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        year,
        month,
        day,
        time_secs / 3600,
        (time_secs % 3600) / 60,
        time_secs % 60,
        dur.subsec_millis()
    )
}

/// Calendar date `days` after 1970-01-01; negative values count backwards.
fn civil_date(days: i64) -> (i64, u32, u32) {
    // 400 Gregorian years are always 146 097 days.
    let mut year = 1970 + 400 * days.div_euclid(146_097);
    let mut rest = days.rem_euclid(146_097);
    loop {
        let len = if is_leap(year) { 366 } else { 365 };
        if rest < len {
            break;
        }
        rest -= len;
        year += 1;
    }
    let february = if is_leap(year) { 29 } else { 28 };
    let mut month = 1;
    for len in [31, february, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31] {
        if rest < len {
            break;
        }
        rest -= len;
        month += 1;
    }
    (year, month, rest as u32 + 1)
}

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn solid_image(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbaImage::new(w, h);
        for pixel in img.pixels_mut() {
            *pixel = image::Rgba([40, 80, 120, 255]);
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn wide_images_are_downscaled() {
        let frame = Frame::encode_jpeg(&solid_image(2048, 1024), 1024, 75).unwrap();
        assert_eq!((frame.width, frame.height), (1024, 512));
        assert_eq!(frame.mime, "image/jpeg");
        // JPEG SOI marker
        assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn narrow_images_keep_their_size() {
        let frame = Frame::encode_jpeg(&solid_image(320, 240), 1024, 75).unwrap();
        assert_eq!((frame.width, frame.height), (320, 240));
    }

    #[test]
    fn data_url_prefix() {
        let frame = Frame::encode_jpeg(&solid_image(8, 8), 0, 50).unwrap();
        let url = frame.to_data_url();
        assert!(url.starts_with("data:image/jpeg;base64,/9j/"));
    }

    #[test]
    fn epoch_day_conversion() {
        assert_eq!(civil_date(0), (1970, 1, 1));
        // 2000-02-29 is day 11016
        assert_eq!(civil_date(11_016), (2000, 2, 29));
        assert_eq!(civil_date(-1), (1969, 12, 31));
        assert_eq!(civil_date(20_088), (2024, 12, 31));
        assert_eq!(civil_date(20_089), (2025, 1, 1));
    }

    #[test]
    fn now_iso_format() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
        assert_eq!(&ts[19..20], ".");
    }
}
