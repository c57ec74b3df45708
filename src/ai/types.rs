use serde::{Deserialize, Serialize};

/// Normalized rectangle, every field relative to the frame dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left: clamp_unit(left),
            top: clamp_unit(top),
            width: clamp_unit(width),
            height: clamp_unit(height),
        }
    }
}

/// One labeled region returned by a classifier.
///
/// Detections are created fresh for every classification response; nothing
/// is tracked or merged across frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub label: String,
    /// Score in `[0, 1]`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    /// Short qualifier shown next to the result, e.g. `Strong` for a face match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence: clamp_unit(confidence),
            bounding_box: None,
            note: None,
        }
    }

    pub fn with_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = Some(bounding_box);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Confidence on the 0–100 scale used by thresholds and captions.
    pub fn percent(&self) -> f64 {
        self.confidence * 100.0
    }
}

/// Error type for classifier calls
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),
    #[error("Authentication failed: {0}")]
    AuthError(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Model error: {0}")]
    ModelError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl AiError {
    /// Map a non-success HTTP status and its body to an error.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => AiError::AuthError(body),
            429 => AiError::RateLimited {
                retry_after_ms: 1000,
            },
            _ => AiError::ConnectionError(format!("HTTP {}: {}", status, body)),
        }
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
