use serde::{Deserialize, Serialize};

use crate::ai::AiError;
use crate::capture::{Constraints, DeviceError};
use crate::render::{RenderedDetection, SortSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Continuous,
    Once,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Running,
    RunningOnce,
    Stopped,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Running | SessionState::RunningOnce)
    }
}

/// Parameters of one capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub mode: Mode,
    /// Polling period, continuous mode only.
    pub interval_ms: u64,
    /// Threshold on the 0–100 scale.
    pub min_confidence: f64,
    pub sort: SortSpec,
    pub constraints: Constraints,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Continuous,
            interval_ms: 2000,
            min_confidence: 95.0,
            sort: SortSpec::default(),
            constraints: Constraints::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.mode == Mode::Continuous && self.interval_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "intervalMs must be greater than 0".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(SessionError::InvalidConfig(format!(
                "minConfidence must be within 0..=100, got {}",
                self.min_confidence
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(DeviceError),
    #[error("frame unavailable: {0}")]
    FrameUnavailable(DeviceError),
    #[error("classification failed: {0}")]
    ClassificationFailed(#[source] AiError),
    /// Cancelled by `stop()` or superseded by a newer capture. Never surfaced.
    #[error("classification aborted")]
    Aborted,
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
    #[error("no capture session is running")]
    NotRunning,
}

impl SessionError {
    /// Short machine-readable kind, used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::DeviceUnavailable(_) => "deviceUnavailable",
            SessionError::FrameUnavailable(_) => "frameUnavailable",
            SessionError::ClassificationFailed(_) => "classificationFailed",
            SessionError::Aborted => "aborted",
            SessionError::InvalidConfig(_) => "invalidConfig",
            SessionError::NotRunning => "notRunning",
        }
    }
}

/// Emitted for every successful capture cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload {
    /// Monotonic per controller; later cycles have larger ids.
    pub cycle: u64,
    /// Capture timestamp of the classified frame.
    pub timestamp: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub detections: Vec<RenderedDetection>,
}

/// Emitted for a failed capture cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub cycle: u64,
    pub kind: String,
    pub message: String,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn validation_bounds() {
        let zero_interval = SessionConfig {
            interval_ms: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            zero_interval.validate(),
            Err(SessionError::InvalidConfig(_))
        ));

        // interval is irrelevant in once mode
        let once = SessionConfig {
            mode: Mode::Once,
            interval_ms: 0,
            ..SessionConfig::default()
        };
        assert!(once.validate().is_ok());

        for bad in [-1.0, 100.5, f64::NAN] {
            let cfg = SessionConfig {
                min_confidence: bad,
                ..SessionConfig::default()
            };
            assert!(cfg.validate().is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn active_states() {
        assert!(SessionState::Running.is_active());
        assert!(SessionState::RunningOnce.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Stopped.is_active());
    }

    #[test]
    fn config_deserializes_partial_camel_case() {
        let cfg: SessionConfig =
            serde_json::from_str(r#"{"mode":"once","minConfidence":80,"sort":{"key":"label"}}"#)
                .unwrap();
        assert_eq!(cfg.mode, Mode::Once);
        assert_eq!(cfg.min_confidence, 80.0);
        assert_eq!(cfg.interval_ms, 2000);
        assert_eq!(cfg.sort.key, crate::render::SortKey::Label);
    }
}
