use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::ai::detection::{DetectionClient, PayloadFormat};
use crate::ai::face::FaceVerifyClient;
use crate::ai::prompt::PromptClassifier;
use crate::ai::{ApiAuth, Classifier};
use crate::capture::Constraints;
use crate::render::SortSpec;
use crate::session::{Mode, SessionConfig};
use crate::webhook::{WebhookClient, WebhookConfig};

/// Env var consulted when `apiKey` is empty.
pub const API_KEY_ENV: &str = "LOOKOUT_API_KEY";

/// Lowest score of a strong face match (distance 0.4).
pub const FACE_STRONG_MATCH_PERCENT: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassifierKind {
    #[default]
    Detection,
    Prompt,
    /// Scores are `1 - distance`, so typical matches land between 40 and 75.
    /// The default `minConfidence` of 95 hides almost all of them.
    FaceVerify,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings io: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("settings serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub classifier: ClassifierKind,
    pub endpoint: String,
    pub api_key: String,
    /// Header carrying the key, e.g. `Prediction-Key`. Empty means bearer or none.
    pub api_key_header: String,
    pub use_bearer: bool,
    /// Send raw image bytes instead of a JSON data URL (detection only).
    pub binary_payload: bool,
    /// Model name for the prompt classifier.
    pub model: String,
    /// Yes/no question for the prompt classifier.
    pub prompt: String,
    pub face_service_url: String,
    pub username: String,
    pub mode: Mode,
    /// Seconds between captures.
    pub capture_interval: f64,
    /// 0–100.
    pub min_confidence: f64,
    pub screenshot_max_width: u32,
    pub jpeg_quality: u8,
    // Tables last so the TOML output stays valid.
    pub sort: SortSpec,
    pub webhook: WebhookConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            classifier: ClassifierKind::Detection,
            endpoint: String::new(),
            api_key: String::new(),
            api_key_header: String::new(),
            use_bearer: false,
            binary_payload: false,
            model: "gpt-4o".into(),
            prompt: String::new(),
            face_service_url: "http://localhost:5001".into(),
            username: String::new(),
            mode: Mode::Continuous,
            capture_interval: 2.0,
            min_confidence: 95.0,
            sort: SortSpec::default(),
            screenshot_max_width: 1024,
            jpeg_quality: 75,
            webhook: WebhookConfig::default(),
        }
    }
}

impl Settings {
    /// Load from `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            log::info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        log::info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// `apiKey`, falling back to `LOOKOUT_API_KEY`.
    pub fn resolved_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        std::env::var(API_KEY_ENV).unwrap_or_default()
    }

    fn auth(&self) -> ApiAuth {
        let key = self.resolved_api_key();
        if key.is_empty() {
            ApiAuth::None
        } else if !self.api_key_header.is_empty() {
            ApiAuth::Header {
                name: self.api_key_header.clone(),
                key,
            }
        } else if self.use_bearer {
            ApiAuth::Bearer(key)
        } else {
            ApiAuth::Header {
                name: "api-key".into(),
                key,
            }
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            mode: self.mode,
            interval_ms: (self.capture_interval.max(0.0) * 1000.0).round() as u64,
            min_confidence: self.min_confidence,
            sort: self.sort,
            constraints: Constraints {
                video: true,
                audio: false,
                max_width: self.screenshot_max_width,
                jpeg_quality: self.jpeg_quality,
            },
        }
    }

    pub fn build_classifier(&self) -> Result<Arc<dyn Classifier>, SettingsError> {
        let require_endpoint = || {
            if self.endpoint.trim().is_empty() {
                Err(SettingsError::Invalid("endpoint is required".into()))
            } else {
                Ok(self.endpoint.clone())
            }
        };
        Ok(match self.classifier {
            ClassifierKind::Detection => {
                let format = if self.binary_payload {
                    PayloadFormat::Binary
                } else {
                    PayloadFormat::Json
                };
                Arc::new(
                    DetectionClient::new(require_endpoint()?)
                        .with_auth(self.auth())
                        .with_format(format),
                )
            }
            ClassifierKind::Prompt => Arc::new(
                PromptClassifier::new(require_endpoint()?, self.model.clone(), self.auth())
                    .with_question(self.prompt.clone()),
            ),
            ClassifierKind::FaceVerify => {
                if let Some(warning) = self.threshold_warning() {
                    log::warn!("{}", warning);
                }
                Arc::new(self.face_client())
            }
        })
    }

    /// Set when `minConfidence` would filter out strong face matches.
    pub fn threshold_warning(&self) -> Option<String> {
        (self.classifier == ClassifierKind::FaceVerify
            && self.min_confidence > FACE_STRONG_MATCH_PERCENT)
            .then(|| {
                format!(
                    "minConfidence {} is above {}; face matches score 1 - distance and most will be hidden",
                    self.min_confidence, FACE_STRONG_MATCH_PERCENT
                )
            })
    }

    pub fn face_client(&self) -> FaceVerifyClient {
        FaceVerifyClient::new(self.face_service_url.clone(), self.username.clone())
    }

    pub fn build_webhook(&self) -> Result<Option<WebhookClient>, SettingsError> {
        WebhookClient::from_config(&self.webhook).map_err(|e| SettingsError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let mut s = Settings::default();
        s.classifier = ClassifierKind::FaceVerify;
        s.min_confidence = 60.0;
        s.webhook.enabled = true;
        s.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), s);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "classifier = \"prompt\"\nendpoint = \"http://x\"\ncaptureInterval = 0.5\n\n[sort]\nkey = \"label\"\norder = \"ascending\"\n",
        )
        .unwrap();
        let s = Settings::load(&path).unwrap();
        assert_eq!(s.classifier, ClassifierKind::Prompt);
        assert_eq!(s.min_confidence, 95.0);

        let cfg = s.session_config();
        assert_eq!(cfg.interval_ms, 500);
        assert_eq!(cfg.sort.key, crate::render::SortKey::Label);
        assert_eq!(cfg.constraints.max_width, 1024);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "minConfidence = [").unwrap();
        assert!(matches!(Settings::load(&path), Err(SettingsError::Parse(_))));
    }

    #[test]
    fn classifier_selection() {
        let s = Settings::default();
        assert!(matches!(
            s.build_classifier(),
            Err(SettingsError::Invalid(_))
        ));

        let s = Settings {
            endpoint: "http://localhost:5000/predict-asl".into(),
            ..Settings::default()
        };
        assert_eq!(s.build_classifier().unwrap().name(), "http-detection");

        let face = Settings {
            classifier: ClassifierKind::FaceVerify,
            ..Settings::default()
        };
        assert_eq!(face.build_classifier().unwrap().name(), "face-verify");
    }

    #[test]
    fn auth_selection() {
        let header = Settings {
            api_key: "k".into(),
            api_key_header: "Prediction-Key".into(),
            ..Settings::default()
        };
        assert_eq!(
            header.auth(),
            ApiAuth::Header {
                name: "Prediction-Key".into(),
                key: "k".into()
            }
        );

        let bearer = Settings {
            api_key: "k".into(),
            use_bearer: true,
            ..Settings::default()
        };
        assert_eq!(bearer.auth(), ApiAuth::Bearer("k".into()));
    }

    #[test]
    fn face_threshold_warning() {
        let face = Settings {
            classifier: ClassifierKind::FaceVerify,
            ..Settings::default()
        };
        assert!(face.threshold_warning().unwrap().contains("95"));

        let tuned = Settings {
            min_confidence: 50.0,
            ..face
        };
        assert!(tuned.threshold_warning().is_none());
        assert!(Settings::default().threshold_warning().is_none());
    }

    #[test]
    fn webhook_off_by_default() {
        assert!(Settings::default().build_webhook().unwrap().is_none());
    }
}
