// face.rs: Client for the local face recognition service.
//
// Verification forwards the frame and relays the service's match distance as a
// confidence score. The enrollment calls manage the per-person image folders
// the service matches against.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use url::Url;

use super::{send_json, AiError, Classifier, Detection};
use crate::capture::Frame;

/// Qualitative reading of a match distance (lower is closer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchStrength {
    Strong,
    Moderate,
    Weak,
}

impl MatchStrength {
    pub fn from_distance(distance: f64) -> Self {
        if distance <= 0.4 {
            MatchStrength::Strong
        } else if distance <= 0.6 {
            MatchStrength::Moderate
        } else {
            MatchStrength::Weak
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchStrength::Strong => "Strong",
            MatchStrength::Moderate => "Moderate",
            MatchStrength::Weak => "Weak",
        }
    }
}

/// Response of `POST /verify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub matched: bool,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub distance: Option<f64>,
}

impl FaceMatch {
    /// A match only counts when the service named someone and gave a distance.
    pub fn is_match(&self) -> bool {
        self.matched && self.identity.is_some() && self.distance.is_some()
    }

    pub fn strength(&self) -> Option<MatchStrength> {
        self.distance
            .filter(|_| self.is_match())
            .map(MatchStrength::from_distance)
    }

    /// The match as one detection, its strength carried as the note.
    pub fn to_detections(&self) -> Vec<Detection> {
        match (&self.identity, self.distance) {
            (Some(identity), Some(distance)) if self.matched => {
                let strength = MatchStrength::from_distance(distance);
                vec![Detection::new(display_identity(identity), 1.0 - distance)
                    .with_note(strength.as_str())]
            }
            _ => Vec::new(),
        }
    }
}

/// `"jane-doe"` becomes `"Jane Doe"`.
pub fn display_identity(identity: &str) -> String {
    identity
        .replace('-', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One image sent for enrollment. `name` keeps the relative path, e.g.
/// `jane-doe/1.jpg`; the service takes the person name from its parent folder.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollImage {
    pub name: String,
    pub base64: String,
}

pub struct FaceVerifyClient {
    base_url: String,
    username: String,
    client: Client,
}

impl FaceVerifyClient {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            client: Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, AiError> {
        let mut base = self.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Url::parse(&base)
            .and_then(|u| u.join(path))
            .map_err(|e| AiError::ConnectionError(format!("bad face service url: {e}")))
    }

    pub async fn verify(&self, frame: &Frame) -> Result<FaceMatch, AiError> {
        let url = self.endpoint("verify")?;
        let body = json!({ "image": frame.to_data_url(), "username": self.username });
        let resp = send_json(self.client.post(url).json(&body)).await?;
        parse_match(resp)
    }

    pub async fn list_folders(&self) -> Result<Vec<String>, AiError> {
        let mut url = self.endpoint("folders")?;
        url.query_pairs_mut().append_pair("username", &self.username);
        let resp = send_json(self.client.get(url)).await?;
        let folders = resp
            .get("folders")
            .and_then(Value::as_array)
            .ok_or_else(|| AiError::InvalidResponse("missing folders".into()))?;
        Ok(folders
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    pub async fn delete_folder(&self, name: &str) -> Result<String, AiError> {
        let mut url = self.endpoint("delete-folder")?;
        url.path_segments_mut()
            .map_err(|_| AiError::ConnectionError("face service url cannot be a base".into()))?
            .push(name);
        let resp = send_json(self.client.delete(url)).await?;
        Ok(message_of(&resp))
    }

    pub async fn enroll(&self, images: Vec<EnrollImage>) -> Result<String, AiError> {
        if images.is_empty() {
            return Err(AiError::ModelError("no images to enroll".into()));
        }
        let url = self.endpoint("enroll-folder")?;
        let body = json!({ "images": images, "username": self.username });
        let resp = send_json(self.client.post(url).json(&body)).await?;
        Ok(message_of(&resp))
    }

    /// Enroll every JPEG/PNG in `dir` under the directory's own name.
    pub async fn enroll_dir(&self, dir: &Path) -> Result<String, AiError> {
        let images = collect_enroll_images(dir)
            .await
            .map_err(|e| AiError::ModelError(format!("{}: {e}", dir.display())))?;
        log::info!("Enrolling {} images from {}", images.len(), dir.display());
        self.enroll(images).await
    }
}

#[async_trait]
impl Classifier for FaceVerifyClient {
    async fn classify(&self, frame: &Frame) -> Result<Vec<Detection>, AiError> {
        let result = self.verify(frame).await?;
        match result.strength() {
            Some(strength) => {
                log::debug!("Face match {:?} ({})", result.identity, strength.as_str())
            }
            None => log::debug!("No face match"),
        }
        Ok(result.to_detections())
    }

    fn name(&self) -> &str {
        "face-verify"
    }
}

fn parse_match(resp: Value) -> Result<FaceMatch, AiError> {
    if let Some(err) = resp.get("error").and_then(Value::as_str) {
        return Err(AiError::ModelError(err.to_string()));
    }
    serde_json::from_value(resp).map_err(|e| AiError::InvalidResponse(e.to_string()))
}

fn message_of(resp: &Value) -> String {
    resp.get("message")
        .and_then(Value::as_str)
        .unwrap_or("ok")
        .to_string()
}

async fn collect_enroll_images(dir: &Path) -> std::io::Result<Vec<EnrollImage>> {
    let person = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();

    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let mime = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("png") => "image/png",
            _ => continue,
        };
        paths.push((path, mime));
    }
    paths.sort();

    let mut images = Vec::with_capacity(paths.len());
    for (path, mime) in paths {
        let bytes = tokio::fs::read(&path).await?;
        let file = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        images.push(EnrollImage {
            name: format!("{}/{}", person, file),
            base64: format!(
                "data:{};base64,{}",
                mime,
                base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &bytes)
            ),
        });
    }
    Ok(images)
}
