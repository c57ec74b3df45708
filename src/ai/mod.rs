use async_trait::async_trait;

use crate::capture::Frame;

pub mod detection;
pub mod face;
pub mod prompt;
pub mod types;
pub use types::*;

/// A remote service that turns one captured frame into labeled, scored regions.
///
/// Implementations must be stateless per call: the controller issues at most
/// one call at a time per session and cancels it by aborting the task that
/// awaits it, so a call may be dropped at any await point.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, frame: &Frame) -> Result<Vec<Detection>, AiError>;

    /// Provider name for logging/display
    fn name(&self) -> &str;
}

/// How a client authenticates against its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiAuth {
    None,
    /// Send the key in the named header, e.g. `Prediction-Key`.
    Header { name: String, key: String },
    /// `Authorization: Bearer <key>`.
    Bearer(String),
}

impl ApiAuth {
    pub(crate) fn apply(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            ApiAuth::None => req,
            ApiAuth::Header { name, key } => req.header(name.as_str(), key.as_str()),
            ApiAuth::Bearer(key) => req.header("Authorization", format!("Bearer {}", key)),
        }
    }
}

/// Send a prepared request and decode the JSON body, mapping failures to [`AiError`].
pub(crate) async fn send_json(
    req: reqwest::RequestBuilder,
) -> Result<serde_json::Value, AiError> {
    let response = req
        .send()
        .await
        .map_err(|e| AiError::ConnectionError(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read error body".into());
        return Err(AiError::from_status(status, error_body));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| AiError::InvalidResponse(e.to_string()))
}
