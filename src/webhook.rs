// webhook.rs: Fire-and-forget delivery of each filtered result set to a
// caller-configured receiver at `http://{host}:{port}/api/{route}`.
//
// Failures are logged and never reach the session's error channel.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use url::Url;

use crate::capture::Frame;
use crate::session::ResultPayload;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub route: String,
    /// Attach the classified frame as a data URL.
    pub include_image: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".into(),
            port: 3001,
            route: "analyzed".into(),
            include_image: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),
    #[error("webhook failed: {0}")]
    Failed(String),
}

pub struct WebhookClient {
    url: Url,
    include_image: bool,
    client: Client,
}

impl WebhookClient {
    pub fn new(config: &WebhookConfig) -> Result<Self, WebhookError> {
        let raw = format!(
            "http://{}:{}/api/{}",
            config.host,
            config.port,
            config.route.trim_start_matches('/')
        );
        let url = Url::parse(&raw).map_err(|e| WebhookError::InvalidUrl(format!("{raw}: {e}")))?;
        Ok(Self {
            url,
            include_image: config.include_image,
            client: Client::new(),
        })
    }

    /// `None` when the config has the webhook switched off.
    pub fn from_config(config: &WebhookConfig) -> Result<Option<Self>, WebhookError> {
        if config.enabled {
            Self::new(config).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn build_body(&self, payload: &ResultPayload, frame: &Frame) -> Value {
        let mut body = json!({
            "cycle": payload.cycle,
            "timestamp": payload.timestamp,
            "results": payload.detections,
        });
        if self.include_image {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("image".into(), json!(frame.to_data_url()));
            }
        }
        body
    }

    pub async fn post(&self, payload: &ResultPayload, frame: &Frame) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&self.build_body(payload, frame))
            .send()
            .await
            .map_err(|e| WebhookError::Failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Failed(format!("HTTP {}", status)));
        }
        Ok(())
    }

    /// Deliver in the background. The returned handle is only useful to tests.
    pub fn fire(
        self: &Arc<Self>,
        payload: ResultPayload,
        frame: Arc<Frame>,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.post(&payload, &frame).await {
                Ok(()) => log::debug!("Webhook delivered cycle {} to {}", payload.cycle, this.url),
                Err(e) => log::warn!("Webhook to {} failed: {}", this.url, e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ResultPayload {
        ResultPayload {
            cycle: 7,
            timestamp: "t".into(),
            frame_width: 2,
            frame_height: 2,
            detections: Vec::new(),
        }
    }

    fn frame() -> Frame {
        Frame {
            data: vec![0xFF, 0xD8, 0xFF],
            mime: "image/jpeg".into(),
            width: 2,
            height: 2,
            timestamp: "t".into(),
        }
    }

    #[test]
    fn url_from_host_port_route() {
        let client = WebhookClient::new(&WebhookConfig::default()).unwrap();
        assert_eq!(client.url().as_str(), "http://localhost:3001/api/analyzed");

        let cfg = WebhookConfig {
            host: "10.0.0.5".into(),
            port: 8080,
            route: "/face_recognition".into(),
            ..WebhookConfig::default()
        };
        assert_eq!(
            WebhookClient::new(&cfg).unwrap().url().as_str(),
            "http://10.0.0.5:8080/api/face_recognition"
        );
    }

    #[test]
    fn disabled_config_builds_nothing() {
        assert!(WebhookClient::from_config(&WebhookConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn bad_host_is_rejected() {
        let cfg = WebhookConfig {
            host: "bad host".into(),
            ..WebhookConfig::default()
        };
        assert!(matches!(
            WebhookClient::new(&cfg),
            Err(WebhookError::InvalidUrl(_))
        ));
    }

    #[test]
    fn body_with_and_without_image() {
        let with = WebhookClient::new(&WebhookConfig::default()).unwrap();
        let body = with.build_body(&payload(), &frame());
        assert_eq!(body["cycle"], 7);
        assert!(body["results"].as_array().unwrap().is_empty());
        assert_eq!(body["image"], "data:image/jpeg;base64,/9j/");

        let without = WebhookClient::new(&WebhookConfig {
            include_image: false,
            ..WebhookConfig::default()
        })
        .unwrap();
        assert!(without.build_body(&payload(), &frame()).get("image").is_none());
    }
}
