use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{send_json, AiError, ApiAuth, BoundingBox, Classifier, Detection};
use crate::capture::Frame;

/// How the frame travels to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// `{"image": "data:image/jpeg;base64,..."}`
    #[default]
    Json,
    /// Raw encoded bytes as `application/octet-stream`.
    Binary,
}

/// Client for an object-detection style endpoint.
///
/// Understands the common response shapes: a list of
/// `{label, confidence, boundingBox}` records (under `detections`,
/// `predictions`, or at the root), the `{tagName, probability}` naming, and a
/// bare `{"prediction": "..."}` answer from single-label decoders.
pub struct DetectionClient {
    endpoint: String,
    auth: ApiAuth,
    format: PayloadFormat,
    client: Client,
}

impl DetectionClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth: ApiAuth::None,
            format: PayloadFormat::Json,
            client: Client::new(),
        }
    }

    pub fn with_auth(mut self, auth: ApiAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_format(mut self, format: PayloadFormat) -> Self {
        self.format = format;
        self
    }

    fn build_request_body(frame: &Frame) -> Value {
        json!({ "image": frame.to_data_url() })
    }
}

#[async_trait]
impl Classifier for DetectionClient {
    async fn classify(&self, frame: &Frame) -> Result<Vec<Detection>, AiError> {
        let req = self.client.post(&self.endpoint);
        let req = match self.format {
            PayloadFormat::Json => req.json(&Self::build_request_body(frame)),
            PayloadFormat::Binary => req
                .header("Content-Type", "application/octet-stream")
                .body(frame.data.clone()),
        };
        let body = send_json(self.auth.apply(req)).await?;
        parse_detections(&body)
    }

    fn name(&self) -> &str {
        "http-detection"
    }
}

/// Decode a detection response body.
pub fn parse_detections(body: &Value) -> Result<Vec<Detection>, AiError> {
    let records = body
        .get("detections")
        .or_else(|| body.get("predictions"))
        .and_then(Value::as_array)
        .or_else(|| body.as_array());

    if let Some(records) = records {
        return records.iter().map(parse_record).collect();
    }

    if let Some(prediction) = body.get("prediction").and_then(Value::as_str) {
        let confidence = first_f64(body, &["confidence", "probability", "score"]).unwrap_or(1.0);
        return Ok(vec![Detection::new(prediction, confidence)]);
    }

    if let Some(err) = body.get("error").and_then(Value::as_str) {
        return Err(AiError::ModelError(err.to_string()));
    }

    Err(AiError::InvalidResponse(
        "expected detections, predictions or prediction".into(),
    ))
}

fn parse_record(record: &Value) -> Result<Detection, AiError> {
    let label = ["label", "tagName", "tag"]
        .iter()
        .find_map(|k| record.get(*k).and_then(Value::as_str))
        .ok_or_else(|| AiError::InvalidResponse(format!("record without label: {}", record)))?;
    let confidence = first_f64(record, &["confidence", "probability", "score"])
        .ok_or_else(|| AiError::InvalidResponse(format!("record without score: {}", record)))?;

    let mut detection = Detection::new(label, confidence);
    if let Some(bb) = record.get("boundingBox").or_else(|| record.get("bounding_box")) {
        let field = |k: &str| bb.get(k).and_then(Value::as_f64);
        match (field("left"), field("top"), field("width"), field("height")) {
            (Some(l), Some(t), Some(w), Some(h)) => {
                detection = detection.with_box(BoundingBox::new(l, t, w, h));
            }
            _ => {
                return Err(AiError::InvalidResponse(format!(
                    "malformed bounding box: {}",
                    bb
                )))
            }
        }
    }
    Ok(detection)
}

fn first_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| v.get(*k).and_then(Value::as_f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prediction_shape() {
        let body = json!({
            "id": "abc",
            "predictions": [
                { "probability": 0.97, "tagName": "helmet",
                  "boundingBox": { "left": 0.1, "top": 0.2, "width": 0.3, "height": 0.4 } },
                { "probability": 0.12, "tagName": "vest",
                  "boundingBox": { "left": 0.5, "top": 0.5, "width": 0.1, "height": 0.1 } }
            ]
        });
        let dets = parse_detections(&body).unwrap();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].label, "helmet");
        assert_eq!(dets[0].confidence, 0.97);
        assert_eq!(
            dets[0].bounding_box,
            Some(BoundingBox::new(0.1, 0.2, 0.3, 0.4))
        );
    }

    #[test]
    fn parses_generic_shape_and_root_array() {
        let body = json!({ "detections": [ { "label": "cat", "confidence": 0.95 } ] });
        let dets = parse_detections(&body).unwrap();
        assert_eq!(dets, vec![Detection::new("cat", 0.95)]);

        let root = json!([ { "label": "dog", "score": 0.5 } ]);
        assert_eq!(parse_detections(&root).unwrap()[0].label, "dog");
    }

    #[test]
    fn bare_prediction_is_one_detection() {
        let dets = parse_detections(&json!({ "prediction": "B" })).unwrap();
        assert_eq!(dets, vec![Detection::new("B", 1.0)]);
    }

    #[test]
    fn empty_list_is_valid() {
        assert!(parse_detections(&json!({ "predictions": [] })).unwrap().is_empty());
    }

    #[test]
    fn malformed_records_are_rejected() {
        assert!(matches!(
            parse_detections(&json!({ "detections": [ { "confidence": 0.3 } ] })),
            Err(AiError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_detections(&json!({ "detections": [ { "label": "x", "confidence": 0.3,
                "boundingBox": { "left": 0.1 } } ] })),
            Err(AiError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_detections(&json!({ "message": "hi" })),
            Err(AiError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_detections(&json!({ "error": "model offline" })),
            Err(AiError::ModelError(_))
        ));
    }

    #[test]
    fn request_body_carries_data_url() {
        let frame = Frame {
            data: vec![0xFF, 0xD8, 0xFF],
            mime: "image/jpeg".into(),
            width: 1,
            height: 1,
            timestamp: String::new(),
        };
        let body = DetectionClient::build_request_body(&frame);
        assert_eq!(body["image"], "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn test_client_name() {
        assert_eq!(DetectionClient::new("http://localhost").name(), "http-detection");
    }
}
