use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{send_json, AiError, ApiAuth, Classifier, Detection};
use crate::capture::Frame;

const STRICT_PREFIX: &str = "Respond with only a single word: Yes or No. ";
const DEFAULT_QUESTION: &str = "Is there something in this image?";

/// Normalized answer of a yes/no visual question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Yes,
    No,
    Unclear,
}

impl Verdict {
    /// "yes" anywhere wins, then "no", otherwise unclear.
    pub fn from_answer(answer: &str) -> Self {
        let cleaned = answer.trim().to_lowercase();
        if cleaned.contains("yes") {
            Verdict::Yes
        } else if cleaned.contains("no") {
            Verdict::No
        } else {
            Verdict::Unclear
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Yes => "Yes",
            Verdict::No => "No",
            Verdict::Unclear => "Unclear",
        }
    }

    fn into_detection(self) -> Detection {
        let confidence = if self == Verdict::Unclear { 0.0 } else { 1.0 };
        Detection::new(self.as_str(), confidence)
    }
}

/// Asks a chat-completion vision model a yes/no question about each frame,
/// e.g. "Is there any fire?". Produces a single `Yes`/`No`/`Unclear` detection.
pub struct PromptClassifier {
    endpoint: String,
    model: String,
    question: String,
    auth: ApiAuth,
    client: Client,
}

impl PromptClassifier {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, auth: ApiAuth) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            question: String::new(),
            auth,
            client: Client::new(),
        }
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = question.into();
        self
    }

    fn strict_prompt(&self) -> String {
        let question = if self.question.trim().is_empty() {
            DEFAULT_QUESTION
        } else {
            self.question.as_str()
        };
        format!("{}{}", STRICT_PREFIX, question)
    }

    fn build_request_body(&self, frame: &Frame) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": self.strict_prompt() },
                        { "type": "image_url", "image_url": { "url": frame.to_data_url() } }
                    ]
                }
            ]
        })
    }
}

#[async_trait]
impl Classifier for PromptClassifier {
    async fn classify(&self, frame: &Frame) -> Result<Vec<Detection>, AiError> {
        let req = self
            .client
            .post(&self.endpoint)
            .json(&self.build_request_body(frame));
        let body = send_json(self.auth.apply(req)).await?;
        let verdict = Verdict::from_answer(&extract_answer(&body)?);
        log::debug!("Prompt classifier verdict: {}", verdict.as_str());
        Ok(vec![verdict.into_detection()])
    }

    fn name(&self) -> &str {
        "chat-prompt"
    }
}

fn extract_answer(body: &Value) -> Result<String, AiError> {
    if let Some(msg) = body.pointer("/error/message").and_then(Value::as_str) {
        return Err(AiError::ModelError(msg.to_string()));
    }
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AiError::InvalidResponse("missing choices[0].message.content".into()))
}
