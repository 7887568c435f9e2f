use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model `{model}` is not available on the adapter; pull it or set WISP_MODEL to an installed model")]
    ModelMissing { model: String },
    #[error("model adapter connection failed: {0}")]
    Connection(String),
    #[error("model adapter timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("model adapter returned an unusable response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Boundary to the text-completion backend. The orchestrator only ever sees
/// raw response text or a distinguishable adapter error.
pub trait ModelAdapter {
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}

/// Blocking client for a local Ollama server. Prefers `/api/chat`; when a
/// server predates the chat endpoint it falls back to `/api/generate` with
/// the transcript flattened into one prompt.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Self {
        let mut base = base_url.trim_end_matches('/').to_string();
        if let Some(stripped) = base.strip_suffix("/api") {
            base = stripped.to_string();
        }
        Self {
            base_url: base,
            model: model.to_string(),
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn agent(&self) -> ureq::Agent {
        ureq::AgentBuilder::new().timeout(self.timeout).build()
    }

    fn post(&self, path: &str, body: Value) -> Result<Value, PostFailure> {
        let url = format!("{}{path}", self.base_url);
        match self.agent().post(&url).send_json(body) {
            Ok(response) => response
                .into_json::<Value>()
                .map_err(|e| PostFailure::Fatal(ModelError::InvalidResponse(e.to_string()))),
            Err(ureq::Error::Status(404, response)) => {
                let detail = extract_error_text(response);
                let lowered = detail.to_ascii_lowercase();
                if lowered.contains("model") && lowered.contains("not found") {
                    Err(PostFailure::Fatal(ModelError::ModelMissing {
                        model: self.model.clone(),
                    }))
                } else {
                    Err(PostFailure::EndpointMissing)
                }
            }
            Err(ureq::Error::Status(code, response)) => Err(PostFailure::Fatal(
                ModelError::Connection(format!("http {code}: {}", extract_error_text(response))),
            )),
            Err(ureq::Error::Transport(transport)) => {
                let detail = transport.to_string();
                if detail.to_ascii_lowercase().contains("timed out") {
                    Err(PostFailure::Fatal(ModelError::Timeout {
                        seconds: self.timeout.as_secs(),
                    }))
                } else {
                    Err(PostFailure::Fatal(ModelError::Connection(detail)))
                }
            }
        }
    }
}

enum PostFailure {
    EndpointMissing,
    Fatal(ModelError),
}

impl ModelAdapter for OllamaClient {
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let chat_body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        match self.post("/api/chat", chat_body) {
            Ok(data) => Ok(data
                .pointer("/message/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()),
            Err(PostFailure::Fatal(err)) => Err(err),
            Err(PostFailure::EndpointMissing) => {
                let generate_body = json!({
                    "model": self.model,
                    "prompt": flatten_messages(messages),
                    "stream": false,
                });
                match self.post("/api/generate", generate_body) {
                    Ok(data) => Ok(data
                        .get("response")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()),
                    Err(PostFailure::Fatal(err)) => Err(err),
                    Err(PostFailure::EndpointMissing) => Err(ModelError::Connection(format!(
                        "no ollama api at {}; the base url must not be suffixed with /api",
                        self.base_url
                    ))),
                }
            }
        }
    }
}

fn flatten_messages(messages: &[ChatMessage]) -> String {
    let mut lines: Vec<String> = messages
        .iter()
        .map(|m| format!("{}:\n{}", m.role.to_ascii_uppercase(), m.content))
        .collect();
    lines.push("ASSISTANT:".to_string());
    lines.join("\n\n")
}

fn extract_error_text(response: ureq::Response) -> String {
    match response.into_json::<Value>() {
        Ok(Value::Object(map)) => map
            .get("error")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default(),
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}
