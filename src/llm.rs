//! Language-model provider abstraction for the insight stage.
//!
//! The model is a black box behind [`LanguageModel`]: one prompt in, one
//! completion out. [`ChatModel`] talks to an OpenAI-compatible
//! chat-completions endpoint with the same retry strategy as the OCR
//! provider (429/5xx/network retried with exponential backoff, other 4xx
//! fail immediately). [`ScriptedModel`] returns canned responses for
//! deterministic tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::config::InsightConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model provider is disabled")]
    Disabled,
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Find the first balanced `{…}` object in `s`, skipping any leading prose
/// or markdown fencing. Tolerates braces inside JSON strings.
pub fn first_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name recorded on insight runs.
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Instantiate the provider selected by configuration.
pub fn create_model(config: &InsightConfig) -> Box<dyn LanguageModel> {
    match config.provider.as_str() {
        "openai" => Box::new(ChatModel::new(config.clone())),
        _ => Box::new(DisabledModel),
    }
}

/// Used when `insight.provider = "disabled"`; every call errors so the run
/// fails with a clear message instead of inventing findings.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
}

/// OpenAI-compatible chat-completions provider.
pub struct ChatModel {
    config: InsightConfig,
}

impl ChatModel {
    pub fn new(config: InsightConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LanguageModel for ChatModel {
    fn name(&self) -> &str {
        "openai-chat"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::Request("OPENAI_API_KEY not set".to_string()))?;

        let model = self
            .config
            .model
            .as_deref()
            .ok_or_else(|| LlmError::Request("insight.model not configured".to_string()))?;

        let url = self
            .config
            .url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1/chat/completions");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                        return json
                            .get("choices")
                            .and_then(|c| c.get(0))
                            .and_then(|c| c.get("message"))
                            .and_then(|m| m.get("content"))
                            .and_then(|c| c.as_str())
                            .map(|s| s.to_string())
                            .ok_or_else(|| {
                                LlmError::InvalidResponse(
                                    "missing choices[0].message.content".to_string(),
                                )
                            });
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(LlmError::Request(format!(
                            "model API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(LlmError::Request(format!(
                        "model API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(LlmError::Request(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::Request("model call failed after retries".into())))
    }
}

/// Deterministic model double: pops scripted responses in order, repeating
/// the last one when the script runs dry. An empty script always errors.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    calls: Mutex<usize>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| s.to_string()).collect()),
            last: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        *self.calls.lock().unwrap() += 1;
        let mut responses = self.responses.lock().unwrap();
        if let Some(next) = responses.pop_front() {
            *self.last.lock().unwrap() = Some(next.clone());
            return Ok(next);
        }
        self.last
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| LlmError::Request("scripted model has no responses".to_string()))
    }
}
