//! Optical character recognition via a vision-language model.
//!
//! The engine is asked to transcribe a document image verbatim and to append
//! a structured profile of the document. The response follows a two-part
//! grammar: the transcription, then a `[DOCUMENT PROFILE]` marker line
//! followed by one JSON object. When the marker is absent the whole response
//! is treated as plain transcription with no profile.
//!
//! Providers:
//! - [`VisionOcr`]: OpenAI-compatible chat-completions endpoint, with
//!   per-call timeout and exponential-backoff retry (429/5xx/network retry,
//!   other 4xx fail immediately).
//! - [`DisabledOcr`]: no backing provider; reports itself unavailable so
//!   assets still resolve instead of failing.

use async_trait::async_trait;
use base64::Engine as _;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::OcrConfig;
use crate::models::DocumentProfile;

/// Marker line separating the transcription from the profile block.
pub const PROFILE_MARKER: &str = "[DOCUMENT PROFILE]";

/// Text stored when no OCR provider can be reached. Distinct from the empty
/// string, which means the provider ran and found no text.
pub const UNAVAILABLE_MARKER: &str = "[unavailable]";

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR request failed: {0}")]
    Request(String),
    #[error("OCR provider returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Result of one OCR invocation.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub text: String,
    pub confidence: f64,
    pub profile: Option<DocumentProfile>,
    /// False when no provider could be reached; the text then carries
    /// [`UNAVAILABLE_MARKER`].
    pub available: bool,
}

impl OcrOutcome {
    pub fn unavailable() -> Self {
        Self {
            text: UNAVAILABLE_MARKER.to_string(),
            confidence: 0.0,
            profile: None,
            available: false,
        }
    }
}

/// A backend capable of transcribing document images.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Provider name recorded in the processing audit trail.
    fn name(&self) -> &str;

    /// Transcribe `bytes` (an image or scanned PDF) into text plus an
    /// optional document profile.
    async fn recognize(&self, bytes: &[u8], mime: &str) -> Result<OcrOutcome, OcrError>;
}

/// Map an OCR quality label to a confidence score. Config overrides take
/// precedence over the built-in mapping.
pub fn quality_confidence(quality: Option<&str>, overrides: &HashMap<String, f64>) -> f64 {
    let label = quality.unwrap_or("").trim().to_lowercase();
    if let Some(v) = overrides.get(&label) {
        return *v;
    }
    if label.contains("clear") {
        0.9
    } else if label.contains("partial") {
        0.7
    } else {
        0.5
    }
}

/// Split a model response into (transcription, profile). The profile block
/// is one JSON object after [`PROFILE_MARKER`]; anything unparsable there is
/// dropped with a warning rather than discarding the transcription.
pub fn parse_ocr_response(response: &str) -> (String, Option<DocumentProfile>) {
    let Some(pos) = response.find(PROFILE_MARKER) else {
        return (response.trim().to_string(), None);
    };

    let text = response[..pos].trim().to_string();
    let rest = &response[pos + PROFILE_MARKER.len()..];

    let profile = crate::llm::first_json_object(rest).and_then(|raw| {
        match serde_json::from_str::<DocumentProfile>(raw) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("discarding unparsable document profile: {}", e);
                None
            }
        }
    });

    (text, profile)
}

/// Instantiate the engine selected by configuration.
pub fn create_engine(config: &OcrConfig) -> std::sync::Arc<dyn OcrEngine> {
    match config.provider.as_str() {
        "openai" => std::sync::Arc::new(VisionOcr::new(config.clone())),
        _ => std::sync::Arc::new(DisabledOcr),
    }
}

// ============ Disabled provider ============

/// Used when `ocr.provider = "disabled"`. Every call reports the provider
/// unavailable; the dispatcher degrades to a zero-confidence result.
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn recognize(&self, _bytes: &[u8], _mime: &str) -> Result<OcrOutcome, OcrError> {
        Ok(OcrOutcome::unavailable())
    }
}

// ============ Vision-language-model provider ============

const OCR_INSTRUCTIONS: &str = r#"Transcribe all text in this document image verbatim.

Rules:
- Preserve the reading order of the layout; work column by column.
- Flag characters you cannot read with [?] instead of guessing.
- If the image contains no text, return nothing before the profile block.

After the transcription, output the line [DOCUMENT PROFILE] followed by one
JSON object:
{
  "document_type": "...",
  "language": "...",
  "text_quality": "clear | partially legible | poor",
  "has_handwriting": false,
  "has_signatures": false,
  "has_stamps": false,
  "has_redactions": false,
  "dates": ["..."],
  "entities": ["..."],
  "sections": ["..."]
}"#;

/// OCR via an OpenAI-compatible vision endpoint.
///
/// The image is inlined as a base64 data URL. Requires `OPENAI_API_KEY`;
/// when the key is missing the engine degrades to an unavailable outcome
/// instead of erroring, so the owning asset still reaches `ready`.
pub struct VisionOcr {
    config: OcrConfig,
}

impl VisionOcr {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl OcrEngine for VisionOcr {
    fn name(&self) -> &str {
        "openai-vision"
    }

    async fn recognize(&self, bytes: &[u8], mime: &str) -> Result<OcrOutcome, OcrError> {
        let Ok(api_key) = std::env::var("OPENAI_API_KEY") else {
            return Ok(OcrOutcome::unavailable());
        };

        let model = self
            .config
            .model
            .as_deref()
            .ok_or_else(|| OcrError::Request("ocr.model not configured".to_string()))?;

        let url = self
            .config
            .url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1/chat/completions");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| OcrError::Request(e.to_string()))?;

        let data_url = format!(
            "data:{};base64,{}",
            mime,
            base64::engine::general_purpose::STANDARD.encode(bytes)
        );

        let body = serde_json::json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": OCR_INSTRUCTIONS },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }],
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
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
                            .map_err(|e| OcrError::InvalidResponse(e.to_string()))?;
                        return Ok(outcome_from_response(
                            &json,
                            &self.config.quality_confidence,
                        )?);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(OcrError::Request(format!(
                            "OCR API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(OcrError::Request(format!(
                        "OCR API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(OcrError::Request(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| OcrError::Request("OCR failed after retries".to_string())))
    }
}

fn outcome_from_response(
    json: &serde_json::Value,
    overrides: &HashMap<String, f64>,
) -> Result<OcrOutcome, OcrError> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| OcrError::InvalidResponse("missing choices[0].message.content".into()))?;

    let (text, profile) = parse_ocr_response(content);

    let confidence = if text.is_empty() {
        // Provider ran and found nothing; empty text, low confidence.
        0.1
    } else {
        quality_confidence(
            profile.as_ref().and_then(|p| p.text_quality.as_deref()),
            overrides,
        )
    };

    Ok(OcrOutcome {
        text,
        confidence,
        profile,
        available: true,
    })
}
