//! Core data models used throughout Dossier.
//!
//! These types represent the assets, extracted text, provenance anchors,
//! chunks, and insight runs that flow through the ingestion and analysis
//! pipeline.

use serde::{Deserialize, Serialize};

/// Detected kind of an uploaded file, driving extraction dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image,
    Doc,
    Text,
    Email,
    Other,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Image => "image",
            FileKind::Doc => "doc",
            FileKind::Text => "text",
            FileKind::Email => "email",
            FileKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> FileKind {
        match s {
            "pdf" => FileKind::Pdf,
            "image" => FileKind::Image,
            "doc" => FileKind::Doc,
            "text" => FileKind::Text,
            "email" => FileKind::Email,
            _ => FileKind::Other,
        }
    }
}

/// Asset lifecycle: `queued -> processing -> ready | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    Queued,
    Processing,
    Ready,
    Failed,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Queued => "queued",
            AssetStatus::Processing => "processing",
            AssetStatus::Ready => "ready",
            AssetStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> AssetStatus {
        match s {
            "processing" => AssetStatus::Processing,
            "ready" => AssetStatus::Ready,
            "failed" => AssetStatus::Failed,
            _ => AssetStatus::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AssetStatus::Ready | AssetStatus::Failed)
    }
}

/// How an asset's text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    ExtractedText,
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::ExtractedText => "extracted_text",
            ExtractionMethod::Ocr => "ocr",
        }
    }

    pub fn parse(s: &str) -> ExtractionMethod {
        match s {
            "ocr" => ExtractionMethod::Ocr,
            _ => ExtractionMethod::ExtractedText,
        }
    }
}

/// One uploaded file belonging to a matter.
#[derive(Debug, Clone)]
pub struct Asset {
    pub id: String,
    pub matter_id: String,
    pub original_name: String,
    pub file_kind: FileKind,
    pub content_hash: String,
    pub size_bytes: i64,
    pub storage_path: String,
    pub status: AssetStatus,
    pub error: Option<String>,
    pub page_count: Option<i64>,
    pub doc_type: Option<String>,
    pub custodian: Option<String>,
    pub confidentiality: Option<String>,
    pub profile_json: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Extracted text for a successfully processed asset (1:1).
#[derive(Debug, Clone)]
pub struct AssetText {
    pub id: String,
    pub asset_id: String,
    pub method: ExtractionMethod,
    pub content: String,
    pub confidence: Option<f64>,
    pub language: Option<String>,
    pub created_at: i64,
}

/// A page/line-addressed span of an asset's text, used for citation display.
#[derive(Debug, Clone, PartialEq)]
pub struct TextAnchor {
    pub page_number: i64,
    pub line_start: i64,
    pub line_end: i64,
    pub snippet: String,
    pub confidence: Option<f64>,
}

/// An overlapping slice of an asset's text sized for prompting.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub chunk_index: i64,
    pub content: String,
}

/// Structured metadata produced alongside an OCR transcription.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentProfile {
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub text_quality: Option<String>,
    #[serde(default)]
    pub has_handwriting: bool,
    #[serde(default)]
    pub has_signatures: bool,
    #[serde(default)]
    pub has_stamps: bool,
    #[serde(default)]
    pub has_redactions: bool,
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub sections: Vec<String>,
}

/// Insight run lifecycle: `queued -> running -> complete | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    Running,
    Complete,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> RunStatus {
        match s {
            "running" => RunStatus::Running,
            "complete" => RunStatus::Complete,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Queued,
        }
    }
}

/// Optional filters applied when gathering documents for an insight run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorityRules {
    /// Only documents uploaded on or after this date (YYYY-MM-DD).
    #[serde(default)]
    pub date_from: Option<String>,
    /// Only documents uploaded on or before this date (YYYY-MM-DD).
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub doc_types: Vec<String>,
    #[serde(default)]
    pub custodians: Vec<String>,
    /// Prefer newer documents when the scope truncates (default behavior).
    #[serde(default)]
    pub prefer_recent: bool,
}

/// Scope selector for an insight run: take the most recent `limit`
/// documents starting at `offset` (both optional).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunScope {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// One request to analyze a matter's ready assets for a set of intents.
#[derive(Debug, Clone)]
pub struct InsightRun {
    pub id: String,
    pub matter_id: String,
    pub requested_by: Option<String>,
    /// Comma-joined list of intent names.
    pub intents: String,
    pub priority_rules: Option<PriorityRules>,
    pub output_format: Option<String>,
    pub scope: Option<RunScope>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl InsightRun {
    pub fn intent_list(&self) -> Vec<String> {
        self.intents
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// One validated section of an insight run's output.
#[derive(Debug, Clone)]
pub struct InsightOutput {
    pub run_id: String,
    pub section: String,
    pub content: serde_json::Value,
}

/// Append-only audit record for one processing attempt.
#[derive(Debug, Clone)]
pub struct ExtractionRun {
    pub asset_id: String,
    pub method: String,
    pub provider: String,
    pub duration_ms: i64,
    pub confidence: Option<f64>,
    pub error: Option<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_kind_round_trips() {
        for kind in [
            FileKind::Pdf,
            FileKind::Image,
            FileKind::Doc,
            FileKind::Text,
            FileKind::Email,
            FileKind::Other,
        ] {
            assert_eq!(FileKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn unknown_status_defaults_to_queued() {
        assert_eq!(AssetStatus::parse("bogus"), AssetStatus::Queued);
        assert!(!AssetStatus::Processing.is_terminal());
        assert!(AssetStatus::Ready.is_terminal());
        assert!(AssetStatus::Failed.is_terminal());
    }

    #[test]
    fn intent_list_splits_and_trims() {
        let run = InsightRun {
            id: "r1".into(),
            matter_id: "m1".into(),
            requested_by: None,
            intents: "themes, risks ,timeline".into(),
            priority_rules: None,
            output_format: None,
            scope: None,
            status: RunStatus::Queued,
            error: None,
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(run.intent_list(), vec!["themes", "risks", "timeline"]);
    }
}
