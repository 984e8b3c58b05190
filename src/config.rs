use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub insight: InsightConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for stored asset bytes, one subdirectory per matter.
    pub root: PathBuf,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_files_per_matter")]
    pub max_files_per_matter: i64,
}

fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_max_files_per_matter() -> i64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Maximum assets extracted at once; excess enqueues wait FIFO.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    2000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// `disabled` or `openai`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Embedded PDF text shorter than this is treated as a scanned
    /// document and routed through OCR.
    #[serde(default = "default_pdf_text_threshold")]
    pub pdf_text_threshold: usize,
    /// OCR quality label -> confidence overrides, e.g. `clear = 0.9`.
    #[serde(default)]
    pub quality_confidence: std::collections::HashMap<String, f64>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_ocr_timeout_secs(),
            max_retries: default_max_retries(),
            pdf_text_threshold: default_pdf_text_threshold(),
            quality_confidence: Default::default(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_ocr_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_pdf_text_threshold() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct InsightConfig {
    /// `disabled` or `openai`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_insight_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_insight_retries")]
    pub max_retries: u32,
    /// When a matter holds more ready documents than this and the run gives
    /// no explicit scope, only the most recent `max_documents` are analyzed.
    #[serde(default = "default_max_documents")]
    pub max_documents: i64,
    #[serde(default = "default_max_chars_per_doc")]
    pub max_chars_per_doc: usize,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_insight_timeout_secs(),
            max_retries: default_insight_retries(),
            max_documents: default_max_documents(),
            max_chars_per_doc: default_max_chars_per_doc(),
        }
    }
}

fn default_insight_timeout_secs() -> u64 {
    120
}
fn default_insight_retries() -> u32 {
    2
}
fn default_max_documents() -> i64 {
    25
}
fn default_max_chars_per_doc() -> usize {
    8000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.queue.max_concurrent == 0 {
        anyhow::bail!("queue.max_concurrent must be >= 1");
    }

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    if config.storage.max_file_bytes == 0 {
        anyhow::bail!("storage.max_file_bytes must be > 0");
    }

    for (section, provider, model) in [
        ("ocr", config.ocr.provider.as_str(), &config.ocr.model),
        (
            "insight",
            config.insight.provider.as_str(),
            &config.insight.model,
        ),
    ] {
        match provider {
            "disabled" => {}
            "openai" => {
                if model.is_none() {
                    anyhow::bail!(
                        "{}.model must be specified when provider is 'openai'",
                        section
                    );
                }
            }
            other => anyhow::bail!(
                "Unknown {} provider: '{}'. Must be disabled or openai.",
                section,
                other
            ),
        }
    }

    for (label, value) in &config.ocr.quality_confidence {
        if !(0.0..=1.0).contains(value) {
            anyhow::bail!("ocr.quality_confidence.{} must be in [0.0, 1.0]", label);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let f = write_config(
            r#"
[db]
path = "/tmp/dossier.sqlite"

[storage]
root = "/tmp/dossier-files"
"#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.queue.max_concurrent, 3);
        assert_eq!(config.chunking.chunk_size, 2000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.ocr.provider, "disabled");
        assert_eq!(config.insight.max_documents, 25);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let f = write_config(
            r#"
[db]
path = "/tmp/dossier.sqlite"

[storage]
root = "/tmp/dossier-files"

[chunking]
chunk_size = 100
overlap = 100
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn openai_provider_requires_model() {
        let f = write_config(
            r#"
[db]
path = "/tmp/dossier.sqlite"

[storage]
root = "/tmp/dossier-files"

[insight]
provider = "openai"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let f = write_config(
            r#"
[db]
path = "/tmp/dossier.sqlite"

[storage]
root = "/tmp/dossier-files"

[ocr]
provider = "tesseract9000"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }
}
