//! Extraction dispatch: route an asset to the right strategy by file kind.
//!
//! | Kind    | Strategy                                             | Confidence |
//! |---------|------------------------------------------------------|------------|
//! | `pdf`   | embedded text; OCR fallback for scanned documents    | 0.95 / OCR |
//! | `image` | OCR (vision-language model)                          | OCR        |
//! | `doc`   | OOXML `word/document.xml` text                       | 0.95       |
//! | `text`  | read as-is (byte-for-byte UTF-8)                     | 1.0        |
//! | `email` | parsed headers + text body                           | 1.0        |
//! | other   | empty sentinel                                       | 0.0        |
//!
//! An unavailable OCR backend degrades the result instead of failing the
//! asset: the text carries the `[unavailable]` marker at zero confidence and
//! the asset still resolves `ready`.

use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::config::OcrConfig;
use crate::models::{DocumentProfile, ExtractionMethod, FileKind};
use crate::ocr::{OcrEngine, OcrError};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {0}: {1}")]
    Io(String, String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error(transparent)]
    Ocr(#[from] OcrError),
}

/// Output of one extraction attempt.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub method: ExtractionMethod,
    pub confidence: Option<f64>,
    pub page_count: Option<i64>,
    pub profile: Option<DocumentProfile>,
    pub language: Option<String>,
}

impl Extraction {
    fn plain(text: String, confidence: f64) -> Self {
        Self {
            text,
            method: ExtractionMethod::ExtractedText,
            confidence: Some(confidence),
            page_count: None,
            profile: None,
            language: None,
        }
    }

    /// Sentinel for unrecognized file kinds: empty text, zero confidence.
    fn empty() -> Self {
        Self::plain(String::new(), 0.0)
    }
}

/// Detect the file kind from extension, declared MIME type, and content
/// magic bytes, in that order.
pub fn detect_file_kind(original_name: &str, mime_type: &str, bytes: &[u8]) -> FileKind {
    match file_extension(original_name).as_deref() {
        Some("pdf") => return FileKind::Pdf,
        Some("png" | "jpg" | "jpeg" | "gif" | "tif" | "tiff" | "bmp" | "webp") => {
            return FileKind::Image
        }
        Some("doc" | "docx" | "odt" | "rtf") => return FileKind::Doc,
        Some("txt" | "md" | "csv" | "log") => return FileKind::Text,
        Some("eml" | "msg") => return FileKind::Email,
        _ => {}
    }

    let mime = mime_type.to_ascii_lowercase();
    if mime == "application/pdf" {
        return FileKind::Pdf;
    }
    if mime.starts_with("image/") {
        return FileKind::Image;
    }
    if mime.contains("msword") || mime.contains("officedocument.wordprocessingml") {
        return FileKind::Doc;
    }
    if mime.starts_with("text/") {
        return FileKind::Text;
    }
    if mime == "message/rfc822" {
        return FileKind::Email;
    }

    // Fall back to content sniffing for extension-less uploads.
    if let Some(detected) = infer::get(bytes) {
        let detected_mime = detected.mime_type();
        if detected_mime == "application/pdf" {
            return FileKind::Pdf;
        }
        if detected_mime.starts_with("image/") {
            return FileKind::Image;
        }
        if detected_mime.contains("wordprocessingml") {
            return FileKind::Doc;
        }
    }

    FileKind::Other
}

fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Extract text from the stored file at `path` according to `kind`.
pub async fn extract(
    path: &Path,
    kind: FileKind,
    ocr: &dyn OcrEngine,
    config: &OcrConfig,
) -> Result<Extraction, ExtractError> {
    match kind {
        FileKind::Pdf => extract_pdf(path, ocr, config).await,
        FileKind::Image => extract_image(path, ocr).await,
        FileKind::Doc => extract_doc(path).await,
        FileKind::Text => extract_text_file(path).await,
        FileKind::Email => extract_email(path).await,
        FileKind::Other => Ok(Extraction::empty()),
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, ExtractError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| ExtractError::Io(path.display().to_string(), e.to_string()))
}

async fn extract_pdf(
    path: &Path,
    ocr: &dyn OcrEngine,
    config: &OcrConfig,
) -> Result<Extraction, ExtractError> {
    let bytes = read_file(path).await?;

    let parse_input = bytes.clone();
    let embedded = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&parse_input)
    })
    .await
    .map_err(|e| ExtractError::Io(path.display().to_string(), e.to_string()))?
    .unwrap_or_default();

    if embedded.trim().len() >= config.pdf_text_threshold {
        // pdftotext-style page separators, when the extractor emits them.
        let page_count = Some(embedded.matches('\u{c}').count() as i64 + 1);
        let mut extraction = Extraction::plain(embedded, 0.95);
        extraction.page_count = page_count;
        return Ok(extraction);
    }

    // Little or no embedded text: treat as a scanned document.
    let outcome = ocr.recognize(&bytes, "application/pdf").await?;
    Ok(Extraction {
        language: outcome.profile.as_ref().and_then(|p| p.language.clone()),
        profile: outcome.profile,
        text: outcome.text,
        method: ExtractionMethod::Ocr,
        confidence: Some(outcome.confidence),
        page_count: None,
    })
}

async fn extract_image(path: &Path, ocr: &dyn OcrEngine) -> Result<Extraction, ExtractError> {
    let bytes = read_file(path).await?;
    let mime = infer::get(&bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "image/png".to_string());

    let outcome = ocr.recognize(&bytes, &mime).await?;
    Ok(Extraction {
        language: outcome.profile.as_ref().and_then(|p| p.language.clone()),
        profile: outcome.profile,
        text: outcome.text,
        method: ExtractionMethod::Ocr,
        confidence: Some(outcome.confidence),
        page_count: None,
    })
}

async fn extract_doc(path: &Path) -> Result<Extraction, ExtractError> {
    let bytes = read_file(path).await?;
    let text = tokio::task::spawn_blocking(move || extract_docx_text(&bytes))
        .await
        .map_err(|e| ExtractError::Io(path.display().to_string(), e.to_string()))??;
    Ok(Extraction::plain(text, 0.95))
}

async fn extract_text_file(path: &Path) -> Result<Extraction, ExtractError> {
    let bytes = read_file(path).await?;
    let text = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };
    Ok(Extraction::plain(text, 1.0))
}

async fn extract_email(path: &Path) -> Result<Extraction, ExtractError> {
    let bytes = read_file(path).await?;
    let text = parse_email_text(&bytes);
    Ok(Extraction::plain(text, 1.0))
}

/// Render an RFC 822 message as readable text: a short header block followed
/// by the text body. Unparsable input falls back to the raw bytes.
fn parse_email_text(bytes: &[u8]) -> String {
    let Some(message) = mail_parser::MessageParser::default().parse(bytes) else {
        return String::from_utf8_lossy(bytes).into_owned();
    };

    let mut out = String::new();
    if let Some(from) = message.from().and_then(|a| a.first()) {
        let name = from.name().unwrap_or_default();
        let addr = from.address().unwrap_or_default();
        if name.is_empty() {
            out.push_str(&format!("From: {}\n", addr));
        } else {
            out.push_str(&format!("From: {} <{}>\n", name, addr));
        }
    }
    if let Some(to) = message.to().and_then(|a| a.first()) {
        out.push_str(&format!("To: {}\n", to.address().unwrap_or_default()));
    }
    if let Some(subject) = message.subject() {
        out.push_str(&format!("Subject: {}\n", subject));
    }
    if let Some(date) = message.date() {
        out.push_str(&format!("Date: {}\n", date));
    }
    if !out.is_empty() {
        out.push('\n');
    }
    if let Some(body) = message.body_text(0) {
        out.push_str(body.trim_end());
    }
    out
}

/// Pull the text runs out of OOXML `word/document.xml`, one line per
/// paragraph.
fn extract_docx_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| ExtractError::Ooxml("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ExtractError::Ooxml(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
    }

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(doc_xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}
