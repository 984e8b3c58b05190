//! Matter-wide scan summary.
//!
//! A read-side aggregation over asset and text records: how much was
//! ingested, how trustworthy the extraction was, and which files need a
//! human look. Used by `dossier summary` and by reporting collaborators.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

/// Extracted text shorter than this flags the file as near-empty.
const NEAR_EMPTY_CHARS: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub total_files: i64,
    pub total_pages: i64,
    /// Earliest and latest upload time (ISO-8601), when any assets exist.
    pub date_range: Option<(String, String)>,
    pub file_type_counts: BTreeMap<String, i64>,
    pub status_counts: BTreeMap<String, i64>,
    pub confidence: ConfidenceHistogram,
    pub problem_files: Vec<ProblemFile>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfidenceHistogram {
    /// >= 0.8
    pub high: i64,
    /// >= 0.6
    pub medium: i64,
    /// < 0.6
    pub low: i64,
    /// no confidence recorded
    pub unknown: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProblemFile {
    pub asset_id: String,
    pub filename: String,
    pub reason: String,
}

pub async fn scan_summary(pool: &SqlitePool, matter_id: &str) -> Result<ScanSummary> {
    let rows = sqlx::query(
        r#"
        SELECT a.id, a.original_name, a.file_kind, a.status, a.error, a.page_count,
               a.created_at, t.confidence, LENGTH(t.content) AS text_len
        FROM assets a
        LEFT JOIN asset_texts t ON t.asset_id = a.id
        WHERE a.matter_id = ?
        ORDER BY a.created_at ASC, a.id
        "#,
    )
    .bind(matter_id)
    .fetch_all(pool)
    .await?;

    let mut summary = ScanSummary {
        total_files: rows.len() as i64,
        total_pages: 0,
        date_range: None,
        file_type_counts: BTreeMap::new(),
        status_counts: BTreeMap::new(),
        confidence: ConfidenceHistogram::default(),
        problem_files: Vec::new(),
    };

    let mut min_ts: Option<i64> = None;
    let mut max_ts: Option<i64> = None;

    for row in &rows {
        let asset_id: String = row.get("id");
        let filename: String = row.get("original_name");
        let kind: String = row.get("file_kind");
        let status: String = row.get("status");
        let error: Option<String> = row.get("error");
        let page_count: Option<i64> = row.get("page_count");
        let created_at: i64 = row.get("created_at");
        let confidence: Option<f64> = row.get("confidence");
        let text_len: Option<i64> = row.get("text_len");

        summary.total_pages += page_count.unwrap_or(0);
        *summary.file_type_counts.entry(kind).or_insert(0) += 1;
        *summary.status_counts.entry(status.clone()).or_insert(0) += 1;

        min_ts = Some(min_ts.map_or(created_at, |m| m.min(created_at)));
        max_ts = Some(max_ts.map_or(created_at, |m| m.max(created_at)));

        match confidence {
            Some(c) if c >= 0.8 => summary.confidence.high += 1,
            Some(c) if c >= 0.6 => summary.confidence.medium += 1,
            Some(_) => summary.confidence.low += 1,
            None => summary.confidence.unknown += 1,
        }

        if status == "failed" {
            summary.problem_files.push(ProblemFile {
                asset_id,
                filename,
                reason: format!(
                    "processing failed: {}",
                    error.as_deref().unwrap_or("unknown error")
                ),
            });
        } else if let Some(c) = confidence.filter(|c| *c < 0.6) {
            summary.problem_files.push(ProblemFile {
                asset_id,
                filename,
                reason: format!("low extraction confidence ({:.2})", c),
            });
        } else if status == "ready" && text_len.unwrap_or(0) < NEAR_EMPTY_CHARS {
            summary.problem_files.push(ProblemFile {
                asset_id,
                filename,
                reason: "extracted text is near-empty".to_string(),
            });
        }
    }

    summary.date_range = match (min_ts, max_ts) {
        (Some(lo), Some(hi)) => Some((format_ts_iso(lo), format_ts_iso(hi))),
        _ => None,
    };

    Ok(summary)
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn test_pool(dir: &tempfile::TempDir) -> SqlitePool {
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite:{}/test.sqlite",
            dir.path().display()
        ))
        .unwrap()
        .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed_asset(
        pool: &SqlitePool,
        id: &str,
        kind: &str,
        status: &str,
        error: Option<&str>,
        page_count: Option<i64>,
        created_at: i64,
    ) {
        sqlx::query(
            "INSERT INTO assets (id, matter_id, original_name, file_kind, content_hash, size_bytes, storage_path, status, error, page_count, created_at, updated_at)
             VALUES (?, 'm1', ?, ?, 'h', 1, '/tmp/x', ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(format!("{}.file", id))
        .bind(kind)
        .bind(status)
        .bind(error)
        .bind(page_count)
        .bind(created_at)
        .bind(created_at)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_text(pool: &SqlitePool, asset_id: &str, content: &str, confidence: Option<f64>) {
        sqlx::query(
            "INSERT INTO asset_texts (id, asset_id, method, content, confidence, created_at)
             VALUES (?, ?, 'extracted_text', ?, ?, 0)",
        )
        .bind(format!("t-{}", asset_id))
        .bind(asset_id)
        .bind(content)
        .bind(confidence)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn empty_matter_summarizes_to_zeroes() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        let summary = scan_summary(&pool, "m1").await.unwrap();
        assert_eq!(summary.total_files, 0);
        assert!(summary.date_range.is_none());
        assert!(summary.problem_files.is_empty());
    }

    #[tokio::test]
    async fn counts_types_statuses_pages_and_dates() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        seed_asset(&pool, "a1", "pdf", "ready", None, Some(3), 1_000).await;
        seed_text(&pool, "a1", "a long enough body of text", Some(0.95)).await;
        seed_asset(&pool, "a2", "pdf", "ready", None, Some(2), 2_000).await;
        seed_text(&pool, "a2", "another long enough body", Some(0.7)).await;
        seed_asset(&pool, "a3", "text", "queued", None, None, 3_000).await;

        let summary = scan_summary(&pool, "m1").await.unwrap();
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.total_pages, 5);
        assert_eq!(summary.file_type_counts["pdf"], 2);
        assert_eq!(summary.file_type_counts["text"], 1);
        assert_eq!(summary.status_counts["ready"], 2);
        assert_eq!(summary.status_counts["queued"], 1);
        assert_eq!(summary.confidence.high, 1);
        assert_eq!(summary.confidence.medium, 1);
        assert_eq!(summary.confidence.unknown, 1);

        let (lo, hi) = summary.date_range.unwrap();
        assert!(lo < hi);
    }

    #[tokio::test]
    async fn flags_failed_low_confidence_and_near_empty_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        seed_asset(&pool, "bad", "pdf", "failed", Some("timed out"), None, 1).await;
        seed_asset(&pool, "blurry", "image", "ready", None, None, 2).await;
        seed_text(&pool, "blurry", "some blurry scanned content", Some(0.4)).await;
        seed_asset(&pool, "empty", "image", "ready", None, None, 3).await;
        seed_text(&pool, "empty", "", Some(0.9)).await;
        seed_asset(&pool, "fine", "text", "ready", None, None, 4).await;
        seed_text(&pool, "fine", "a perfectly ordinary document", Some(1.0)).await;

        let summary = scan_summary(&pool, "m1").await.unwrap();
        let reasons: BTreeMap<String, String> = summary
            .problem_files
            .iter()
            .map(|p| (p.asset_id.clone(), p.reason.clone()))
            .collect();

        assert_eq!(summary.problem_files.len(), 3);
        assert!(reasons["bad"].contains("timed out"));
        assert!(reasons["blurry"].contains("low extraction confidence"));
        assert!(reasons["empty"].contains("near-empty"));
        assert!(!reasons.contains_key("fine"));
    }

    #[tokio::test]
    async fn other_matters_are_not_counted() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        seed_asset(&pool, "a1", "text", "ready", None, None, 1).await;
        sqlx::query(
            "INSERT INTO assets (id, matter_id, original_name, file_kind, content_hash, size_bytes, storage_path, status, created_at, updated_at)
             VALUES ('zz', 'other-matter', 'z.txt', 'text', 'h', 1, '/tmp/z', 'ready', 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let summary = scan_summary(&pool, "m1").await.unwrap();
        assert_eq!(summary.total_files, 1);
    }
}
