//! Bounded-concurrency processing queue.
//!
//! `enqueue` submits an asset to a fixed-size worker pool and returns the
//! task handle so callers (and tests) can await completion instead of racing
//! a timer. Admission is a semaphore: at most `queue.max_concurrent` assets
//! extract at once, excess work waits FIFO on the permit queue.
//!
//! Per asset the steps are strictly sequential: mark `processing`, extract,
//! persist text + anchors + chunks in one transaction, mark `ready`. Any
//! error marks the asset `failed` with a short message: an asset is never
//! left in `processing`, and one asset's failure never touches its
//! siblings or the pool. Every attempt appends an `extraction_runs` audit
//! row, success or failure.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::chunk::{anchor_text, chunk_text};
use crate::config::{ChunkingConfig, OcrConfig, QueueConfig};
use crate::extract::{extract, Extraction};
use crate::models::FileKind;
use crate::ocr::OcrEngine;

#[derive(Clone)]
pub struct ProcessingQueue {
    pool: SqlitePool,
    ocr: Arc<dyn OcrEngine>,
    chunking: ChunkingConfig,
    ocr_config: OcrConfig,
    permits: Arc<Semaphore>,
}

impl ProcessingQueue {
    pub fn new(
        pool: SqlitePool,
        ocr: Arc<dyn OcrEngine>,
        queue: &QueueConfig,
        chunking: &ChunkingConfig,
        ocr_config: &OcrConfig,
    ) -> Self {
        Self {
            pool,
            ocr,
            chunking: chunking.clone(),
            ocr_config: ocr_config.clone(),
            permits: Arc::new(Semaphore::new(queue.max_concurrent.max(1))),
        }
    }

    /// Schedule an asset for processing. Returns immediately; the handle
    /// resolves when the asset reaches a terminal status.
    pub fn enqueue(&self, asset_id: impl Into<String>) -> JoinHandle<()> {
        let queue = self.clone();
        let asset_id = asset_id.into();
        tokio::spawn(async move {
            let _permit = match queue.permits.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return, // pool shut down
            };
            queue.run_one(&asset_id).await;
        })
    }

    async fn run_one(&self, asset_id: &str) {
        let started = Instant::now();
        match self.process(asset_id).await {
            Ok(extraction) => {
                debug!(
                    asset_id,
                    method = extraction.method.as_str(),
                    confidence = ?extraction.confidence,
                    "asset ready"
                );
                self.record_audit(
                    asset_id,
                    extraction.method.as_str(),
                    started.elapsed().as_millis() as i64,
                    extraction.confidence,
                    None,
                )
                .await;
            }
            Err(e) => {
                let message = short_error(&e);
                warn!(asset_id, error = %message, "asset processing failed");
                if let Err(mark_err) = self.mark_failed(asset_id, &message).await {
                    error!(asset_id, error = %mark_err, "failed to record asset failure");
                }
                self.record_audit(
                    asset_id,
                    "unknown",
                    started.elapsed().as_millis() as i64,
                    None,
                    Some(&message),
                )
                .await;
            }
        }
    }

    async fn process(&self, asset_id: &str) -> Result<Extraction> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT matter_id, file_kind, storage_path FROM assets WHERE id = ?",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;

        let (matter_id, kind, storage_path) =
            row.with_context(|| format!("asset not found: {}", asset_id))?;
        let kind = FileKind::parse(&kind);

        self.set_status(asset_id, "processing").await?;

        let extraction = extract(
            &PathBuf::from(&storage_path),
            kind,
            self.ocr.as_ref(),
            &self.ocr_config,
        )
        .await?;

        self.persist_extraction(asset_id, &matter_id, &extraction)
            .await?;

        Ok(extraction)
    }

    /// Replace the asset's text, anchors, and chunks as a unit and mark it
    /// ready. Delete-then-insert keyed by asset id keeps reprocessing free
    /// of orphaned rows.
    async fn persist_extraction(
        &self,
        asset_id: &str,
        matter_id: &str,
        extraction: &Extraction,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM text_chunks WHERE asset_id = ?")
            .bind(asset_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM text_anchors WHERE asset_id = ?")
            .bind(asset_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM asset_texts WHERE asset_id = ?")
            .bind(asset_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO asset_texts (id, asset_id, method, content, confidence, language, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(asset_id)
        .bind(extraction.method.as_str())
        .bind(&extraction.text)
        .bind(extraction.confidence)
        .bind(&extraction.language)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for anchor in anchor_text(&extraction.text, extraction.page_count, extraction.confidence) {
            sqlx::query(
                "INSERT INTO text_anchors (id, asset_id, page_number, line_start, line_end, snippet, confidence)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(asset_id)
            .bind(anchor.page_number)
            .bind(anchor.line_start)
            .bind(anchor.line_end)
            .bind(&anchor.snippet)
            .bind(anchor.confidence)
            .execute(&mut *tx)
            .await?;
        }

        for chunk in chunk_text(
            &extraction.text,
            self.chunking.chunk_size,
            self.chunking.overlap,
        ) {
            sqlx::query(
                "INSERT INTO text_chunks (id, asset_id, matter_id, chunk_index, content)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(asset_id)
            .bind(matter_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await?;
        }

        let profile_json = extraction
            .profile
            .as_ref()
            .and_then(|p| serde_json::to_string(p).ok());

        sqlx::query(
            "UPDATE assets SET status = 'ready', error = NULL, page_count = ?, profile_json = COALESCE(?, profile_json), updated_at = ? WHERE id = ?",
        )
        .bind(extraction.page_count)
        .bind(profile_json)
        .bind(now)
        .bind(asset_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_status(&self, asset_id: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE assets SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now().timestamp())
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, asset_id: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE assets SET status = 'failed', error = ?, updated_at = ? WHERE id = ?")
            .bind(message)
            .bind(Utc::now().timestamp())
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_audit(
        &self,
        asset_id: &str,
        method: &str,
        duration_ms: i64,
        confidence: Option<f64>,
        error: Option<&str>,
    ) {
        let result = sqlx::query(
            "INSERT INTO extraction_runs (id, asset_id, method, provider, duration_ms, confidence, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(asset_id)
        .bind(method)
        .bind(self.ocr.name())
        .bind(duration_ms)
        .bind(confidence)
        .bind(error)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!(asset_id, error = %e, "failed to append extraction audit record");
        }
    }
}

/// Append-only processing history for an asset, newest attempt first.
pub async fn extraction_history(
    pool: &SqlitePool,
    asset_id: &str,
) -> Result<Vec<crate::models::ExtractionRun>> {
    let rows: Vec<(String, String, i64, Option<f64>, Option<String>, i64)> = sqlx::query_as(
        "SELECT method, provider, duration_ms, confidence, error, created_at
         FROM extraction_runs WHERE asset_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(asset_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(method, provider, duration_ms, confidence, error, created_at)| {
                crate::models::ExtractionRun {
                    asset_id: asset_id.to_string(),
                    method,
                    provider,
                    duration_ms,
                    confidence,
                    error,
                    created_at,
                }
            },
        )
        .collect())
}

/// First line of an error chain; external callers see a short message,
/// never a backtrace.
fn short_error(e: &anyhow::Error) -> String {
    let message = e.to_string();
    message.lines().next().unwrap_or("processing failed").to_string()
}
