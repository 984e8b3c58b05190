//! Collaborator-facing asset operations: submit, fetch, list, delete.
//!
//! Upload validation happens synchronously, before any bytes reach storage:
//! extension/MIME mismatches, oversized files, and full matters are rejected
//! with a clear reason and nothing is enqueued. A successful submit stores
//! the bytes, records the asset as `queued`, and hands it to the processing
//! queue without blocking the caller; the returned handle can be awaited
//! when completion matters (tests, CLI `--wait`) or dropped.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::extract::detect_file_kind;
use crate::models::{Asset, AssetStatus, FileKind};
use crate::queue::ProcessingQueue;
use crate::store;

/// One upload from an external collaborator.
#[derive(Debug, Clone)]
pub struct NewAssetUpload {
    pub matter_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub doc_type: Option<String>,
    pub custodian: Option<String>,
    pub confidentiality: Option<String>,
}

/// Validate, store, record, and schedule an upload.
pub async fn submit_asset(
    pool: &SqlitePool,
    config: &Config,
    queue: &ProcessingQueue,
    upload: NewAssetUpload,
) -> Result<(Asset, JoinHandle<()>)> {
    if upload.matter_id.trim().is_empty() {
        bail!("matter id must not be empty");
    }
    if upload.bytes.is_empty() {
        bail!("uploaded file is empty");
    }
    if upload.bytes.len() as u64 > config.storage.max_file_bytes {
        bail!(
            "file exceeds the {} byte upload limit",
            config.storage.max_file_bytes
        );
    }
    check_extension_mime_pairing(&upload.original_name, &upload.mime_type)?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM assets WHERE matter_id = ?")
        .bind(&upload.matter_id)
        .fetch_one(pool)
        .await?;
    if existing >= config.storage.max_files_per_matter {
        bail!(
            "matter already holds the maximum of {} files",
            config.storage.max_files_per_matter
        );
    }

    let file_kind = detect_file_kind(&upload.original_name, &upload.mime_type, &upload.bytes);

    let root = config.storage.root.clone();
    let matter_id = upload.matter_id.clone();
    let original_name = upload.original_name.clone();
    let bytes = upload.bytes;
    let blob = tokio::task::spawn_blocking(move || {
        store::store_blob(&root, &matter_id, &original_name, bytes.as_slice())
    })
    .await
    .context("storage task panicked")??;

    let now = Utc::now().timestamp();
    let asset = Asset {
        id: Uuid::new_v4().to_string(),
        matter_id: upload.matter_id,
        original_name: upload.original_name,
        file_kind,
        content_hash: blob.content_hash,
        size_bytes: blob.size_bytes,
        storage_path: blob.storage_path.display().to_string(),
        status: AssetStatus::Queued,
        error: None,
        page_count: None,
        doc_type: upload.doc_type,
        custodian: upload.custodian,
        confidentiality: upload.confidentiality,
        profile_json: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO assets (id, matter_id, original_name, file_kind, content_hash, size_bytes,
                            storage_path, status, doc_type, custodian, confidentiality,
                            created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'queued', ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&asset.id)
    .bind(&asset.matter_id)
    .bind(&asset.original_name)
    .bind(asset.file_kind.as_str())
    .bind(&asset.content_hash)
    .bind(asset.size_bytes)
    .bind(&asset.storage_path)
    .bind(&asset.doc_type)
    .bind(&asset.custodian)
    .bind(&asset.confidentiality)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    info!(
        asset_id = %asset.id,
        matter_id = %asset.matter_id,
        kind = asset.file_kind.as_str(),
        deduped = blob.deduped,
        "asset submitted"
    );

    let handle = queue.enqueue(asset.id.clone());
    Ok((asset, handle))
}

/// Reject uploads whose extension and declared MIME type disagree. Unknown
/// extensions or MIME types are allowed through; kind detection falls back
/// to content sniffing, and `other` is a processable kind.
fn check_extension_mime_pairing(original_name: &str, mime_type: &str) -> Result<()> {
    if mime_type.is_empty() {
        return Ok(());
    }
    let by_ext = detect_file_kind(original_name, "", &[]);
    let by_mime = detect_file_kind("", mime_type, &[]);
    if by_ext != FileKind::Other && by_mime != FileKind::Other && by_ext != by_mime {
        bail!(
            "file extension of '{}' does not match declared type '{}'",
            original_name,
            mime_type
        );
    }
    Ok(())
}

pub async fn get_asset(pool: &SqlitePool, asset_id: &str) -> Result<Option<Asset>> {
    let row = sqlx::query("SELECT * FROM assets WHERE id = ?")
        .bind(asset_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| asset_from_row(&r)))
}

/// Page through a matter's assets, newest first. Pages are 1-based.
pub async fn list_assets(
    pool: &SqlitePool,
    matter_id: &str,
    page: i64,
    limit: i64,
) -> Result<Vec<Asset>> {
    let limit = limit.clamp(1, 500);
    let offset = (page.max(1) - 1) * limit;
    let rows = sqlx::query(
        "SELECT * FROM assets WHERE matter_id = ? ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
    )
    .bind(matter_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(asset_from_row).collect())
}

/// Delete an asset, its text/anchor/chunk unit, and its stored bytes. The
/// physical file is kept while another upload of the same content still
/// references it.
pub async fn delete_asset(pool: &SqlitePool, asset_id: &str) -> Result<()> {
    let Some(asset) = get_asset(pool, asset_id).await? else {
        bail!("asset not found: {}", asset_id);
    };

    let mut tx = pool.begin().await?;
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
    sqlx::query("DELETE FROM assets WHERE id = ?")
        .bind(asset_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let still_referenced: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM assets WHERE storage_path = ?")
            .bind(&asset.storage_path)
            .fetch_one(pool)
            .await?;
    if still_referenced == 0 {
        store::delete_blob(&PathBuf::from(&asset.storage_path))?;
    }

    info!(asset_id, "asset deleted");
    Ok(())
}

pub(crate) fn asset_from_row(row: &sqlx::sqlite::SqliteRow) -> Asset {
    Asset {
        id: row.get("id"),
        matter_id: row.get("matter_id"),
        original_name: row.get("original_name"),
        file_kind: FileKind::parse(row.get("file_kind")),
        content_hash: row.get("content_hash"),
        size_bytes: row.get("size_bytes"),
        storage_path: row.get("storage_path"),
        status: AssetStatus::parse(row.get("status")),
        error: row.get("error"),
        page_count: row.get("page_count"),
        doc_type: row.get("doc_type"),
        custodian: row.get("custodian"),
        confidentiality: row.get("confidentiality"),
        profile_json: row.get("profile_json"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
