use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables and indexes. Idempotent, safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assets (
            id TEXT PRIMARY KEY,
            matter_id TEXT NOT NULL,
            original_name TEXT NOT NULL,
            file_kind TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            storage_path TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            error TEXT,
            page_count INTEGER,
            doc_type TEXT,
            custodian TEXT,
            confidentiality TEXT,
            profile_json TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS asset_texts (
            id TEXT PRIMARY KEY,
            asset_id TEXT NOT NULL UNIQUE,
            method TEXT NOT NULL,
            content TEXT NOT NULL,
            confidence REAL,
            language TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (asset_id) REFERENCES assets(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS text_anchors (
            id TEXT PRIMARY KEY,
            asset_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            line_start INTEGER NOT NULL,
            line_end INTEGER NOT NULL,
            snippet TEXT NOT NULL,
            confidence REAL,
            FOREIGN KEY (asset_id) REFERENCES assets(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS text_chunks (
            id TEXT PRIMARY KEY,
            asset_id TEXT NOT NULL,
            matter_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            UNIQUE(asset_id, chunk_index),
            FOREIGN KEY (asset_id) REFERENCES assets(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS insight_runs (
            id TEXT PRIMARY KEY,
            matter_id TEXT NOT NULL,
            requested_by TEXT,
            intents TEXT NOT NULL,
            priority_rules_json TEXT,
            output_format TEXT,
            scope_json TEXT,
            status TEXT NOT NULL DEFAULT 'queued',
            error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS insight_outputs (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            section TEXT NOT NULL,
            content_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(run_id, section),
            FOREIGN KEY (run_id) REFERENCES insight_runs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only processing audit trail; rows survive asset reprocessing.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS extraction_runs (
            id TEXT PRIMARY KEY,
            asset_id TEXT NOT NULL,
            method TEXT NOT NULL,
            provider TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            confidence REAL,
            error TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_assets_matter ON assets(matter_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_assets_matter_status ON assets(matter_id, status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_assets_created_at ON assets(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_text_chunks_asset ON text_chunks(asset_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_text_anchors_asset ON text_anchors(asset_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_insight_runs_matter ON insight_runs(matter_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_extraction_runs_asset ON extraction_runs(asset_id)")
        .execute(pool)
        .await?;

    Ok(())
}
