//! Materialize a run's `action_items` section into downstream work items.
//!
//! The task board itself is an external collaborator reached through the
//! [`TaskBoard`] trait: one task per action item, confidence mapped to a
//! priority tier, citations flattened into the task body as free text.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::insight::get_insight_outputs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }

    /// >= 0.8 high, >= 0.5 medium, else low.
    pub fn from_confidence(confidence: f64) -> TaskPriority {
        if confidence >= 0.8 {
            TaskPriority::High
        } else if confidence >= 0.5 {
            TaskPriority::Medium
        } else {
            TaskPriority::Low
        }
    }
}

/// A work item handed to the external board.
#[derive(Debug, Clone)]
pub struct BoardTask {
    pub matter_id: String,
    pub title: String,
    pub details: String,
    pub priority: TaskPriority,
}

/// External task-board collaborator (out of scope here; the kanban side
/// implements this).
#[async_trait]
pub trait TaskBoard: Send + Sync {
    /// Create one task and return its board-side id.
    async fn create_task(&self, task: BoardTask) -> Result<String>;
}

/// Create one board task per record in the run's `action_items` section.
/// Returns the created board ids.
pub async fn materialize_action_items(
    pool: &SqlitePool,
    board: &dyn TaskBoard,
    run_id: &str,
) -> Result<Vec<String>> {
    let run = crate::insight::get_insight_run(pool, run_id)
        .await?
        .with_context(|| format!("insight run not found: {}", run_id))?;

    let outputs = get_insight_outputs(pool, run_id).await?;
    let Some(items) = outputs.get("action_items").and_then(|v| v.as_array()) else {
        bail!("run {} has no action_items output", run_id);
    };

    let mut created = Vec::new();
    for item in items {
        let Some(task_text) = item.get("task").and_then(|v| v.as_str()) else {
            continue;
        };
        let confidence = item
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5);

        let mut details = String::new();
        if let Some(rationale) = item.get("rationale").and_then(|v| v.as_str()) {
            details.push_str(rationale);
            details.push('\n');
        }
        for citation in item
            .get("citations")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            details.push_str(&format_citation(citation));
            details.push('\n');
        }

        let id = board
            .create_task(BoardTask {
                matter_id: run.matter_id.clone(),
                title: task_text.to_string(),
                details: details.trim_end().to_string(),
                priority: TaskPriority::from_confidence(confidence),
            })
            .await?;
        created.push(id);
    }

    Ok(created)
}

fn format_citation(citation: &Value) -> String {
    let get = |key: &str| citation.get(key).and_then(|v| v.as_str()).unwrap_or("");
    format!(
        "Source: {} ({}) — \"{}\"",
        get("filename"),
        get("asset_id"),
        get("snippet")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use chrono::Utc;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use std::sync::Mutex;

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

    struct RecordingBoard {
        tasks: Mutex<Vec<BoardTask>>,
    }

    #[async_trait]
    impl TaskBoard for RecordingBoard {
        async fn create_task(&self, task: BoardTask) -> Result<String> {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.push(task);
            Ok(format!("board-{}", tasks.len()))
        }
    }

    async fn seed_run_with_action_items(pool: &SqlitePool, run_id: &str, items: &Value) {
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO insight_runs (id, matter_id, intents, status, created_at, updated_at)
             VALUES (?, 'm1', 'action_items', 'complete', ?, ?)",
        )
        .bind(run_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO insight_outputs (id, run_id, section, content_json, created_at)
             VALUES ('o1', ?, 'action_items', ?, ?)",
        )
        .bind(run_id)
        .bind(items.to_string())
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    #[test]
    fn confidence_maps_to_priority_tiers() {
        assert_eq!(TaskPriority::from_confidence(0.95), TaskPriority::High);
        assert_eq!(TaskPriority::from_confidence(0.8), TaskPriority::High);
        assert_eq!(TaskPriority::from_confidence(0.6), TaskPriority::Medium);
        assert_eq!(TaskPriority::from_confidence(0.5), TaskPriority::Medium);
        assert_eq!(TaskPriority::from_confidence(0.2), TaskPriority::Low);
    }

    #[tokio::test]
    async fn creates_one_task_per_action_item_with_citations_inlined() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        seed_run_with_action_items(
            &pool,
            "r1",
            &serde_json::json!([
                {"task": "Request the missing exhibit", "confidence": 0.9,
                 "citations": [{"asset_id": "a1", "filename": "letter.pdf", "snippet": "exhibit B was omitted"}]},
                {"task": "Depose the custodian", "confidence": 0.3, "citations": []}
            ]),
        )
        .await;

        let board = RecordingBoard {
            tasks: Mutex::new(Vec::new()),
        };
        let created = materialize_action_items(&pool, &board, "r1").await.unwrap();
        assert_eq!(created, vec!["board-1", "board-2"]);

        let tasks = board.tasks.lock().unwrap();
        assert_eq!(tasks[0].title, "Request the missing exhibit");
        assert_eq!(tasks[0].priority, TaskPriority::High);
        assert!(tasks[0].details.contains("letter.pdf"));
        assert!(tasks[0].details.contains("exhibit B was omitted"));
        assert_eq!(tasks[1].priority, TaskPriority::Low);
    }

    #[tokio::test]
    async fn run_without_action_items_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO insight_runs (id, matter_id, intents, status, created_at, updated_at)
             VALUES ('r2', 'm1', 'themes', 'complete', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        let board = RecordingBoard {
            tasks: Mutex::new(Vec::new()),
        };
        let err = materialize_action_items(&pool, &board, "r2").await.unwrap_err();
        assert!(err.to_string().contains("no action_items output"));
    }
}
