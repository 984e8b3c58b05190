//! Insight orchestration: turn a matter's ready documents into
//! citation-backed structured findings.
//!
//! A run names one or more intents from a fixed allow-list. The orchestrator
//! gathers ready document text newest-first, composes a single prompt (one
//! instruction block per intent, one context block per document), invokes
//! the language model, extracts the first balanced JSON object from the
//! response, and validates each requested section independently. Sections
//! that validate persist as their own rows; sections the model omitted are
//! silently absent; partial success is not a run failure.
//!
//! Run lifecycle is forward-only: `queued -> running -> complete | failed`.
//! A failed run is re-submitted as a new run, never retried in place.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::InsightConfig;
use crate::llm::{first_json_object, LanguageModel};
use crate::models::{InsightOutput, InsightRun, PriorityRules, RunScope, RunStatus};

/// Analysis intents a run may request. Unknown intents are rejected before
/// any model call is made.
pub const KNOWN_INTENTS: &[&str] = &[
    "themes",
    "timeline",
    "entities",
    "contradictions",
    "action_items",
    "risks",
    "tone_analysis",
    "consistency_check",
];

const SYSTEM_PREAMBLE: &str = "You are a litigation analyst reviewing case-file documents for a \
legal matter. Work only from the documents provided below; never invent facts. Every record you \
produce must cite the documents that support it.";

fn intent_instructions(intent: &str) -> &'static str {
    match intent {
        "themes" => {
            "themes: identify the recurring factual and legal themes across the documents. \
             Each record: {\"theme\", \"summary\", \"confidence\", \"citations\"}."
        }
        "timeline" => {
            "timeline: reconstruct the chronology of events. Each record: {\"date\" (ISO or as \
             written), \"event\", \"confidence\", \"citations\"}, ordered oldest first."
        }
        "entities" => {
            "entities: list the people and organizations involved and their roles. Each record: \
             {\"name\", \"entity_type\", \"role\", \"confidence\", \"citations\"}."
        }
        "contradictions" => {
            "contradictions: find statements that conflict between or within documents. Each \
             record: {\"description\", \"confidence\", \"citations\"} citing both sides."
        }
        "action_items" => {
            "action_items: list concrete follow-up tasks the documents call for. Each record: \
             {\"task\", \"rationale\", \"confidence\", \"citations\"}."
        }
        "risks" => {
            "risks: assess the legal and factual risks visible in the documents. Each record: \
             {\"risk\", \"severity\" (high|medium|low), \"confidence\", \"citations\"}."
        }
        "tone_analysis" => {
            "tone_analysis: characterize the tone of the communications (hostile, cooperative, \
             evasive, ...). Each record: {\"tone\", \"observation\", \"confidence\", \"citations\"}."
        }
        "consistency_check" => {
            "consistency_check: verify whether accounts remain consistent across documents. Each \
             record: {\"finding\", \"consistent\" (true|false), \"confidence\", \"citations\"}."
        }
        _ => "",
    }
}

/// The one field a record must carry to survive validation for its section.
fn section_primary_field(section: &str) -> &'static str {
    match section {
        "themes" => "theme",
        "timeline" => "event",
        "entities" => "name",
        "contradictions" => "description",
        "action_items" => "task",
        "risks" => "risk",
        "tone_analysis" => "tone",
        "consistency_check" => "finding",
        _ => "summary",
    }
}

/// Validate intents and record a new queued run. No model work happens here.
pub async fn start_insight_run(
    pool: &SqlitePool,
    matter_id: &str,
    intents: &[String],
    priority_rules: Option<PriorityRules>,
    output_format: Option<String>,
    scope: Option<RunScope>,
    requested_by: Option<String>,
) -> Result<InsightRun> {
    if matter_id.trim().is_empty() {
        bail!("matter id must not be empty");
    }
    if intents.is_empty() {
        bail!("at least one intent is required");
    }
    for intent in intents {
        if !KNOWN_INTENTS.contains(&intent.as_str()) {
            bail!(
                "unknown intent '{}'; known intents: {}",
                intent,
                KNOWN_INTENTS.join(", ")
            );
        }
    }

    let now = Utc::now().timestamp();
    let run = InsightRun {
        id: Uuid::new_v4().to_string(),
        matter_id: matter_id.to_string(),
        requested_by,
        intents: intents.join(","),
        priority_rules,
        output_format,
        scope,
        status: RunStatus::Queued,
        error: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO insight_runs (id, matter_id, requested_by, intents, priority_rules_json,
                                  output_format, scope_json, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'queued', ?, ?)
        "#,
    )
    .bind(&run.id)
    .bind(&run.matter_id)
    .bind(&run.requested_by)
    .bind(&run.intents)
    .bind(
        run.priority_rules
            .as_ref()
            .and_then(|r| serde_json::to_string(r).ok()),
    )
    .bind(&run.output_format)
    .bind(run.scope.as_ref().and_then(|s| serde_json::to_string(s).ok()))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(run)
}

/// Drive a queued run to a terminal status.
pub async fn run_insight(
    pool: &SqlitePool,
    config: &InsightConfig,
    model: &dyn LanguageModel,
    run_id: &str,
) -> Result<InsightRun> {
    let run = get_insight_run(pool, run_id)
        .await?
        .with_context(|| format!("insight run not found: {}", run_id))?;

    if run.status != RunStatus::Queued {
        bail!(
            "insight run {} is already {}; submit a new run instead",
            run_id,
            run.status.as_str()
        );
    }

    set_run_status(pool, run_id, RunStatus::Running, None).await?;

    match execute_run(pool, config, model, &run).await {
        Ok(sections) => {
            info!(run_id, sections, "insight run complete");
            set_run_status(pool, run_id, RunStatus::Complete, None).await?;
        }
        Err(e) => {
            let message = e.to_string().lines().next().unwrap_or("run failed").to_string();
            warn!(run_id, error = %message, "insight run failed");
            set_run_status(pool, run_id, RunStatus::Failed, Some(&message)).await?;
        }
    }

    get_insight_run(pool, run_id)
        .await?
        .with_context(|| format!("insight run not found: {}", run_id))
}

/// A ready document gathered for analysis.
struct ContextDocument {
    asset_id: String,
    filename: String,
    doc_type: Option<String>,
    custodian: Option<String>,
    created_at: i64,
    content: String,
}

async fn execute_run(
    pool: &SqlitePool,
    config: &InsightConfig,
    model: &dyn LanguageModel,
    run: &InsightRun,
) -> Result<usize> {
    let documents = gather_documents(pool, config, run).await?;
    if documents.is_empty() {
        bail!("no processed documents for this matter");
    }

    let intents = run.intent_list();
    let prompt = compose_prompt(&intents, &documents, run.output_format.as_deref(), config);

    let response = tokio::time::timeout(
        Duration::from_secs(config.timeout_secs),
        model.complete(&prompt),
    )
    .await
    .map_err(|_| anyhow::anyhow!("model call timed out after {}s", config.timeout_secs))??;

    let raw = first_json_object(&response)
        .context("model response contained no JSON object")?;
    let payload: Value =
        serde_json::from_str(raw).context("model response was not valid JSON")?;
    let object = payload
        .as_object()
        .context("model response was not a JSON object")?;

    let mut persisted = 0usize;
    let now = Utc::now().timestamp();
    for intent in &intents {
        let Some(section) = object.get(intent.as_str()) else {
            continue; // model omitted this section; not an error
        };
        let Some(records) = section.as_array() else {
            warn!(run_id = %run.id, section = %intent, "section is not an array; skipped");
            continue;
        };

        let coerced = coerce_section_records(intent, records);
        sqlx::query(
            "INSERT INTO insight_outputs (id, run_id, section, content_json, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(run_id, section) DO UPDATE SET content_json = excluded.content_json",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&run.id)
        .bind(intent)
        .bind(serde_json::to_string(&coerced)?)
        .bind(now)
        .execute(pool)
        .await?;
        persisted += 1;
    }

    Ok(persisted)
}

async fn gather_documents(
    pool: &SqlitePool,
    config: &InsightConfig,
    run: &InsightRun,
) -> Result<Vec<ContextDocument>> {
    let rows = sqlx::query(
        r#"
        SELECT a.id, a.original_name, a.doc_type, a.custodian, a.created_at, t.content
        FROM assets a
        JOIN asset_texts t ON t.asset_id = a.id
        WHERE a.matter_id = ? AND a.status = 'ready'
        ORDER BY a.created_at DESC, a.id
        "#,
    )
    .bind(&run.matter_id)
    .fetch_all(pool)
    .await?;

    let mut documents: Vec<ContextDocument> = rows
        .iter()
        .map(|row| ContextDocument {
            asset_id: row.get("id"),
            filename: row.get("original_name"),
            doc_type: row.get("doc_type"),
            custodian: row.get("custodian"),
            created_at: row.get("created_at"),
            content: row.get("content"),
        })
        .collect();

    if let Some(rules) = &run.priority_rules {
        apply_priority_rules(&mut documents, rules)?;
    }

    // Scope: explicit offset/limit paging wins; otherwise large matters are
    // truncated to the most recent max_documents.
    match &run.scope {
        Some(scope) => {
            let offset = scope.offset.unwrap_or(0).max(0) as usize;
            let limit = scope.limit.unwrap_or(config.max_documents).max(1) as usize;
            documents = documents.into_iter().skip(offset).take(limit).collect();
        }
        None => {
            if documents.len() as i64 > config.max_documents {
                documents.truncate(config.max_documents as usize);
            }
        }
    }

    Ok(documents)
}

fn apply_priority_rules(documents: &mut Vec<ContextDocument>, rules: &PriorityRules) -> Result<()> {
    if let Some(from) = &rules.date_from {
        let ts = parse_day(from)?;
        documents.retain(|d| d.created_at >= ts);
    }
    if let Some(to) = &rules.date_to {
        // Inclusive through the end of the day.
        let ts = parse_day(to)? + 86_399;
        documents.retain(|d| d.created_at <= ts);
    }
    if !rules.doc_types.is_empty() {
        documents.retain(|d| {
            d.doc_type
                .as_ref()
                .is_some_and(|t| rules.doc_types.iter().any(|want| want == t))
        });
    }
    if !rules.custodians.is_empty() {
        documents.retain(|d| {
            d.custodian
                .as_ref()
                .is_some_and(|c| rules.custodians.iter().any(|want| want == c))
        });
    }
    Ok(())
}

fn parse_day(s: &str) -> Result<i64> {
    let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", s))?;
    Ok(date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp())
}

fn compose_prompt(
    intents: &[String],
    documents: &[ContextDocument],
    output_format: Option<&str>,
    config: &InsightConfig,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(SYSTEM_PREAMBLE);
    prompt.push_str("\n\nAnalysis tasks:\n");
    for intent in intents {
        prompt.push_str("- ");
        prompt.push_str(intent_instructions(intent));
        prompt.push('\n');
    }

    prompt.push_str("\nDocuments:\n");
    for (i, doc) in documents.iter().enumerate() {
        prompt.push_str(&format!(
            "\n--- Document {} ---\nFilename: {}\nAsset ID: {}\n",
            i + 1,
            doc.filename,
            doc.asset_id
        ));
        if let Some(doc_type) = &doc.doc_type {
            prompt.push_str(&format!("Type: {}\n", doc_type));
        }
        if let Some(custodian) = &doc.custodian {
            prompt.push_str(&format!("Custodian: {}\n", custodian));
        }
        prompt.push_str("Content:\n");
        prompt.push_str(&truncate_chars(&doc.content, config.max_chars_per_doc));
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "\nReturn exactly one JSON object whose keys are exactly: {}. Each key holds an array of \
         records as described above. Every record must include a \"citations\" array of \
         {{\"asset_id\", \"filename\", \"snippet\"}} objects pointing at the supporting documents, \
         and a \"confidence\" number between 0 and 1. Return only JSON, no commentary.",
        intents.join(", ")
    ));

    if let Some(format) = output_format {
        prompt.push_str(&format!("\nOutput format hint: {}", format));
    }

    prompt
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Coerce one section's records to their expected shape. Records missing
/// the section's primary field are dropped; optional fields get defaults
/// (confidence 0.5, citations []). Extra fields pass through untouched.
fn coerce_section_records(section: &str, records: &[Value]) -> Value {
    let primary = section_primary_field(section);
    let mut out = Vec::new();

    for record in records {
        let Some(fields) = record.as_object() else {
            warn!(section, "dropping non-object record");
            continue;
        };
        let has_primary = fields
            .get(primary)
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.trim().is_empty());
        if !has_primary {
            warn!(section, field = primary, "dropping record missing its primary field");
            continue;
        }

        let mut fields = fields.clone();
        if !fields.get("confidence").is_some_and(Value::is_number) {
            fields.insert("confidence".to_string(), json!(0.5));
        }
        let citations = fields
            .get("citations")
            .and_then(|v| v.as_array())
            .map(|entries| coerce_citations(entries))
            .unwrap_or_default();
        fields.insert("citations".to_string(), Value::Array(citations));

        out.push(Value::Object(fields));
    }

    Value::Array(out)
}

fn coerce_citations(entries: &[Value]) -> Vec<Value> {
    entries
        .iter()
        .filter_map(|entry| entry.as_object())
        .map(|c| {
            let field = |names: &[&str]| -> String {
                names
                    .iter()
                    .find_map(|n| c.get(*n).and_then(|v| v.as_str()))
                    .unwrap_or("")
                    .to_string()
            };
            let mut coerced = Map::new();
            coerced.insert("asset_id".into(), json!(field(&["asset_id", "assetId"])));
            coerced.insert("filename".into(), json!(field(&["filename", "file"])));
            coerced.insert("snippet".into(), json!(field(&["snippet", "quote"])));
            Value::Object(coerced)
        })
        .collect()
}

pub async fn get_insight_run(pool: &SqlitePool, run_id: &str) -> Result<Option<InsightRun>> {
    let row = sqlx::query("SELECT * FROM insight_runs WHERE id = ?")
        .bind(run_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| run_from_row(&r)))
}

pub async fn list_insight_runs(pool: &SqlitePool, matter_id: &str) -> Result<Vec<InsightRun>> {
    let rows = sqlx::query(
        "SELECT * FROM insight_runs WHERE matter_id = ? ORDER BY created_at DESC, id",
    )
    .bind(matter_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(run_from_row).collect())
}

/// All persisted sections for one run. Partial output of a failed run
/// remains queryable.
pub async fn list_insight_outputs(pool: &SqlitePool, run_id: &str) -> Result<Vec<InsightOutput>> {
    let rows = sqlx::query(
        "SELECT run_id, section, content_json FROM insight_outputs WHERE run_id = ? ORDER BY section",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let content_json: String = row.get("content_json");
            InsightOutput {
                run_id: row.get("run_id"),
                section: row.get("section"),
                content: serde_json::from_str(&content_json).unwrap_or(Value::Null),
            }
        })
        .collect())
}

/// Section key -> validated content for one run.
pub async fn get_insight_outputs(
    pool: &SqlitePool,
    run_id: &str,
) -> Result<BTreeMap<String, Value>> {
    Ok(list_insight_outputs(pool, run_id)
        .await?
        .into_iter()
        .map(|output| (output.section, output.content))
        .collect())
}

async fn set_run_status(
    pool: &SqlitePool,
    run_id: &str,
    status: RunStatus,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE insight_runs SET status = ?, error = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now().timestamp())
        .bind(run_id)
        .execute(pool)
        .await?;
    Ok(())
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> InsightRun {
    let priority_rules: Option<String> = row.get("priority_rules_json");
    let scope: Option<String> = row.get("scope_json");
    InsightRun {
        id: row.get("id"),
        matter_id: row.get("matter_id"),
        requested_by: row.get("requested_by"),
        intents: row.get("intents"),
        priority_rules: priority_rules.and_then(|s| serde_json::from_str(&s).ok()),
        output_format: row.get("output_format"),
        scope: scope.and_then(|s| serde_json::from_str(&s).ok()),
        status: RunStatus::parse(row.get("status")),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedModel};
    use crate::migrate;
    use async_trait::async_trait;
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

    async fn seed_ready_document(
        pool: &SqlitePool,
        asset_id: &str,
        filename: &str,
        content: &str,
        created_at: i64,
    ) {
        sqlx::query(
            "INSERT INTO assets (id, matter_id, original_name, file_kind, content_hash, size_bytes, storage_path, status, created_at, updated_at)
             VALUES (?, 'm1', ?, 'text', 'h', 1, '/tmp/x', 'ready', ?, ?)",
        )
        .bind(asset_id)
        .bind(filename)
        .bind(created_at)
        .bind(created_at)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO asset_texts (id, asset_id, method, content, confidence, created_at)
             VALUES (?, ?, 'extracted_text', ?, 1.0, ?)",
        )
        .bind(format!("t-{}", asset_id))
        .bind(asset_id)
        .bind(content)
        .bind(created_at)
        .execute(pool)
        .await
        .unwrap();
    }

    fn intents(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Model double that records every prompt it receives.
    struct RecordingModel {
        prompts: Mutex<Vec<String>>,
        response: String,
    }

    impl RecordingModel {
        fn new(response: &str) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                response: response.to_string(),
            }
        }
    }

    #[async_trait]
    impl crate::llm::LanguageModel for RecordingModel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn unknown_intent_is_rejected_before_anything_happens() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;

        let err = start_insight_run(&pool, "m1", &intents(&["themes", "horoscope"]), None, None, None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown intent 'horoscope'"));

        let runs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM insight_runs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(runs, 0);
    }

    #[tokio::test]
    async fn empty_matter_fails_fast_without_a_model_call() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        let model = ScriptedModel::new(vec!["{}"]);

        let run = start_insight_run(&pool, "m1", &intents(&["themes"]), None, None, None, None)
            .await
            .unwrap();
        let finished = run_insight(&pool, &InsightConfig::default(), &model, &run.id)
            .await
            .unwrap();

        assert_eq!(finished.status, RunStatus::Failed);
        assert!(finished.error.unwrap().contains("no processed documents"));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_section_completes_without_a_row() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        seed_ready_document(&pool, "a1", "memo.txt", "The project slipped twice.", 100).await;

        let response = r#"Here is the analysis you asked for:
{
  "themes": [
    {"theme": "schedule slippage", "summary": "Deadlines moved twice.",
     "citations": [{"asset_id": "a1", "filename": "memo.txt", "snippet": "slipped twice"}]}
  ]
}"#;
        let model = ScriptedModel::new(vec![response]);

        let run = start_insight_run(&pool, "m1", &intents(&["themes", "risks"]), None, None, None, None)
            .await
            .unwrap();
        let finished = run_insight(&pool, &InsightConfig::default(), &model, &run.id)
            .await
            .unwrap();

        assert_eq!(finished.status, RunStatus::Complete);
        let outputs = get_insight_outputs(&pool, &run.id).await.unwrap();
        assert!(outputs.contains_key("themes"));
        assert!(!outputs.contains_key("risks"));

        // Coercion fills the missing confidence.
        let themes = outputs["themes"].as_array().unwrap();
        assert_eq!(themes.len(), 1);
        assert_eq!(themes[0]["confidence"], json!(0.5));
        assert_eq!(themes[0]["citations"][0]["asset_id"], json!("a1"));
    }

    #[tokio::test]
    async fn unparsable_model_output_fails_the_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        seed_ready_document(&pool, "a1", "memo.txt", "content", 100).await;

        let model = ScriptedModel::new(vec!["I could not produce JSON today."]);
        let run = start_insight_run(&pool, "m1", &intents(&["themes"]), None, None, None, None)
            .await
            .unwrap();
        let finished = run_insight(&pool, &InsightConfig::default(), &model, &run.id)
            .await
            .unwrap();

        assert_eq!(finished.status, RunStatus::Failed);
        assert!(finished.error.unwrap().contains("no JSON object"));
    }

    #[tokio::test]
    async fn completed_run_cannot_be_rerun() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        seed_ready_document(&pool, "a1", "memo.txt", "content", 100).await;

        let model = ScriptedModel::new(vec!["{\"themes\": []}"]);
        let run = start_insight_run(&pool, "m1", &intents(&["themes"]), None, None, None, None)
            .await
            .unwrap();
        run_insight(&pool, &InsightConfig::default(), &model, &run.id)
            .await
            .unwrap();

        let err = run_insight(&pool, &InsightConfig::default(), &model, &run.id)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already complete"));
    }

    #[tokio::test]
    async fn scope_limits_to_most_recent_documents() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        seed_ready_document(&pool, "old", "oldest.txt", "old content", 100).await;
        seed_ready_document(&pool, "mid", "middle.txt", "mid content", 200).await;
        seed_ready_document(&pool, "new", "newest.txt", "new content", 300).await;

        let model = RecordingModel::new("{\"themes\": []}");
        let scope = RunScope {
            limit: Some(1),
            offset: None,
        };
        let run = start_insight_run(&pool, "m1", &intents(&["themes"]), None, None, Some(scope), None)
            .await
            .unwrap();
        run_insight(&pool, &InsightConfig::default(), &model, &run.id)
            .await
            .unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("newest.txt"));
        assert!(!prompts[0].contains("oldest.txt"));
        assert!(!prompts[0].contains("middle.txt"));
    }

    #[tokio::test]
    async fn scope_offset_pages_past_recent_documents() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        seed_ready_document(&pool, "old", "oldest.txt", "old content", 100).await;
        seed_ready_document(&pool, "new", "newest.txt", "new content", 300).await;

        let model = RecordingModel::new("{\"themes\": []}");
        let scope = RunScope {
            limit: Some(1),
            offset: Some(1),
        };
        let run = start_insight_run(&pool, "m1", &intents(&["themes"]), None, None, Some(scope), None)
            .await
            .unwrap();
        run_insight(&pool, &InsightConfig::default(), &model, &run.id)
            .await
            .unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("oldest.txt"));
        assert!(!prompts[0].contains("newest.txt"));
    }

    #[tokio::test]
    async fn priority_rules_filter_by_custodian() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = test_pool(&dir).await;
        seed_ready_document(&pool, "a1", "kept.txt", "from the right custodian", 100).await;
        seed_ready_document(&pool, "a2", "dropped.txt", "from someone else", 200).await;
        sqlx::query("UPDATE assets SET custodian = 'blake' WHERE id = 'a1'")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("UPDATE assets SET custodian = 'reyes' WHERE id = 'a2'")
            .execute(&pool)
            .await
            .unwrap();

        let model = RecordingModel::new("{\"themes\": []}");
        let rules = PriorityRules {
            custodians: vec!["blake".to_string()],
            ..Default::default()
        };
        let run = start_insight_run(&pool, "m1", &intents(&["themes"]), Some(rules), None, None, None)
            .await
            .unwrap();
        run_insight(&pool, &InsightConfig::default(), &model, &run.id)
            .await
            .unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("kept.txt"));
        assert!(!prompts[0].contains("dropped.txt"));
    }

    #[test]
    fn coercion_drops_records_missing_their_primary_field() {
        let records = vec![
            json!({"risk": "spoliation exposure", "severity": "high"}),
            json!({"severity": "low"}),
            json!("not an object"),
        ];
        let coerced = coerce_section_records("risks", &records);
        let arr = coerced.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["risk"], json!("spoliation exposure"));
        assert_eq!(arr[0]["citations"], json!([]));
    }

    #[test]
    fn coercion_accepts_citation_field_aliases() {
        let records = vec![json!({
            "theme": "delay",
            "citations": [
                {"assetId": "a9", "file": "x.txt", "quote": "..."},
                "bogus"
            ]
        })];
        let coerced = coerce_section_records("themes", &records);
        let citations = coerced[0]["citations"].as_array().unwrap();
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0]["asset_id"], json!("a9"));
        assert_eq!(citations[0]["filename"], json!("x.txt"));
    }

    #[test]
    fn prompt_names_every_intent_and_document() {
        let documents = vec![ContextDocument {
            asset_id: "a1".into(),
            filename: "brief.pdf".into(),
            doc_type: Some("brief".into()),
            custodian: None,
            created_at: 0,
            content: "body".into(),
        }];
        let prompt = compose_prompt(
            &intents(&["themes", "timeline"]),
            &documents,
            Some("markdown tables"),
            &InsightConfig::default(),
        );
        assert!(prompt.contains("themes, timeline"));
        assert!(prompt.contains("brief.pdf"));
        assert!(prompt.contains("Asset ID: a1"));
        assert!(prompt.contains("markdown tables"));
        assert!(prompt.contains("citations"));
    }

    #[test]
    fn long_documents_are_truncated_in_the_prompt() {
        let documents = vec![ContextDocument {
            asset_id: "a1".into(),
            filename: "long.txt".into(),
            doc_type: None,
            custodian: None,
            created_at: 0,
            content: "x".repeat(100_000),
        }];
        let config = InsightConfig::default();
        let prompt = compose_prompt(&intents(&["themes"]), &documents, None, &config);
        assert!(prompt.len() < 100_000);
    }
}
