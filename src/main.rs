//! # Dossier CLI
//!
//! The `dossier` binary is the primary interface to the pipeline. It
//! provides commands for database initialization, case-file submission,
//! status inspection, matter summaries, and insight runs.
//!
//! ## Usage
//!
//! ```bash
//! dossier --config ./config/dossier.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dossier init` | Create the SQLite database and run schema migrations |
//! | `dossier submit <file>` | Store a case file and schedule extraction |
//! | `dossier status <asset-id>` | Show one asset's status and metadata |
//! | `dossier list` | List a matter's assets |
//! | `dossier delete <asset-id>` | Delete an asset and its stored bytes |
//! | `dossier summary` | Matter-wide scan summary |
//! | `dossier analyze` | Start and execute an insight run |
//! | `dossier runs` | List a matter's insight runs |
//! | `dossier outputs <run-id>` | Show a run's validated sections |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use dossier::config::{load_config, Config};
use dossier::models::{PriorityRules, RunScope};
use dossier::queue::ProcessingQueue;
use dossier::{assets, db, insight, llm, migrate, ocr, summary};

/// Dossier — case-file ingestion and insight pipeline for legal matters.
#[derive(Parser)]
#[command(
    name = "dossier",
    about = "Dossier — case-file ingestion and insight pipeline for legal matters",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dossier.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Submit a case file for a matter and schedule extraction.
    Submit {
        /// Path to the file to upload.
        file: PathBuf,

        /// Matter the file belongs to.
        #[arg(long)]
        matter: String,

        /// Declared MIME type; guessed from the extension when omitted.
        #[arg(long)]
        mime: Option<String>,

        /// Document type classification (contract, correspondence, ...).
        #[arg(long)]
        doc_type: Option<String>,

        /// Custodian the file was collected from.
        #[arg(long)]
        custodian: Option<String>,

        /// Confidentiality designation.
        #[arg(long)]
        confidentiality: Option<String>,

        /// Block until processing reaches a terminal status.
        #[arg(long)]
        wait: bool,
    },

    /// Show one asset's status and metadata.
    Status {
        /// Asset id.
        id: String,
    },

    /// List a matter's assets, newest first.
    List {
        #[arg(long)]
        matter: String,

        #[arg(long, default_value_t = 1)]
        page: i64,

        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Delete an asset, its derived rows, and its stored bytes.
    Delete {
        /// Asset id.
        id: String,
    },

    /// Matter-wide scan summary: counts, confidence, problem files.
    Summary {
        #[arg(long)]
        matter: String,
    },

    /// Start an insight run over a matter's ready assets and execute it.
    Analyze {
        #[arg(long)]
        matter: String,

        /// Comma-separated intent list (themes,timeline,entities,...).
        #[arg(long)]
        intents: String,

        /// Analyze only the most recent N documents.
        #[arg(long)]
        limit: Option<i64>,

        /// Skip the most recent N documents (pagination).
        #[arg(long)]
        offset: Option<i64>,

        /// Only documents from these custodians (comma-separated).
        #[arg(long)]
        custodians: Option<String>,

        /// Only documents uploaded on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Free-text hint forwarded to the model about output style.
        #[arg(long)]
        format: Option<String>,
    },

    /// List a matter's insight runs.
    Runs {
        #[arg(long)]
        matter: String,
    },

    /// Show a run's validated section outputs as JSON.
    Outputs {
        /// Insight run id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Submit {
            file,
            matter,
            mime,
            doc_type,
            custodian,
            confidentiality,
            wait,
        } => {
            run_submit(
                &config,
                &file,
                matter,
                mime,
                doc_type,
                custodian,
                confidentiality,
                wait,
            )
            .await
        }
        Commands::Status { id } => run_status(&config, &id).await,
        Commands::List {
            matter,
            page,
            limit,
        } => run_list(&config, &matter, page, limit).await,
        Commands::Delete { id } => run_delete(&config, &id).await,
        Commands::Summary { matter } => run_summary(&config, &matter).await,
        Commands::Analyze {
            matter,
            intents,
            limit,
            offset,
            custodians,
            since,
            format,
        } => run_analyze(&config, &matter, &intents, limit, offset, custodians, since, format).await,
        Commands::Runs { matter } => run_runs(&config, &matter).await,
        Commands::Outputs { id } => run_outputs(&config, &id).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    std::fs::create_dir_all(&config.storage.root)?;
    pool.close().await;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_submit(
    config: &Config,
    file: &PathBuf,
    matter: String,
    mime: Option<String>,
    doc_type: Option<String>,
    custodian: Option<String>,
    confidentiality: Option<String>,
    wait: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let bytes = std::fs::read(file)?;
    let original_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let queue = ProcessingQueue::new(
        pool.clone(),
        ocr::create_engine(&config.ocr),
        &config.queue,
        &config.chunking,
        &config.ocr,
    );

    let (asset, handle) = assets::submit_asset(
        &pool,
        config,
        &queue,
        assets::NewAssetUpload {
            matter_id: matter,
            original_name,
            mime_type: mime.unwrap_or_default(),
            bytes,
            doc_type,
            custodian,
            confidentiality,
        },
    )
    .await?;

    println!("submitted {}", asset.id);
    println!("  matter: {}", asset.matter_id);
    println!("  kind:   {}", asset.file_kind.as_str());
    println!("  hash:   {}", asset.content_hash);

    if wait {
        handle.await?;
        let finished = assets::get_asset(&pool, &asset.id).await?.unwrap();
        println!("  status: {}", finished.status.as_str());
        if let Some(error) = finished.error {
            println!("  error:  {}", error);
        }
    } else {
        println!("  status: {}", asset.status.as_str());
    }

    pool.close().await;
    Ok(())
}

async fn run_status(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let asset = match assets::get_asset(&pool, id).await? {
        Some(a) => a,
        None => {
            eprintln!("Error: asset not found: {}", id);
            std::process::exit(1);
        }
    };

    println!("--- Asset ---");
    println!("id:        {}", asset.id);
    println!("matter:    {}", asset.matter_id);
    println!("file:      {}", asset.original_name);
    println!("kind:      {}", asset.file_kind.as_str());
    println!("status:    {}", asset.status.as_str());
    if let Some(error) = &asset.error {
        println!("error:     {}", error);
    }
    println!("hash:      {}", asset.content_hash);
    println!("size:      {} bytes", asset.size_bytes);
    if let Some(pages) = asset.page_count {
        println!("pages:     {}", pages);
    }
    if let Some(doc_type) = &asset.doc_type {
        println!("doc type:  {}", doc_type);
    }
    if let Some(custodian) = &asset.custodian {
        println!("custodian: {}", custodian);
    }
    if let Some(profile) = &asset.profile_json {
        println!("profile:   {}", profile);
    }

    let history = dossier::queue::extraction_history(&pool, id).await?;
    if !history.is_empty() {
        println!();
        println!("--- Processing attempts ---");
        for attempt in &history {
            println!(
                "{} via {} in {}ms{}{}",
                attempt.method,
                attempt.provider,
                attempt.duration_ms,
                attempt
                    .confidence
                    .map(|c| format!(" (confidence {:.2})", c))
                    .unwrap_or_default(),
                attempt
                    .error
                    .as_deref()
                    .map(|e| format!(" [error: {}]", e))
                    .unwrap_or_default()
            );
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_list(config: &Config, matter: &str, page: i64, limit: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let assets = assets::list_assets(&pool, matter, page, limit).await?;

    println!(
        "{:<36} {:>8} {:>10} {:<6} FILE",
        "ID", "KIND", "STATUS", "PAGES"
    );
    for asset in &assets {
        println!(
            "{:<36} {:>8} {:>10} {:<6} {}",
            asset.id,
            asset.file_kind.as_str(),
            asset.status.as_str(),
            asset
                .page_count
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            asset.original_name
        );
    }
    println!("{} assets (page {})", assets.len(), page.max(1));

    pool.close().await;
    Ok(())
}

async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    assets::delete_asset(&pool, id).await?;
    println!("deleted {}", id);
    pool.close().await;
    Ok(())
}

async fn run_summary(config: &Config, matter: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let summary = summary::scan_summary(&pool, matter).await?;

    println!("Dossier — Matter Scan Summary");
    println!("=============================");
    println!();
    println!("  Matter:      {}", matter);
    println!("  Files:       {}", summary.total_files);
    println!("  Pages:       {}", summary.total_pages);
    if let Some((lo, hi)) = &summary.date_range {
        println!("  Uploaded:    {} .. {}", lo, hi);
    }

    if !summary.file_type_counts.is_empty() {
        println!();
        println!("  By kind:");
        for (kind, count) in &summary.file_type_counts {
            println!("    {:<8} {}", kind, count);
        }
    }

    if !summary.status_counts.is_empty() {
        println!();
        println!("  By status:");
        for (status, count) in &summary.status_counts {
            println!("    {:<12} {}", status, count);
        }
    }

    println!();
    println!(
        "  Confidence:  {} high / {} medium / {} low / {} unknown",
        summary.confidence.high,
        summary.confidence.medium,
        summary.confidence.low,
        summary.confidence.unknown
    );

    if !summary.problem_files.is_empty() {
        println!();
        println!("  Problem files:");
        for problem in &summary.problem_files {
            println!("    {} ({}): {}", problem.filename, problem.asset_id, problem.reason);
        }
    }
    println!();

    pool.close().await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_analyze(
    config: &Config,
    matter: &str,
    intents: &str,
    limit: Option<i64>,
    offset: Option<i64>,
    custodians: Option<String>,
    since: Option<String>,
    format: Option<String>,
) -> Result<()> {
    let pool = db::connect(config).await?;

    let intent_list: Vec<String> = intents
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let scope = (limit.is_some() || offset.is_some()).then_some(RunScope { limit, offset });
    let rules = (custodians.is_some() || since.is_some()).then(|| PriorityRules {
        date_from: since,
        custodians: custodians
            .map(|c| c.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default(),
        ..Default::default()
    });

    let run = insight::start_insight_run(&pool, matter, &intent_list, rules, format, scope, None)
        .await?;
    println!("run {} started ({})", run.id, run.intents);

    let model = llm::create_model(&config.insight);
    let finished = insight::run_insight(&pool, &config.insight, model.as_ref(), &run.id).await?;

    println!("run {} {}", finished.id, finished.status.as_str());
    if let Some(error) = &finished.error {
        println!("  error: {}", error);
    }

    let outputs = insight::get_insight_outputs(&pool, &run.id).await?;
    for (section, content) in &outputs {
        let count = content.as_array().map(|a| a.len()).unwrap_or(0);
        println!("  {}: {} records", section, count);
    }

    pool.close().await;
    Ok(())
}

async fn run_runs(config: &Config, matter: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let runs = insight::list_insight_runs(&pool, matter).await?;

    println!("{:<36} {:>10} INTENTS", "ID", "STATUS");
    for run in &runs {
        println!("{:<36} {:>10} {}", run.id, run.status.as_str(), run.intents);
    }
    println!("{} runs", runs.len());

    pool.close().await;
    Ok(())
}

async fn run_outputs(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let outputs = insight::get_insight_outputs(&pool, id).await?;

    if outputs.is_empty() {
        println!("no outputs for run {}", id);
    } else {
        let map: serde_json::Map<String, serde_json::Value> =
            outputs.into_iter().collect();
        println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(map))?);
    }

    pool.close().await;
    Ok(())
}
