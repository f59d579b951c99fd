//! regwatch CLI
//!
//! Runs the change-detection pipeline for one source and inspects the
//! revision history. Scheduling is left to cron or a job queue: each
//! invocation of `run` is one tick for one source.

mod config;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use regwatch::extraction::openai::OpenAiExtractor;
use regwatch::{
    FsBlobStore, HttpFetcher, Jurisdiction, Pipeline, PostgresStore, RateLimitedFetcher,
    RevisionStore, Source,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "regwatch")]
#[command(about = "Regulatory change detection pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once for a source
    Run {
        #[arg(long)]
        source: Uuid,
    },

    /// Show a source's revisions, newest first
    History {
        #[arg(long)]
        source: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Full-text search over revision summaries and blob keys
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Create tables, indexes and triggers
    Migrate,

    /// Load jurisdictions and sources from a JSON catalog file
    Catalog { path: PathBuf },
}

/// Contents of a catalog file.
#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    jurisdictions: Vec<Jurisdiction>,
    #[serde(default)]
    sources: Vec<Source>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,regwatch=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Run { source } => cmd_run(&config, source).await,
        Commands::History { source, limit } => cmd_history(&config, source, limit).await,
        Commands::Search { query, limit } => cmd_search(&config, &query, limit).await,
        Commands::Migrate => cmd_migrate(&config).await,
        Commands::Catalog { path } => cmd_catalog(&config, &path).await,
    }
}

async fn connect(config: &Config) -> Result<PostgresStore> {
    PostgresStore::new(&config.database_url)
        .await
        .context("Failed to connect to database")
}

async fn cmd_run(config: &Config, source_id: Uuid) -> Result<()> {
    let store = connect(config).await?;
    let fetcher = RateLimitedFetcher::new(
        HttpFetcher::new(config.fetch_timeout).context("Failed to build HTTP client")?,
        config.fetch_rate_per_second,
    );
    let extractor =
        OpenAiExtractor::new(config.credentials()?).context("Failed to build OpenAI client")?;

    let pipeline = Pipeline::new(fetcher, FsBlobStore::new(config.blob_root.clone()), store, extractor)
        .with_config(config.pipeline_config());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            on_signal.cancel();
        }
    });

    let report = pipeline.run_with_cancel(source_id, cancel).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.status.is_failure() {
        bail!("run {} finished with status {}", report.run_id, report.status);
    }
    Ok(())
}

async fn cmd_history(config: &Config, source_id: Uuid, limit: usize) -> Result<()> {
    let store = connect(config).await?;
    let revisions = store
        .history(source_id, limit)
        .await
        .context("Failed to load history")?;

    if revisions.is_empty() {
        println!("No revisions for source {source_id}");
        return Ok(());
    }

    for revision in revisions {
        let digest = revision
            .content_digest
            .as_deref()
            .map(|d| &d[..d.len().min(12)])
            .unwrap_or("-");
        println!(
            "{}  {}  {:<20}  changed={:<5}  {}  {}",
            revision.captured_at.format("%Y-%m-%d %H:%M:%S"),
            revision.id,
            revision.status.as_str(),
            revision.change_detected,
            digest,
            revision.summary.as_deref().unwrap_or("")
        );
        if let Some(diff) = store.diff_for(revision.id).await? {
            for key in diff.diff.differing_keys() {
                println!("    ~ {key}");
            }
        }
    }
    Ok(())
}

async fn cmd_search(config: &Config, query: &str, limit: usize) -> Result<()> {
    let store = connect(config).await?;
    let hits = store.search(query, limit).await.context("Search failed")?;

    for hit in hits {
        println!(
            "{:.3}  {}  {}  {}",
            hit.score,
            hit.revision.source_id,
            hit.revision.blob_key,
            hit.revision.summary.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn cmd_migrate(config: &Config) -> Result<()> {
    // Connecting applies migrations.
    connect(config).await?;
    println!("Migrations applied");
    Ok(())
}

async fn cmd_catalog(config: &Config, path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let catalog: CatalogFile = serde_json::from_str(&raw).context("Invalid catalog file")?;

    let store = connect(config).await?;
    for jurisdiction in &catalog.jurisdictions {
        store.upsert_jurisdiction(jurisdiction).await?;
    }
    for source in &catalog.sources {
        store.upsert_source(source).await?;
    }

    println!(
        "Loaded {} jurisdictions and {} sources",
        catalog.jurisdictions.len(),
        catalog.sources.len()
    );
    Ok(())
}
