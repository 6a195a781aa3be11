//! # kb-sync CLI (`kbsync`)
//!
//! ## Usage
//!
//! ```bash
//! kbsync --config ./config/kbsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbsync sync` | Sync every file (or `--filter PREFIX`, or `--file PATH`) |
//! | `kbsync search "<query>"` | Tiered knowledge search |
//! | `kbsync files [FOLDER]` | List syncable files |
//! | `kbsync reconcile` | Match remote records to files, find duplicates |
//! | `kbsync redirects` | Export old → new URL redirects as CSV |
//! | `kbsync serve` | Start the HTTP tool server |
//!
//! Credentials come from the environment: `WP_APP_PASSWORD`,
//! `OPENAI_API_KEY`, `PINECONE_API_KEY`. Logging honours `RUST_LOG`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use kb_sync::cms::WordPressClient;
use kb_sync::config::{self, Config};
use kb_sync::connector_fs;
use kb_sync::embedding::create_embedder;
use kb_sync::index::create_index;
use kb_sync::models::{IndexOutcome, SyncResult, SyncStatus, SyncSummary};
use kb_sync::reconcile::{self, ReconcileOptions};
use kb_sync::redirects;
use kb_sync::search;
use kb_sync::server;
use kb_sync::sync::SyncEngine;

/// Sync a markdown knowledge base to a CMS and a vector index.
#[derive(Parser)]
#[command(name = "kbsync", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update remote records for local files.
    ///
    /// Files already in the identity map are updated by record ID, so
    /// renamed titles and slugs never produce duplicates.
    Sync {
        /// Report what would happen without any remote call or map write.
        #[arg(long)]
        dry_run: bool,

        /// Only files whose relative path starts with this prefix.
        #[arg(long, conflicts_with = "file")]
        filter: Option<String>,

        /// Sync exactly one file (relative to the root, or absolute).
        #[arg(long)]
        file: Option<String>,
    },

    /// Search the vector index and print a tiered report.
    Search {
        query: String,
    },

    /// List syncable markdown files.
    Files {
        /// Folder prefix relative to the root.
        folder: Option<String>,
    },

    /// Match remote records to local files and clean up duplicates.
    ///
    /// Without flags only analyzes. Deletion requires `--delete-dupes`
    /// or `--full`.
    Reconcile {
        /// Delete duplicate records.
        #[arg(long)]
        delete_dupes: bool,

        /// Rewrite the identity map from the matches.
        #[arg(long)]
        rebuild: bool,

        /// Delete duplicates, re-fetch, then rebuild.
        #[arg(long)]
        full: bool,
    },

    /// Export redirects for records whose slug changed.
    Redirects {
        /// Output CSV path. Defaults to `redirects_export.csv` under the root.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Start the HTTP tool server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kb_sync=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = Arc::new(config::load_config(&cli.config)?);

    match cli.command {
        Commands::Sync {
            dry_run,
            filter,
            file,
        } => {
            let engine = SyncEngine::connect(cfg.clone()).await?;
            run_sync(&engine, dry_run, filter.as_deref(), file.as_deref()).await?;
        }
        Commands::Search { query } => {
            run_search(&cfg, &query).await?;
        }
        Commands::Files { folder } => {
            let files = connector_fs::scan_kb(&cfg.kb, folder.as_deref())?;
            if files.is_empty() {
                println!("No syncable markdown files found.");
            } else {
                println!("Found {} files:", files.len());
                for f in &files {
                    println!("{}", f.rel_path);
                }
            }
        }
        Commands::Reconcile {
            delete_dupes,
            rebuild,
            full,
        } => {
            let options = if full {
                ReconcileOptions::full()
            } else {
                ReconcileOptions {
                    delete: delete_dupes,
                    rebuild,
                }
            };
            let store = WordPressClient::new(&cfg.cms, &cfg.kb.link_prefix)?;
            let report = reconcile::run_reconcile(&store, &cfg.kb, options).await?;
            println!("{}", report.render());
        }
        Commands::Redirects { output } => {
            let export = redirects::export_redirects(&cfg.kb, output.as_deref())?;
            match &export.path {
                None => println!("No URL changes detected."),
                Some(path) => {
                    println!("Redirects CSV exported: {}", path.display());
                    println!("Total redirects: {}", export.redirects.len());
                    for r in export.redirects.iter().take(5) {
                        println!("  {} -> {}", r.source, r.destination);
                    }
                }
            }
        }
        Commands::Serve => {
            let engine = SyncEngine::connect(cfg.clone()).await?;
            server::run_server(Arc::new(engine)).await?;
        }
    }

    Ok(())
}

async fn run_sync(
    engine: &SyncEngine,
    dry_run: bool,
    filter: Option<&str>,
    file: Option<&str>,
) -> Result<()> {
    let results = match file {
        Some(path) => vec![engine.sync_file_by_path(path, dry_run).await],
        None => engine.sync_all(dry_run, filter).await?,
    };

    for r in &results {
        println!("{}", describe(r));
    }

    let summary = SyncSummary::from_results(&results);
    println!();
    if dry_run {
        println!(
            "Dry run: {} would sync, {} skipped, {} errors",
            summary.dry_run, summary.skipped, summary.errors
        );
    } else {
        println!(
            "Created: {}, Updated: {}, Skipped: {}, Errors: {}",
            summary.created, summary.updated, summary.skipped, summary.errors
        );
    }
    Ok(())
}

fn describe(r: &SyncResult) -> String {
    let tag = r.status.as_str().to_uppercase();
    match r.status {
        SyncStatus::Created | SyncStatus::Updated => {
            let index = match &r.index {
                Some(IndexOutcome::Upserted { vectors }) => format!(" [{} vectors]", vectors),
                Some(IndexOutcome::Failed { message }) => format!(" [index failed: {}]", message),
                _ => String::new(),
            };
            format!(
                "[{}] {} -> {}{}",
                tag,
                r.file,
                r.url.as_deref().unwrap_or(""),
                index
            )
        }
        SyncStatus::DryRun => format!(
            "[{}] {} (slug: {}, topics: {:?})",
            tag,
            r.title.as_deref().unwrap_or(&r.file),
            r.slug.as_deref().unwrap_or(""),
            r.topics
        ),
        SyncStatus::Skipped => format!(
            "[{}] {}: {}",
            tag,
            r.file,
            r.reason.as_deref().unwrap_or("")
        ),
        SyncStatus::Error => format!(
            "[{}] {}: {}",
            tag,
            r.file,
            r.error.as_ref().map(|e| e.message.as_str()).unwrap_or("")
        ),
    }
}

async fn run_search(cfg: &Config, query: &str) -> Result<()> {
    let outcome = match (create_embedder(&cfg.embedding), create_index(&cfg.index)) {
        (Ok(embedder), Ok(index)) => {
            search::search_knowledge(query, embedder.as_ref(), index.as_ref(), &cfg.search).await
        }
        (Err(e), _) | (_, Err(e)) => search::SearchOutcome::Unavailable {
            message: format!("{:#}", e),
        },
    };
    println!("{}", outcome.render());
    Ok(())
}
