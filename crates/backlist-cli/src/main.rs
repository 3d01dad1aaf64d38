use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use backlist_catalog::{
    CatalogError, OpenLibrarySource, RateLimiter, SkipReason, SyncEngine, SyncOptions, SyncReport,
};
use backlist_core::dedup::{MergeOutcome, dedupe_all_titles, merge_authors, merge_candidates};
use backlist_core::{
    AppConfig, BacklistError, Database, ExitCode, FeedbackState, FormatFilter, GroupOrder,
    ReadBookRecord, RecommendationGroup, RecommendationQuery, generate_recommendations,
    hide_author, ingest_read_books, set_feedback, status, unhide_author,
};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "backlist",
    about = "Finds the books you haven't read yet by the authors you already read",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format. Also enabled by setting BACKLIST_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// Debug-level logging on stderr (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest reading history from a JSON array of records.
    Ingest { file: PathBuf },

    /// Fetch author catalogs from the external source.
    Sync {
        /// Ignore the freshness window.
        #[arg(long)]
        force: bool,
        /// Skip works published before the recent window.
        #[arg(long)]
        only_recent: bool,
        #[arg(long)]
        recent_years: Option<i32>,
        /// Remove non-English entries and title duplicates afterwards.
        #[arg(long)]
        auto_cleanup: bool,
        /// Merge every duplicate-author candidate without asking.
        #[arg(long)]
        auto_merge: bool,
        /// Only fetch this author; everyone else is skipped.
        #[arg(long)]
        author: Option<String>,
    },

    /// Show unread books grouped by author.
    Recommend {
        #[arg(long)]
        format: Option<FormatFilter>,
        /// Category to match, or `fiction` / `non-fiction`.
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        order: Option<GroupOrder>,
        /// Persist the snapshot.
        #[arg(long)]
        save: bool,
    },

    /// List suspected duplicate authors.
    Candidates,

    /// Merge the second author into the first.
    Merge {
        survivor: i64,
        loser: i64,
        #[arg(long)]
        dry_run: bool,
    },

    /// Record feedback on a catalog entry.
    Feedback { entry_id: i64, state: FeedbackState },

    /// Hide an author from recommendations.
    Hide { author_id: i64 },

    /// Show a hidden author again.
    Unhide { author_id: i64 },

    /// Soft-remove duplicate titles for every author.
    Dedupe,

    /// Show store counters and last run times.
    Status,

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Print the config file location.
    Path,
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:#}");
        std::process::exit(exit_code(&err) as i32);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "backlist=debug" } else { "backlist=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let start = Instant::now();
    let json_output = cli.json || std::env::var("BACKLIST_JSON").as_deref() == Ok("1");

    let mut config = AppConfig::load()?;
    if let Ok(dir) = std::env::var("BACKLIST_DATA_DIR") {
        config.set_data_dir(dir.into());
    }

    match cli.command {
        Commands::Ingest { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let records: Vec<ReadBookRecord> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", file.display()))?;
            let db = open_db(&config)?;
            let report = ingest_read_books(&db, &records)?;

            if json_output {
                print_ok(&report, start)?;
            } else {
                println!(
                    "Ingested {} new book(s), {} unchanged, {} rejected; {} new author(s).",
                    report.inserted, report.unchanged, report.rejected, report.authors_created
                );
            }
        }

        Commands::Sync {
            force,
            only_recent,
            recent_years,
            auto_cleanup,
            auto_merge,
            author,
        } => {
            let db = open_db(&config)?;
            let limiter = Arc::new(RateLimiter::new(Duration::from_millis(
                config.http.min_interval_ms,
            )));
            let source = OpenLibrarySource::new(&config, limiter)?;

            let mut opts = SyncOptions::from_config(&config.sync);
            opts.force = force;
            opts.only_recent = only_recent;
            opts.recent_years = recent_years.unwrap_or(config.sync.recent_years);
            opts.auto_cleanup = auto_cleanup;
            opts.auto_merge = auto_merge;
            opts.author_filter = author;

            let cancel = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&cancel);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Interrupt received, finishing the current step...");
                    flag.store(true, Ordering::Relaxed);
                }
            });

            let engine = SyncEngine::new(&db, &source).with_cancel(cancel);
            let report = engine.run_sync(&opts).await?;

            if json_output {
                print_ok(&report, start)?;
            } else {
                print_sync_report(&report);
            }
        }

        Commands::Recommend {
            format,
            category,
            order,
            save,
        } => {
            let db = open_db(&config)?;
            let query = RecommendationQuery {
                format: format.unwrap_or(config.recommend.default_format),
                category,
                order: order.unwrap_or(config.recommend.order),
            };
            let groups = generate_recommendations(&db, &query, save)?;

            if json_output {
                print_ok(&groups, start)?;
            } else {
                print_groups(&groups);
                if save {
                    println!("\nSnapshot saved.");
                }
            }
        }

        Commands::Candidates => {
            let db = open_db(&config)?;
            let candidates = merge_candidates(&db)?;
            if json_output {
                print_ok(&candidates, start)?;
            } else if candidates.is_empty() {
                println!("No duplicate-author candidates.");
            } else {
                for c in &candidates {
                    println!(
                        "  [{}] {}  <->  [{}] {}  ({})",
                        c.first_id, c.first_name, c.second_id, c.second_name, c.reason
                    );
                }
                println!("\nMerge with `backlist merge <survivor> <loser>`.");
            }
        }

        Commands::Merge {
            survivor,
            loser,
            dry_run,
        } => {
            let db = open_db(&config)?;
            let outcome = merge_authors(&db, survivor, loser, dry_run)?;
            if json_output {
                print_ok(&outcome, start)?;
            } else {
                match outcome {
                    MergeOutcome::Preview(p) => {
                        println!(
                            "Would merge '{}' ({} active) into '{}' ({} active):",
                            p.loser.name, p.loser.active_entries, p.survivor.name, p.survivor.active_entries
                        );
                        println!("  entries to move:     {}", p.entries_to_move);
                        println!("  read books to move:  {}", p.read_books_to_move);
                        println!("  work id collisions:  {}", p.work_id_collisions);
                        println!("  title collisions:    {}", p.title_collisions.len());
                        println!("  resulting entries:   {}", p.resulting_active_entries);
                    }
                    MergeOutcome::Applied(r) => {
                        println!(
                            "Merged author {} into {}: {} entries and {} read books moved, {} duplicates removed ({} active).",
                            r.loser_id,
                            r.survivor_id,
                            r.entries_moved,
                            r.read_books_moved,
                            r.duplicates_removed,
                            r.survivor_active_entries
                        );
                    }
                }
            }
        }

        Commands::Feedback { entry_id, state } => {
            let db = open_db(&config)?;
            set_feedback(&db, entry_id, state)?;
            if json_output {
                print_ok(&serde_json::json!({"entry_id": entry_id, "feedback": state}), start)?;
            } else {
                println!("Entry {entry_id}: {state}");
            }
        }

        Commands::Hide { author_id } => {
            let db = open_db(&config)?;
            hide_author(&db, author_id)?;
            if json_output {
                print_ok(&serde_json::json!({"author_id": author_id, "hidden": true}), start)?;
            } else {
                println!("Author {author_id} hidden.");
            }
        }

        Commands::Unhide { author_id } => {
            let db = open_db(&config)?;
            unhide_author(&db, author_id)?;
            if json_output {
                print_ok(&serde_json::json!({"author_id": author_id, "hidden": false}), start)?;
            } else {
                println!("Author {author_id} visible again.");
            }
        }

        Commands::Dedupe => {
            let db = open_db(&config)?;
            let removed = dedupe_all_titles(&db)?;
            if json_output {
                print_ok(&serde_json::json!({"removed": removed}), start)?;
            } else {
                println!("Removed {removed} duplicate title(s).");
            }
        }

        Commands::Status => {
            let db = open_db(&config)?;
            let report = status(&db)?;
            if json_output {
                print_ok(&report, start)?;
            } else {
                let when = |t: Option<chrono::DateTime<chrono::Utc>>| {
                    t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string())
                };
                println!("Authors:          {} ({} hidden)", report.authors, report.hidden_authors);
                println!("Read books:       {}", report.read_books);
                println!(
                    "Catalog entries:  {} active, {} duplicate, {} non-English",
                    report.catalog.active, report.catalog.removed_duplicate, report.catalog.removed_non_english
                );
                println!("Recommendations:  {}", report.recommendations);
                println!("Pending merges:   {}", report.pending_candidates);
                println!("Last ingest:      {}", when(report.last_ingest_at));
                println!("Last catalog run: {}", when(report.last_catalog_run_at));
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                if json_output {
                    print_ok(&config, start)?;
                } else {
                    print!("{}", toml::to_string_pretty(&config)?);
                }
            }
            ConfigAction::Path => {
                let path = AppConfig::config_path();
                if json_output {
                    print_ok(&serde_json::json!({"path": path}), start)?;
                } else {
                    println!("{}", path.display());
                }
            }
        },
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn print_ok<T: Serialize>(data: &T, start: Instant) -> Result<()> {
    let val = serde_json::json!({
        "status": "ok",
        "data": data,
        "meta": { "duration_ms": start.elapsed().as_millis() as u64 }
    });
    println!("{}", serde_json::to_string_pretty(&val)?);
    Ok(())
}

fn open_db(config: &AppConfig) -> Result<Database> {
    Ok(Database::open(&config.database_path())?)
}

fn print_sync_report(report: &SyncReport) {
    println!("Synced {} author(s):", report.succeeded.len());
    for a in &report.succeeded {
        println!(
            "  ✓ {:<30} +{} new, {} known, {} too old",
            a.author, a.inserted, a.skipped_existing, a.skipped_too_old
        );
    }

    if !report.skipped.is_empty() {
        println!("\nSkipped {} author(s):", report.skipped.len());
        for s in &report.skipped {
            match &s.detail {
                Some(detail) if s.reason != SkipReason::Fresh => {
                    println!("  ○ {:<30} {} ({detail})", s.author, s.reason)
                }
                _ => println!("  ○ {:<30} {}", s.author, s.reason),
            }
        }
    }

    if report.duplicates_removed > 0 || report.non_english_removed > 0 {
        println!(
            "\nRemoved {} duplicate and {} non-English entries.",
            report.duplicates_removed, report.non_english_removed
        );
    }
    for m in &report.merges_applied {
        println!("Merged author {} into {}.", m.loser_id, m.survivor_id);
    }
    if !report.merge_candidates.is_empty() {
        println!("\n{} duplicate-author candidate(s) need review:", report.merge_candidates.len());
        for c in &report.merge_candidates {
            println!("  [{}] {}  <->  [{}] {}", c.first_id, c.first_name, c.second_id, c.second_name);
        }
    }
    if report.interrupted {
        println!("\nInterrupted. Run `backlist sync` again to resume.");
    }
}

fn print_groups(groups: &[RecommendationGroup]) {
    if groups.is_empty() {
        println!("Nothing to recommend. Run `backlist sync` first.");
        return;
    }
    for g in groups {
        println!(
            "{} ({} unread, {} read)",
            g.author_name,
            g.eligible_count(),
            g.books_read
        );
        for b in &g.books {
            let year = b.publish_year.map(|y| y.to_string()).unwrap_or_default();
            let series = match (&b.series_name, b.series_position) {
                (Some(name), Some(pos)) => format!("  [{name} #{pos}]"),
                (Some(name), None) => format!("  [{name}]"),
                _ => String::new(),
            };
            let liked = if b.feedback == FeedbackState::ThumbsUp { " 👍" } else { "" };
            println!("  {:>6}  {:<50} {year}{series}{liked}", b.entry_id, b.title);
        }
    }
}

/// Maps an error chain onto the documented exit codes.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    let core = err.downcast_ref::<BacklistError>().or_else(|| {
        err.downcast_ref::<CatalogError>().and_then(|e| match e {
            CatalogError::Storage(inner) => Some(inner),
            _ => None,
        })
    });
    if let Some(e) = core {
        return e.exit_code();
    }
    match err.downcast_ref::<CatalogError>() {
        Some(CatalogError::NotFound(_)) => ExitCode::NotFound,
        Some(e) if e.is_transient() => ExitCode::NetworkError,
        _ if err.downcast_ref::<std::io::Error>().is_some() => ExitCode::FileSystemError,
        _ => ExitCode::GeneralError,
    }
}
