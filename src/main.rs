//! # Scout CLI (`scout`)
//!
//! The `scout` binary is the primary interface to the engine. It provides
//! commands for database initialization, batch ingestion, querying,
//! embedding management, currency conversion, and starting the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! scout --config ./config/scout.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scout init` | Create the SQLite database and run schema migrations |
//! | `scout ingest <file>` | Ingest a JSON batch of knowledge items |
//! | `scout query "<question>"` | Answer a question with sources |
//! | `scout embed pending` | Backfill missing or stale embeddings |
//! | `scout embed rebuild` | Delete and regenerate all embeddings |
//! | `scout convert <amount> <from> <to> --rate <r>` | Convert a currency amount |
//! | `scout delete` | Remove items by id or source reference |
//! | `scout serve api` | Start the HTTP API server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use scout_engine::retrieve::Mode;
use scout_engine::{
    config, currency, db, embed_cmd, engine, ingest, migrate, models, server, synthesize,
    vector_store::VectorStore,
};

/// Scout — a retrieval-augmented query engine for market intelligence.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/scout.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "scout",
    about = "Scout — a retrieval-augmented query engine for market intelligence",
    version,
    long_about = "Scout ingests brand, product, pricing, and market-insight records, indexes them \
    for keyword and semantic search, and answers natural-language questions grounded in the \
    retrieved context, with source attribution on every answer."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scout.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (knowledge_items, items_fts, embedding_cache). Idempotent.
    Init,

    /// Ingest a JSON file containing an array of knowledge items.
    ///
    /// Each record is processed independently; failures are reported
    /// per item and never abort the batch.
    Ingest {
        /// Path to the JSON batch file.
        file: PathBuf,
    },

    /// Ask a question against the ingested corpus.
    Query {
        /// The question to answer.
        question: String,

        /// Maximum number of sources to use (defaults to config).
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict retrieval to one content kind
        /// (brand, product, market_insight, price_fact, other).
        #[arg(long)]
        kind: Option<String>,

        /// Search mode: `keyword`, `semantic`, or `hybrid`.
        #[arg(long, default_value = "hybrid")]
        mode: String,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Convert a currency amount with an explicit rate.
    ///
    /// The rate is units of the target currency per one unit of the
    /// source currency. No rate feed is consulted.
    Convert {
        /// Amount in the source currency.
        amount: f64,
        /// Source currency code (e.g. PHP).
        from: String,
        /// Target currency code (e.g. USD).
        to: String,
        /// Conversion rate (target units per source unit).
        #[arg(long)]
        rate: f64,
    },

    /// Remove knowledge items.
    Delete {
        /// Item id to delete.
        #[arg(long)]
        id: Option<String>,

        /// Cascade-delete every item from a source record, given as
        /// `table:id` (e.g. `price_facts:42`).
        #[arg(long)]
        source: Option<String>,
    },

    /// Start the HTTP API server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed items that are missing vectors or carry stale-model vectors.
    Pending {
        /// Maximum number of items to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings.
    ///
    /// Useful when switching embedding models. Clears stored vectors and
    /// the embedding cache, then re-embeds every item.
    Rebuild,
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Start the JSON API on the address configured in `[server].bind`.
    Api,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scout_engine=info,scout=info".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Convert needs no config or database.
    if let Commands::Convert {
        amount,
        from,
        to,
        rate,
    } = &cli.command
    {
        if !rate.is_finite() || *rate <= 0.0 {
            anyhow::bail!("--rate must be a positive finite number");
        }
        let converted = currency::convert(*amount, from, to, *rate);
        println!("{:.2} {} = {:.2} {}", amount, from, converted, to);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let pool = db::connect(&cfg.db).await?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file } => {
            let content = std::fs::read_to_string(&file)?;
            let records: Vec<models::IngestRecord> = serde_json::from_str(&content)?;
            let total = records.len();
            let outcomes = ingest::run_ingest(&pool, &cfg, records).await?;

            for (i, outcome) in outcomes.iter().enumerate() {
                match (&outcome.id, &outcome.error) {
                    (Some(id), None) => {
                        println!("[{}/{}] {} {}", i + 1, total, outcome.status.as_str(), id)
                    }
                    (_, Some(err)) => println!("[{}/{}] failed: {}", i + 1, total, err),
                    _ => {}
                }
            }
            let count = |s| outcomes.iter().filter(|o| o.status == s).count();
            println!(
                "Ingest complete: {} created, {} updated, {} failed.",
                count(models::IngestStatus::Created),
                count(models::IngestStatus::Updated),
                count(models::IngestStatus::Failed),
            );
        }
        Commands::Query {
            question,
            limit,
            kind,
            mode,
        } => {
            let kind = kind
                .map(|k| k.parse::<models::ContentKind>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let mode = mode.parse::<Mode>().map_err(|e| anyhow::anyhow!(e))?;
            let synthesizer = synthesize::create_synthesizer(&cfg.synthesis)?;

            let request = models::QueryRequest {
                question,
                context_limit: limit.unwrap_or(cfg.retrieval.final_limit),
                kind,
            };
            let response =
                engine::answer_query(&pool, &cfg, synthesizer.as_ref(), &request, mode).await?;

            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &response.sources {
                    let converted = source
                        .converted
                        .as_deref()
                        .map(|c| format!(" [{}]", c))
                        .unwrap_or_default();
                    println!(
                        "  {} (score {:.3}, {}){} {}",
                        source.id,
                        source.score,
                        source.method.as_str(),
                        converted,
                        source.excerpt,
                    );
                }
            }
            println!();
            println!("({} ms)", response.latency_ms);
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, dry_run } => {
                let report = embed_cmd::run_embed_pending(&pool, &cfg, limit, dry_run).await?;
                if dry_run {
                    println!("{} items pending embedding (dry run).", report.pending);
                } else {
                    println!(
                        "Embedded {} of {} pending items ({} failed).",
                        report.embedded, report.pending, report.failed
                    );
                }
            }
            EmbedAction::Rebuild => {
                let report = embed_cmd::run_embed_rebuild(&pool, &cfg).await?;
                println!(
                    "Rebuilt embeddings: {} of {} items ({} failed).",
                    report.embedded, report.pending, report.failed
                );
            }
        },
        Commands::Delete { id, source } => match (id, source) {
            (Some(id), None) => {
                let store = VectorStore::new(pool.clone(), 0);
                store.delete(&id).await?;
                println!("Deleted item {}.", id);
            }
            (None, Some(source)) => {
                let (table, source_id) = source
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("--source must be given as table:id"))?;
                let store = VectorStore::new(pool.clone(), 0);
                let removed = store.delete_by_source(table, source_id).await?;
                println!("Deleted {} item(s) for source {}.", removed, source);
            }
            _ => anyhow::bail!("specify exactly one of --id or --source"),
        },
        Commands::Serve { service } => match service {
            ServeService::Api => {
                server::run_server(pool, cfg).await?;
            }
        },
        Commands::Convert { .. } => unreachable!(),
    }

    Ok(())
}
