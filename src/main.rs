//! # Notes retrieval CLI (`notes`)
//!
//! The `notes` binary exercises the retrieval core from the command line:
//! building the corpus, searching it, fusing several related queries, and
//! pre-filling the embedding cache.
//!
//! ## Usage
//!
//! ```bash
//! notes --config ./config/notes.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `notes chunks` | Build the corpus and print chunk counts per kind |
//! | `notes search "<query>"` | Search the corpus with one query |
//! | `notes ask -q "<a>" -q "<b>"` | Fuse several related queries |
//! | `notes warmup` | Embed every chunk missing from the cache |
//! | `notes completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Keyword search
//! notes search "rural revitalization"
//!
//! # Vector search, JSON output
//! notes search "how do I structure an answer" --mode vector --json
//!
//! # Fuse a question with a sample answer
//! notes ask -q "grassroots governance" -q "village committee elections" --top-k 8
//!
//! # Pre-fill the embedding cache with JSON progress on stderr
//! notes warmup --progress json
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use notes_retrieval::config::{self, Settings};
use notes_retrieval::error::ConfigError;
use notes_retrieval::models::NoteHit;
use notes_retrieval::progress::ProgressMode;
use notes_retrieval::search::{SearchMode, SearchOptions};
use notes_retrieval::store::RetrievalStore;

/// Notes retrieval: find the notes and rubrics behind a spoken answer.
#[derive(Parser)]
#[command(name = "notes", version, about = "Notes retrieval core")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/notes.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the `[retrieval]` section.
#[derive(clap::Args)]
struct SearchArgs {
    /// Retrieval mode: `keyword` or `vector`.
    #[arg(long, value_enum)]
    mode: Option<SearchMode>,

    /// Maximum number of hits.
    #[arg(long)]
    top_k: Option<usize>,

    /// Minimum score a hit must reach.
    #[arg(long)]
    min_score: Option<f64>,

    /// Print hits as a JSON array.
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the corpus and print chunk counts per kind.
    Chunks {
        /// List every chunk of this kind.
        #[arg(long)]
        kind: Option<String>,
    },

    /// Search the corpus with a single query.
    Search {
        /// The query text.
        query: String,

        #[command(flatten)]
        args: SearchArgs,
    },

    /// Search several related queries and fuse the rankings.
    Ask {
        /// A query; repeat for more.
        #[arg(short = 'q', long = "query", required = true)]
        queries: Vec<String>,

        #[command(flatten)]
        args: SearchArgs,
    },

    /// Embed every chunk that has no cached vector yet.
    Warmup {
        /// Progress output: off, human (stderr), or json (stderr).
        /// Defaults to human on a TTY, otherwise off.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "notes", &mut std::io::stdout());
        return Ok(());
    }

    let settings = config::load_config(&cli.config)?.resolve();
    let store = RetrievalStore::from_settings(&settings);

    match cli.command {
        Commands::Chunks { kind } => {
            run_chunks(&store, &settings, kind.as_deref()).await?;
        }
        Commands::Search { query, args } => {
            let options = search_options(&settings, &args);
            let corpus = store.build(&settings.dirs).await?;
            let hits = store.search(&query, &corpus, &options).await?;
            print_hits(&hits, args.json)?;
        }
        Commands::Ask { queries, args } => {
            let options = search_options(&settings, &args);
            let corpus = store.build(&settings.dirs).await?;
            let hits = store.search_multi(&queries, &corpus, &options).await?;
            print_hits(&hits, args.json)?;
        }
        Commands::Warmup { progress } => {
            run_warmup(&store, &settings, progress).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}

fn search_options(settings: &Settings, args: &SearchArgs) -> SearchOptions {
    let base = &settings.search;
    SearchOptions {
        mode: args.mode.unwrap_or(base.mode),
        top_k: args.top_k.unwrap_or(base.top_k),
        min_score: args.min_score.unwrap_or(base.min_score),
        vector: base.vector.clone(),
    }
}

async fn run_chunks(store: &RetrievalStore, settings: &Settings, kind: Option<&str>) -> Result<()> {
    let corpus = store.build(&settings.dirs).await?;

    let mut counts: BTreeMap<&str, usize> = settings.dirs.keys().map(|k| (k.as_str(), 0)).collect();
    for chunk in corpus.iter() {
        *counts.entry(chunk.kind.as_str()).or_default() += 1;
    }

    println!("{:<16} {:>8}", "KIND", "CHUNKS");
    for (k, n) in &counts {
        println!("{:<16} {:>8}", k, n);
    }
    println!("{:<16} {:>8}", "total", corpus.len());

    if let Some(kind) = kind {
        println!();
        for chunk in corpus.iter().filter(|c| c.kind == kind) {
            println!(
                "{}  ({} chars)  {}",
                chunk.source.display(),
                chunk.text.chars().count(),
                notes_retrieval::search::snippet(&chunk.text)
            );
        }
    }
    Ok(())
}

async fn run_warmup(store: &RetrievalStore, settings: &Settings, progress: Option<ProgressMode>) -> Result<()> {
    let vector = settings
        .search
        .vector
        .as_ref()
        .ok_or(ConfigError::MissingVectorSettings)?;
    let corpus = store.build(&settings.dirs).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted; finishing the current batch...");
            on_signal.cancel();
        }
    });

    let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
    let report = store.warmup(&corpus, vector, &*reporter, &cancel).await?;

    println!(
        "warmup {}: {} embedded, {} already cached, {} total missing",
        if report.aborted { "aborted" } else { "complete" },
        report.created,
        report.cached,
        report.total
    );
    Ok(())
}

fn print_hits(hits: &[NoteHit], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.3}] {} ({})", i + 1, hit.score, hit.source.display(), hit.kind);
        println!("    {}", hit.snippet.replace('\n', " "));
    }
    Ok(())
}
