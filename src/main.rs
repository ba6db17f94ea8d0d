//! # kbsync CLI (`kb`)
//!
//! The `kb` binary keeps a notes directory, its relational model and its
//! search index in sync, and queries the result.
//!
//! ## Usage
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Create the SQLite database and run schema migrations |
//! | `kb sync` | Reconcile the notes directory with the database |
//! | `kb search "<query>"` | Search entities, observations and relations |
//! | `kb reindex` | Rebuild the search index from the relational store |
//! | `kb stats` | Print counts and sync health |
//! | `kb edit <note>` | Append, prepend, find/replace or replace a section |
//!
//! ## Examples
//!
//! ```bash
//! # Preview what a sync would do
//! kb sync --dry-run
//!
//! # Boolean search
//! kb search "sync AND (engine OR service)"
//!
//! # Everything under a permalink prefix
//! kb search --permalink-match "specs/*"
//!
//! # Replace a section in place
//! kb edit "Search Design" --operation replace_section --section "## Plan" --content "Ship it"
//! ```

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use kbsync::config;
use kbsync::edit::{self, EditOperation};
use kbsync::migrate;
use kbsync::models::SearchItemType;
use kbsync::progress::ProgressMode;
use kbsync::search::{self, SearchQuery};
use kbsync::stats;
use kbsync::sync;

/// kbsync: keep a markdown knowledge base, its relational model and a
/// full-text index in agreement.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kb.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "kb", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    /// Log at debug level. `RUST_LOG` takes precedence when set.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    /// Human progress when stderr is a terminal.
    Auto,
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Reconcile the notes directory with the database.
    ///
    /// Detects new, modified, deleted and moved files by checksum and
    /// applies them in that order: moves, deletes, creates, modifies.
    /// Forward references are resolved at the end.
    Sync {
        /// Only report the change set; write nothing.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr.
        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Search entities, observations and relations.
    ///
    /// Supports prefix terms (`sync*`), quoted phrases and boolean
    /// operators (`AND`, `OR`, `NOT`, parentheses).
    Search {
        /// Full-text query over titles and content. Omit or pass `*` to
        /// list everything.
        query: Option<String>,

        /// Match against titles only.
        #[arg(long)]
        title: Option<String>,

        /// Exact permalink.
        #[arg(long)]
        permalink: Option<String>,

        /// Permalink pattern, e.g. `specs/*`.
        #[arg(long)]
        permalink_match: Option<String>,

        /// Item type: entity, observation or relation. Repeatable.
        #[arg(long = "type")]
        item_types: Vec<String>,

        /// Entity type from frontmatter, e.g. `note`. Repeatable.
        #[arg(long = "entity-type")]
        entity_types: Vec<String>,

        /// Only items created on or after this date (YYYY-MM-DD).
        #[arg(long)]
        after: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Rebuild the search index from the relational store.
    Reindex,

    /// Show entity, observation and relation counts.
    Stats,

    /// Edit a note in place, then re-sync it.
    Edit {
        /// Permalink, title or path of the note.
        identifier: String,

        /// append, prepend, find_replace or replace_section.
        #[arg(long)]
        operation: String,

        /// New content.
        #[arg(long)]
        content: String,

        /// Text to replace (find_replace).
        #[arg(long = "find")]
        find_text: Option<String>,

        /// Markdown header to replace under (replace_section).
        #[arg(long)]
        section: Option<String>,

        /// Number of occurrences find_replace must see.
        #[arg(long)]
        expected_replacements: Option<usize>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "kbsync=debug" } else { "kbsync=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { dry_run, progress } => {
            sync::run_sync(&cfg, dry_run, progress.into()).await?;
        }
        Commands::Search {
            query,
            title,
            permalink,
            permalink_match,
            item_types,
            entity_types,
            after,
            limit,
            offset,
        } => {
            let mut types = Vec::with_capacity(item_types.len());
            for name in &item_types {
                match SearchItemType::parse(name) {
                    Some(item_type) => types.push(item_type),
                    None => bail!(
                        "Unknown item type '{}'. Use entity, observation or relation.",
                        name
                    ),
                }
            }
            let after_date = after.as_deref().map(search::parse_after_date).transpose()?;

            let query = SearchQuery {
                text: query,
                title,
                permalink,
                permalink_match,
                item_types: types,
                entity_types,
                after_date,
                limit: limit.unwrap_or(cfg.search.default_limit),
                offset,
            };
            search::run_search(&cfg, query).await?;
        }
        Commands::Reindex => {
            search::run_reindex(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Edit {
            identifier,
            operation,
            content,
            find_text,
            section,
            expected_replacements,
        } => {
            let op = EditOperation::from_parts(
                &operation,
                content,
                find_text,
                section,
                expected_replacements,
            )?;
            edit::run_edit(&cfg, &identifier, op).await?;
        }
    }

    Ok(())
}
