//! Tagtrace CLI - maintenance front end for the tag traceability store
//!
//! Every command prints JSON, one record per line, for downstream tools.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tagtrace::config::{self, StoreConfig};
use tagtrace::{NewTag, TagCategory, TagQuery, TagStore};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "tagtrace")]
#[command(version)]
#[command(about = "Tag traceability store - persist and query requirement/design/task/test tags")]
#[command(long_about = r#"
Tagtrace keeps traceability tags and the reference chains between them in a
single SQLite file.

Example usage:
  tagtrace init
  tagtrace import --file tags.jsonl
  tagtrace search --category REQ --file-pattern "*login*"
  tagtrace link 12 40 --type verifies
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create tables, indexes and triggers
    Init {
        /// Skip the catalog indexes
        #[arg(long)]
        no_indexes: bool,
    },

    /// Bulk insert scanner output (JSON lines of tag records)
    Import {
        /// Input file, `-` for stdin
        #[arg(short, long, default_value = "-")]
        file: PathBuf,
    },

    /// Show one tag and its outgoing references
    Get {
        id: i64,
    },

    /// Search tags; filters are combined with AND
    Search {
        /// Tag category code, e.g. REQ
        #[arg(short = 'k', long)]
        category: Option<String>,

        /// File path pattern, `*` matches anything
        #[arg(short, long)]
        file_pattern: Option<String>,

        /// Inclusive line range, START:END
        #[arg(short, long)]
        lines: Option<String>,
    },

    /// Link two tags
    Link {
        source: i64,
        target: i64,

        /// Reference type
        #[arg(short = 't', long = "type")]
        reference_type: Option<String>,
    },

    /// Delete a tag and every reference touching it
    Delete {
        id: i64,
    },

    /// Print the table, index and trigger catalog
    Schema,

    /// Show tag and reference counts
    Stats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let store_config = resolve_config(cli.config.as_deref(), cli.database)?;
    config::ensure_db_dir(&store_config.database)?;
    tracing::debug!(database = %store_config.database.display(), "using database");

    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Init { no_indexes } => {
            let store = TagStore::new(store_config);
            store.schema().initialize(!no_indexes)?;
            tracing::info!("initialized {}", store.connections().path().display());
            emit(&mut out, &store.schema().get_indexes()?)?;
        }

        Commands::Import { file } => {
            let store = TagStore::open(store_config)?;
            let tags = read_tags(&file)?;
            let written = store.batch_insert(|batch| {
                for tag in tags {
                    batch.push(tag);
                }
                Ok(())
            })?;
            tracing::info!("imported {} tags", written);
            emit(&mut out, &serde_json::json!({ "imported": written }))?;
        }

        Commands::Get { id } => {
            let store = TagStore::open(store_config)?;
            let tag = store
                .get_tag_by_id(id)?
                .with_context(|| format!("no tag with id {}", id))?;
            let references = store.get_references_by_source(id)?;
            emit(&mut out, &serde_json::json!({ "tag": tag, "references": references }))?;
        }

        Commands::Search { category, file_pattern, lines } => {
            let store = TagStore::open(store_config)?;
            let mut query = TagQuery::new();
            if let Some(category) = category {
                query = query.category(category.parse::<TagCategory>()?);
            }
            if let Some(pattern) = file_pattern {
                query = query.file_pattern(pattern);
            }
            if let Some(lines) = lines {
                let (start, end) = parse_line_range(&lines)?;
                query = query.line_range(start, end);
            }
            for tag in store.complex_search(&query)? {
                emit(&mut out, &tag)?;
            }
        }

        Commands::Link { source, target, reference_type } => {
            let store = TagStore::open(store_config)?;
            let id = store.create_reference(source, target, reference_type.as_deref())?;
            emit(&mut out, &serde_json::json!({ "reference_id": id }))?;
        }

        Commands::Delete { id } => {
            let store = TagStore::open(store_config)?;
            let deleted = store.delete_tag(id)?;
            emit(&mut out, &serde_json::json!({ "deleted": deleted }))?;
        }

        Commands::Schema => {
            let store = TagStore::open(store_config)?;
            let schema = store.schema();
            emit(
                &mut out,
                &serde_json::json!({
                    "tables": schema.get_schema()?,
                    "indexes": schema.get_indexes()?,
                    "triggers": schema.get_triggers()?,
                }),
            )?;
        }

        Commands::Stats => {
            let store = TagStore::open(store_config)?;
            let stats = store.stats()?;
            tracing::info!("\n{}", stats);
            emit(&mut out, &stats)?;
        }
    }

    Ok(())
}

/// Config file values, with `--database` taking precedence
fn resolve_config(path: Option<&Path>, database: Option<PathBuf>) -> anyhow::Result<StoreConfig> {
    let mut store_config = config::load_config(path)?.unwrap_or_default();
    if let Some(database) = database {
        store_config.database = database;
    }
    Ok(store_config)
}

fn read_tags(path: &Path) -> anyhow::Result<Vec<NewTag>> {
    let reader: Box<dyn BufRead> = if path == Path::new("-") {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut tags = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let tag: NewTag = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid tag record", index + 1))?;
        tags.push(tag);
    }
    Ok(tags)
}

fn parse_line_range(text: &str) -> anyhow::Result<(u32, u32)> {
    let (start, end) = text
        .split_once(':')
        .with_context(|| format!("expected START:END, got '{}'", text))?;
    Ok((start.trim().parse()?, end.trim().parse()?))
}

fn emit<T: Serialize>(out: &mut impl Write, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
