//! `wikistat source` - manage the scraped record source

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use wikistat_core::{fmt_num, record_marker, short_hash};
use wikistat_merge::{KvStore, RecordSource};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Record source (SQLite database)
    #[arg(short, long, global = true)]
    pub source: Option<PathBuf>,

    #[command(subcommand)]
    pub action: SourceAction,
}

#[derive(Subcommand, Debug)]
pub enum SourceAction {
    /// Load `{"key": ..., "value": ...}` JSON lines ("-" reads stdin)
    Import {
        file: PathBuf,
    },
    /// List keys with their idempotence markers
    Ls {
        /// Only keys starting with this prefix
        #[arg(long, default_value = "")]
        prefix: String,

        /// Stop after this many keys
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Delete keys
    Rm {
        /// Only keys starting with this prefix
        #[arg(long, default_value = "")]
        prefix: String,

        /// Actually delete (otherwise dry-run)
        #[arg(long)]
        confirm: bool,
    },
}

pub fn run(args: SourceArgs, config: &Config) -> Result<()> {
    let path = args.source.unwrap_or_else(|| config.source.path.clone());
    match args.action {
        SourceAction::Import { file } => import(&path, &file),
        SourceAction::Ls { prefix, limit } => list(&path, &prefix, limit),
        SourceAction::Rm { prefix, confirm } => remove(&path, &prefix, confirm),
    }
}

fn import(path: &Path, file: &Path) -> Result<()> {
    let store = KvStore::open(path)?;
    let stats = if file == Path::new("-") {
        store.import_jsonl(io::stdin().lock())?
    } else {
        let input =
            File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
        store.import_jsonl(BufReader::new(input))?
    };
    eprintln!(
        "Imported {} records into {} ({} replaced)",
        fmt_num(stats.imported),
        path.display(),
        fmt_num(stats.replaced)
    );
    Ok(())
}

fn list(path: &Path, prefix: &str, limit: Option<usize>) -> Result<()> {
    let store = KvStore::open_existing(path)?;
    let keys = store.keys_with_prefix(prefix.as_bytes())?;
    let shown = limit.unwrap_or(keys.len()).min(keys.len());

    let mut out = io::stdout().lock();
    for key in &keys[..shown] {
        let marker = record_marker(key);
        writeln!(out, "{}  {}", short_hash(&marker), String::from_utf8_lossy(key))?;
    }
    eprintln!("{} of {} keys", fmt_num(shown), fmt_num(keys.len()));
    Ok(())
}

fn remove(path: &Path, prefix: &str, confirm: bool) -> Result<()> {
    let store = KvStore::open_existing(path)?;
    if !confirm {
        let count = store.count_prefix(prefix.as_bytes())?;
        if count == 0 {
            eprintln!("No keys match.");
        } else {
            eprintln!("Would remove {} keys under {prefix:?}.", fmt_num(count));
            eprintln!("Run with --confirm to actually delete.");
        }
        return Ok(());
    }
    let removed = store.delete_prefix(prefix.as_bytes())?;
    eprintln!("Removed {} keys.", fmt_num(removed));
    Ok(())
}
