//! wikistat - merge scraped Wikimedia metrics into labeled array stores
//!
//! Reads (request URL, response body) records from a local ordered store and
//! folds them, idempotently, into one Parquet-backed array per endpoint and
//! project.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use comfy_table::Cell;

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "wikistat")]
#[command(about = "Merge scraped Wikimedia metrics into labeled array stores")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./wikistat.toml or ~/.config/wikistat/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Merge records into array stores
    Merge(cmd::merge::MergeArgs),
    /// Import, list and delete scraped records
    Source(cmd::source::SourceArgs),
    /// Show the endpoint catalog
    Endpoints,
    /// Summarize published snapshots
    Status(cmd::status::StatusArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(wikistat_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, progress bars show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    wikistat_core::init_logging(quiet, cli.debug, multi);

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Merge(args) => {
            wikistat_core::install_signal_handlers()?;
            cmd::merge::run(args, &config, &progress)
        }
        Command::Source(args) => cmd::source::run(args, &config),
        Command::Endpoints => cmd::endpoints::run(&config),
        Command::Status(args) => cmd::status::run(args, &config),
        Command::Config => {
            let mut table = cmd::table(&["Setting", "Value"]);

            table.add_row(vec!["Record source", &config.source.path.display().to_string()]);
            table.add_row(vec!["Base URL", &config.source.base_url]);
            table.add_row(vec!["Output directory", &config.output.dir.display().to_string()]);
            table.add_row(vec![
                "Compression level",
                &config.output.compression_level.to_string(),
            ]);
            table.add_row(vec![
                "Time axis",
                &format!("{} .. {}", config.time.start, config.time.end),
            ]);
            table.add_row(vec![
                "Checkpoint every",
                &format!("{} records", config.merge.checkpoint_every),
            ]);
            table.add_row(vec!["Workers", &config.merge.workers.to_string()]);
            for spec in config.registry()?.iter() {
                table.add_row(vec![
                    Cell::new(format!("Axis {}", spec.axis)),
                    Cell::new(spec.labels.join(", ")),
                ]);
            }
            for (name, width) in &config.timestamp_width {
                table.add_row(vec![
                    format!("Timestamp width ({name})"),
                    width.to_string(),
                ]);
            }

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
