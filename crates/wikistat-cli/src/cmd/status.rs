//! `wikistat status` - summarize published snapshots

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color};

use wikistat_core::fmt_num;
use wikistat_store::{list_snapshots, open};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Snapshot directory (default: [output] dir)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let dir = args.dir.unwrap_or_else(|| config.output.dir.clone());
    let paths = list_snapshots(&dir)?;
    if paths.is_empty() {
        eprintln!("No snapshots in {}.", dir.display());
        return Ok(());
    }

    let mut table = super::table(&[
        "Snapshot",
        "Variables",
        "Shape",
        "Filled",
        "Processed",
        "Last merged",
        "Done",
    ]);

    let mut unreadable = 0;
    for path in &paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ds = match open(path) {
            Ok(ds) => ds,
            Err(e) => {
                log::warn!("{}: {e}", path.display());
                unreadable += 1;
                table.add_row(vec![Cell::new(name), Cell::new("unreadable").fg(Color::Red)]);
                continue;
            }
        };
        let shape = ds
            .shape()
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join("×");
        let filled: usize = ds.variables().map(|(_, v)| v.filled()).sum();
        let done = ds.attrs().keys().filter(|k| k.starts_with("done-")).count();
        let done_cell = if done > 0 {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::Yellow)
        };
        table.add_row(vec![
            Cell::new(name),
            Cell::new(ds.variables().count()),
            Cell::new(shape),
            Cell::new(fmt_num(filled)),
            Cell::new(fmt_num(ds.processed().len())),
            Cell::new(ds.processed().last_merged_at().unwrap_or("-")),
            done_cell,
        ]);
    }

    eprintln!("\n{table}");
    eprintln!("{} snapshots in {}", paths.len(), dir.display());
    if unreadable > 0 {
        anyhow::bail!("{unreadable} snapshot(s) could not be read");
    }
    Ok(())
}
