//! `wikistat endpoints` - show the endpoint catalog and its axes

use anyhow::Result;
use comfy_table::{Cell, Color};

use crate::config::Config;

pub fn run(config: &Config) -> Result<()> {
    let catalog = config.catalog()?;
    let mut table = super::table(&["Name", "Template", "Axes", "Top-K", "TS width"]);

    for template in catalog.templates() {
        let axes = template
            .axes()
            .iter()
            .map(|spec| format!("{} ({})", spec.axis, spec.labels.len()))
            .collect::<Vec<_>>()
            .join(", ");
        let top_k = if template.is_top_k() {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(template.short_name()),
            Cell::new(template.raw()),
            Cell::new(axes),
            top_k,
            Cell::new(template.timestamp_width()),
        ]);
    }

    eprintln!("\nBase URL: {}", catalog.base_url());
    eprintln!("{table}");
    Ok(())
}
