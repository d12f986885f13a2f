//! Configuration loading from TOML files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use wikistat_catalog::{AxisRegistry, BASE_URL, Catalog, DEFAULT_TEMPLATES};
use wikistat_store::TimeRange;

/// Global configuration for wikistat
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub output: OutputConfig,
    pub time: TimeConfig,
    pub merge: MergeConfig,
    /// Label set overrides keyed by placeholder (`editor-type = [...]`)
    pub registry: BTreeMap<String, Vec<String>>,
    /// Timestamp padding width keyed by endpoint short name
    pub timestamp_width: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub base_url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./records.db"),
            base_url: BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub compression_level: i32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
            compression_level: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Default for TimeConfig {
    fn default() -> Self {
        let range = TimeRange::default();
        Self {
            start: range.start,
            end: range.end,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub checkpoint_every: usize,
    pub workers: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        let defaults = wikistat_merge::Config::default();
        Self {
            checkpoint_every: defaults.checkpoint_every,
            workers: defaults.workers,
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./wikistat.toml (current directory)
    /// 2. ~/.config/wikistat/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("wikistat.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "wikistat") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Axis registry with the `[registry]` overrides applied.
    pub fn registry(&self) -> Result<AxisRegistry> {
        AxisRegistry::wikimedia()
            .with_overrides(&self.registry)
            .context("Invalid [registry] section")
    }

    /// Endpoint catalog built from the registry and `[timestamp_width]`.
    pub fn catalog(&self) -> Result<Catalog> {
        let registry = self.registry()?;
        let catalog = Catalog::new(&self.source.base_url, DEFAULT_TEMPLATES, &registry)
            .context("Invalid endpoint catalog")?;
        catalog
            .with_timestamp_widths(&self.timestamp_width)
            .context("Invalid [timestamp_width] section")
    }

    pub fn time_range(&self) -> Result<TimeRange> {
        TimeRange::new(self.time.start, self.time.end).context("Invalid [time] section")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.output.dir, PathBuf::from("./data"));
        assert_eq!(config.output.compression_level, 3);
        assert_eq!(config.source.base_url, BASE_URL);
        assert_eq!(config.merge.checkpoint_every, 300);
        assert!(config.merge.workers >= 1);
        assert_eq!(config.time_range().unwrap(), TimeRange::default());
        assert_eq!(config.catalog().unwrap().templates().len(), 10);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[source]
path = "/srv/scrape/records.db"

[output]
dir = "/tmp/data"
compression_level = 5

[time]
start = "2017-01-01"
end = "2017-12-31"

[merge]
checkpoint_every = 50
workers = 2

[registry]
activity-level = ["1..4-edits", "5..24-edits", "25..99-edits", "100..-edits"]

[timestamp_width]
edits = 12
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.source.path, PathBuf::from("/srv/scrape/records.db"));
        assert_eq!(config.source.base_url, BASE_URL);
        assert_eq!(config.output.dir, PathBuf::from("/tmp/data"));
        assert_eq!(config.output.compression_level, 5);
        assert_eq!(config.time_range().unwrap().days(), 365);
        assert_eq!(config.merge.checkpoint_every, 50);
        assert_eq!(config.merge.workers, 2);

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.by_name("edits").unwrap().timestamp_width(), 12);
        assert_eq!(catalog.by_name("editors").unwrap().timestamp_width(), 10);
    }

    #[test]
    fn unknown_registry_placeholder_is_rejected() {
        let config: Config = toml::from_str("[registry]\nflavor = [\"vanilla\"]\n").unwrap();
        assert!(config.catalog().is_err());
    }

    #[test]
    fn reversed_time_range_is_rejected() {
        let config: Config =
            toml::from_str("[time]\nstart = \"2018-01-02\"\nend = \"2018-01-01\"\n").unwrap();
        assert!(config.time_range().is_err());
    }
}
