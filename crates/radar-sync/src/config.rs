use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use radar_adapters::CrawlerSettings;
use serde::Deserialize;
use tokio::fs;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub database_url: String,
    pub batch_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub sources_file: PathBuf,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub web_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: &str| PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()));
        Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://data/events.db".to_string()),
            batch_dir: path("RADAR_BATCH_DIR", "./output"),
            reports_dir: path("RADAR_REPORTS_DIR", "./reports"),
            sources_file: path("RADAR_SOURCES_FILE", "./sources.yaml"),
            http_timeout_secs: lookup("RADAR_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            scheduler_enabled: lookup("RADAR_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: lookup("SYNC_CRON").unwrap_or_else(|| "0 0 6 * * *".to_string()),
            web_port: lookup("RADAR_WEB_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Per-source knobs from `sources.yaml`. Absent fields keep the crawler's own
/// settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceOverride {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub rate_limit_secs: Option<f64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_backoff_secs: Option<f64>,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for SourceOverride {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limit_secs: None,
            max_retries: None,
            retry_backoff_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SourceOverrides {
    #[serde(default)]
    pub sources: BTreeMap<String, SourceOverride>,
}

impl SourceOverrides {
    /// A missing file means no overrides.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(text) => Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let overrides: Self = serde_yaml::from_str(text)?;
        for (name, source) in &overrides.sources {
            for (field, value) in [
                ("rate_limit_secs", source.rate_limit_secs),
                ("retry_backoff_secs", source.retry_backoff_secs),
            ] {
                if let Some(v) = value {
                    if !v.is_finite() || v < 0.0 {
                        bail!("{name}.{field} must be a non-negative number of seconds, got {v}");
                    }
                }
            }
        }
        Ok(overrides)
    }

    pub fn get(&self, name: &str) -> Option<&SourceOverride> {
        self.sources.get(name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).map(|o| o.enabled).unwrap_or(true)
    }

    pub fn apply(&self, mut settings: CrawlerSettings) -> CrawlerSettings {
        let Some(source) = self.get(settings.name()) else {
            return settings;
        };
        if let Some(d) = source.rate_limit_secs.and_then(|v| Duration::try_from_secs_f64(v).ok()) {
            settings.rate_limit = d;
        }
        if let Some(n) = source.max_retries {
            settings.max_retries = n;
        }
        if let Some(d) = source
            .retry_backoff_secs
            .and_then(|v| Duration::try_from_secs_f64(v).ok())
        {
            settings.retry_backoff = d;
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_variables_are_unset() {
        let config = SyncConfig::default();
        assert_eq!(config.database_url, "sqlite://data/events.db");
        assert_eq!(config.batch_dir, PathBuf::from("./output"));
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert!(!config.scheduler_enabled);
        assert_eq!(config.sync_cron, "0 0 6 * * *");
        assert_eq!(config.web_port, 8000);
    }

    #[test]
    fn variables_override_defaults() {
        let vars: HashMap<&str, &str> = [
            ("DATABASE_URL", "sqlite:///tmp/radar.db"),
            ("RADAR_BATCH_DIR", "/tmp/batches"),
            ("RADAR_HTTP_TIMEOUT_SECS", "5"),
            ("RADAR_SCHEDULER_ENABLED", "true"),
            ("RADAR_WEB_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();
        let config = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.database_url, "sqlite:///tmp/radar.db");
        assert_eq!(config.batch_dir, PathBuf::from("/tmp/batches"));
        assert_eq!(config.http_timeout_secs, 5);
        assert!(config.scheduler_enabled);
        assert_eq!(config.web_port, 8000);
    }

    #[test]
    fn overrides_adjust_only_named_fields() {
        let overrides = SourceOverrides::from_yaml(
            "sources:\n  eventbrite:\n    rate_limit_secs: 3.5\n    max_retries: 5\n  ticketmaster:\n    enabled: false\n",
        )
        .unwrap();

        assert!(!overrides.is_enabled("ticketmaster"));
        assert!(overrides.is_enabled("eventbrite"));
        assert!(overrides.is_enabled("dice"));

        let settings = overrides.apply(
            CrawlerSettings::new("eventbrite")
                .unwrap()
                .with_rate_limit(Duration::from_secs(2)),
        );
        assert_eq!(settings.rate_limit, Duration::from_millis(3500));
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.retry_backoff, Duration::from_secs(1));
    }

    #[test]
    fn negative_intervals_are_rejected() {
        assert!(SourceOverrides::from_yaml("sources:\n  dice:\n    rate_limit_secs: -1\n").is_err());
        assert!(SourceOverrides::from_yaml("sources:\n  dice:\n    rate_limt_secs: 1\n").is_err());
        assert_eq!(SourceOverrides::from_yaml("").unwrap(), SourceOverrides::default());
    }

    #[tokio::test]
    async fn missing_sources_file_means_no_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = SourceOverrides::load(&dir.path().join("sources.yaml")).await.unwrap();
        assert!(overrides.sources.is_empty());
    }
}
