use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use watchpost_common::payload::DEFAULT_SUBJECT;
use watchpost_common::types::{ProviderConfig, Rule};

#[derive(Debug, Clone, Deserialize)]
pub struct WatchpostConfig {
    /// JSON file holding the cooldown ledger.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// Seconds between cycles. Absent or 0 runs a single cycle.
    #[serde(default)]
    pub scan_interval_secs: Option<u64>,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Upper bound on a provider's `initialize()`; unbounded when absent.
    #[serde(default)]
    pub provider_init_timeout_secs: Option<u64>,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default)]
    pub observer: ObserverConfig,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Which [`watchpost_alert::observer::Observer`] backs the scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObserverConfig {
    /// Plain HTTP GET; the selector is counted as a literal marker.
    #[default]
    Http,
    /// External extractor invoked as `command... <url> <selector>`.
    Command { command: Vec<String> },
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/cooldowns.json")
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_subject() -> String {
    DEFAULT_SUBJECT.to_string()
}

impl WatchpostConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{path}': {e}"))?;
        Self::parse(&content).map_err(|e| anyhow::anyhow!("Invalid config file '{path}': {e:#}"))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        if let ObserverConfig::Command { command } = &config.observer {
            if command.is_empty() {
                anyhow::bail!("observer command must name a program");
            }
        }
        if config.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be greater than 0");
        }
        Ok(config)
    }

    /// `Some` when the process should keep scanning on an interval.
    pub fn scan_interval(&self) -> Option<Duration> {
        self.scan_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn provider_init_timeout(&self) -> Option<Duration> {
        self.provider_init_timeout_secs.map(Duration::from_secs)
    }
}
