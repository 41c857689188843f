//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use citecrawl_core::RetryPolicy;
use citecrawl_s2::{DEFAULT_API_ROOT, FetchLimits};
use serde::Deserialize;

/// File configuration for citecrawl
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub queue: QueueConfig,
    pub markers: MarkersConfig,
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
    /// Attempts per store transaction on write conflicts
    pub max_retries: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("citecrawl.db"),
            max_connections: 8,
            busy_timeout_secs: 5,
            max_retries: RetryPolicy::store().max_attempts,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
    /// Requests per second across all workers; 0 disables pacing
    pub requests_per_second: f64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub batch_size: usize,
    pub page_size: usize,
    pub max_references: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let limits = FetchLimits::default();
        Self {
            url: DEFAULT_API_ROOT.to_string(),
            api_key: std::env::var("S2_API_KEY").ok(),
            requests_per_second: 1.0,
            timeout_secs: 30,
            max_retries: RetryPolicy::http().max_attempts,
            batch_size: citecrawl_s2::DEFAULT_BATCH_SIZE,
            page_size: limits.page_size,
            max_references: limits.max_references,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub lease_timeout_secs: u64,
    pub retry_delay_secs: u64,
    pub max_paper_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_timeout_secs: 600,
            retry_delay_secs: 30,
            max_paper_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MarkersConfig {
    pub queued_capacity: u64,
    pub queued_fp_rate: f64,
    pub processed_capacity: u64,
    pub processed_fp_rate: f64,
}

impl Default for MarkersConfig {
    fn default() -> Self {
        let d = citecrawl_crawl::MarkerConfig::default();
        Self {
            queued_capacity: d.queued_capacity,
            queued_fp_rate: d.queued_fp_rate,
            processed_capacity: d.processed_capacity,
            processed_fp_rate: d.processed_fp_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub default: usize,
    pub max: usize,
    /// Seconds between progress reports; 0 disables them
    pub report_interval_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            default: 1,
            max: 16,
            report_interval_secs: 60,
        }
    }
}

/// API key from the file, with `${VAR}` references resolved. A key that
/// names an unset variable counts as no key.
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| expand_env_var(&value)))
}

/// Substitute every `${NAME}` in `value`. `None` if any is unset.
fn expand_env_var(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(open) = rest.find("${") {
        let Some(len) = rest[open + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(&std::env::var(&rest[open + 2..open + 2 + len]).ok()?);
        rest = &rest[open + 3 + len..];
    }
    out.push_str(rest);
    Some(out)
}

/// Config files in lookup order: working directory, then user config dir.
fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("citecrawl.toml")];
    if let Some(dirs) = directories::ProjectDirs::from("", "", "citecrawl") {
        paths.push(dirs.config_dir().join("config.toml"));
    }
    paths
}

impl Config {
    /// First existing file from `candidate_paths`, else built-in defaults.
    pub fn load() -> Result<Self> {
        match candidate_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::from_file(&path),
            None => {
                log::debug!("No citecrawl.toml found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        log::info!("Using configuration from {}", path.display());
        Ok(config)
    }

    /// Crawl settings with `workers` clamped to the configured maximum.
    pub fn crawl_config(&self, workers: Option<usize>) -> citecrawl_crawl::Config {
        let defaults = citecrawl_crawl::Config::default();
        let http = RetryPolicy::http();
        let store = RetryPolicy::store();

        let requested = workers.unwrap_or(self.workers.default).max(1);
        let max = self.workers.max.max(1);
        if requested > max {
            log::warn!("{requested} workers requested, capping at {max}");
        }

        citecrawl_crawl::Config {
            database: self.database.path.clone(),
            api: citecrawl_crawl::ApiConfig {
                root: self.api.url.clone(),
                key: self.api.api_key.clone(),
                requests_per_second: (self.api.requests_per_second > 0.0)
                    .then_some(self.api.requests_per_second),
                timeout: Duration::from_secs(self.api.timeout_secs),
                retry: RetryPolicy::new(self.api.max_retries.max(1), http.base_delay, http.max_delay),
                batch_size: self.api.batch_size.max(1),
                limits: FetchLimits {
                    page_size: self.api.page_size.max(1),
                    max_references: self.api.max_references,
                },
            },
            store: citecrawl_store::StoreOptions {
                max_connections: self.database.max_connections.max(1),
                busy_timeout: Duration::from_secs(self.database.busy_timeout_secs),
                retry: RetryPolicy::new(
                    self.database.max_retries.max(1),
                    store.base_delay,
                    store.max_delay,
                ),
                ..defaults.store
            },
            queue: citecrawl_crawl::QueueConfig {
                lease_timeout: Duration::from_secs(self.queue.lease_timeout_secs),
                retry_delay: Duration::from_secs(self.queue.retry_delay_secs),
                max_paper_attempts: self.queue.max_paper_attempts.max(1),
                ..defaults.queue
            },
            markers: citecrawl_crawl::MarkerConfig {
                queued_capacity: self.markers.queued_capacity,
                queued_fp_rate: self.markers.queued_fp_rate,
                processed_capacity: self.markers.processed_capacity,
                processed_fp_rate: self.markers.processed_fp_rate,
            },
            workers: requested.min(max),
            max_batches: None,
            report_interval: (self.workers.report_interval_secs > 0)
                .then(|| Duration::from_secs(self.workers.report_interval_secs)),
        }
    }
}
