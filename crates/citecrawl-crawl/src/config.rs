//! Crawl configuration (plain values; file parsing lives in the CLI)

use std::path::PathBuf;
use std::time::Duration;

use citecrawl_core::{BloomParams, RetryPolicy};
use citecrawl_s2::{DEFAULT_API_ROOT, DEFAULT_BATCH_SIZE, FetchLimits};
use citecrawl_store::{DEFAULT_LEASE_TIMEOUT, StoreOptions};

/// Upstream API settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub root: String,
    /// Optional; only raises the rate limit upstream grants.
    pub key: Option<String>,
    /// Self-imposed pacing across all workers. `None` disables it.
    pub requests_per_second: Option<f64>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Papers per `POST /paper/batch` (and per queue pop).
    pub batch_size: usize,
    pub limits: FetchLimits,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_API_ROOT.to_string(),
            key: None,
            requests_per_second: Some(1.0),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::http(),
            batch_size: DEFAULT_BATCH_SIZE,
            limits: FetchLimits::default(),
        }
    }
}

/// Delivery and per-paper retry policy.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a popped entry stays invisible before redelivery.
    pub lease_timeout: Duration,
    /// Delay before a failed paper becomes visible again.
    pub retry_delay: Duration,
    /// Deliveries before a paper is abandoned.
    pub max_paper_attempts: u32,
    /// Sleep while the queue only holds leased or delayed entries.
    pub idle_poll: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            retry_delay: Duration::from_secs(30),
            max_paper_attempts: 3,
            idle_poll: Duration::from_secs(1),
        }
    }
}

/// Marker sizing. Only applied when a marker is first created.
#[derive(Debug, Clone)]
pub struct MarkerConfig {
    pub queued_capacity: u64,
    pub queued_fp_rate: f64,
    pub processed_capacity: u64,
    pub processed_fp_rate: f64,
}

impl MarkerConfig {
    pub fn queued(&self) -> BloomParams {
        BloomParams::for_capacity(self.queued_capacity, self.queued_fp_rate)
    }

    pub fn processed(&self) -> BloomParams {
        BloomParams::for_capacity(self.processed_capacity, self.processed_fp_rate)
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            queued_capacity: 100_000_000,
            queued_fp_rate: 1e-5,
            processed_capacity: 100_000_000,
            processed_fp_rate: 1e-6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: PathBuf,
    pub api: ApiConfig,
    pub store: StoreOptions,
    pub queue: QueueConfig,
    pub markers: MarkerConfig,
    pub workers: usize,
    /// Stop after this many batches (across all workers).
    pub max_batches: Option<u64>,
    /// Interval of the background progress report; `None` disables it.
    pub report_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("citecrawl.db"),
            api: ApiConfig::default(),
            store: StoreOptions::default(),
            queue: QueueConfig::default(),
            markers: MarkerConfig::default(),
            workers: 1,
            max_batches: None,
            report_interval: Some(Duration::from_secs(60)),
        }
    }
}
