//! Citecrawl Crawl - the crawl orchestrator
//!
//! Pops leased batches from the durable queue, fetches metadata and full
//! reference lists, queues newly discovered papers and records citation
//! edges. Any number of workers (threads here, or other processes on the
//! same database) can drain the queue concurrently.

pub mod config;
pub mod context;
pub mod reporter;
pub mod runner;
pub mod stats;
pub mod worker;

// Re-exports
pub use config::{ApiConfig, Config, MarkerConfig, QueueConfig};
pub use context::CrawlContext;
pub use reporter::Reporter;
pub use runner::{StartMode, drain, prepare, run};
pub use stats::{BatchStats, CrawlSummary};
pub use worker::process_batch;
