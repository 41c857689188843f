//! Durable crawl state in one SQLite database
//!
//! - `task_queue`: pending papers, leased to workers
//! - `membership_*`: the "queued" and "processed" Bloom markers
//! - `processed_papers` / `citations`: the crawled graph
//! - `crawl_counters`: progress numbers kept in step with the graph

pub mod citations;
pub mod counters;
pub mod db;
pub mod dedup;
pub mod markers;
pub mod queue;

pub use citations::CitationStore;
pub use counters::CrawlCounters;
pub use db::{Database, StoreOptions};
pub use dedup::DedupFilter;
pub use markers::{MarkerSet, PROCESSED_MARKER, QUEUED_MARKER};
pub use queue::{DEFAULT_LEASE_TIMEOUT, Lease, TaskQueue};
