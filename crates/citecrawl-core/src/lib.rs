//! Citecrawl Core - shared building blocks for the citation crawler
//!
//! Record types, the error taxonomy, retry policy, Bloom geometry and the
//! logging/progress/shutdown plumbing used by every other crate.

pub mod bloom;
pub mod error;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod types;

// Re-exports for convenience
pub use bloom::BloomParams;
pub use error::{CrawlError, PersistenceError, QueueError, UpstreamError};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use retry::RetryPolicy;
pub use shutdown::{StopSignal, shutdown_flag};
pub use types::{CitationEdge, PaperId, ProcessedPaper, TaskRecord};
