//! Crawl progress counters
//!
//! One row, updated inside the same transactions that record processed
//! papers and new edges, so the numbers always match the tables.

use chrono::{DateTime, Utc};
use citecrawl_core::PersistenceError;

use crate::db::Database;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlCounters {
    pub processed_papers: u64,
    pub citation_edges: u64,
    /// Set by the last fresh start.
    pub started_at: Option<DateTime<Utc>>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_edge_at: Option<DateTime<Utc>>,
}

type CounterRow = (i64, i64, Option<i64>, Option<i64>, Option<i64>);

impl CrawlCounters {
    pub fn load(db: &Database) -> Result<Self, PersistenceError> {
        let pool = db.pool();
        let row: Option<CounterRow> = db.with_retry("load counters", || async move {
            sqlx::query_as(
                "SELECT processed_papers, citation_edges, started_at, last_processed_at, last_edge_at
                 FROM crawl_counters WHERE id = 1",
            )
            .fetch_optional(pool)
            .await
        })?;
        Ok(row.map(Self::from_row).unwrap_or_default())
    }

    fn from_row((processed, edges, started, last_paper, last_edge): CounterRow) -> Self {
        Self {
            processed_papers: processed.max(0) as u64,
            citation_edges: edges.max(0) as u64,
            started_at: started.and_then(DateTime::from_timestamp_millis),
            last_processed_at: last_paper.and_then(DateTime::from_timestamp_millis),
            last_edge_at: last_edge.and_then(DateTime::from_timestamp_millis),
        }
    }

    /// Most recent write of either kind.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_processed_at.max(self.last_edge_at)
    }

    /// Papers per minute between `started_at` and the last processed paper.
    pub fn papers_per_minute(&self) -> Option<f64> {
        let start = self.started_at?;
        let end = self.last_processed_at?;
        let secs = (end - start).num_milliseconds() as f64 / 1000.0;
        (secs > 0.0).then(|| self.processed_papers as f64 * 60.0 / secs)
    }
}
