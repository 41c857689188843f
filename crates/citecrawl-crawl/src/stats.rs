//! Batch statistics and the end-of-run summary

use std::time::Duration;

use citecrawl_core::fmt_num;
use citecrawl_store::CrawlCounters;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

/// What happened to one popped batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub leased: usize,
    /// Papers marked processed in this batch.
    pub processed: usize,
    /// Already processed by someone else; acked without fetching.
    pub skipped: usize,
    /// Failed transiently and put back on the queue.
    pub requeued: usize,
    /// Dropped after a permanent failure or too many attempts.
    pub abandoned: usize,
    /// Handed back untouched because of shutdown.
    pub returned: usize,
    /// Lease expired before renewal and another worker took the paper.
    pub lost: usize,
    pub references_seen: usize,
    pub edges_stored: u64,
    pub enqueued: usize,
    /// Extra reference pages fetched for papers with long lists.
    pub overflow_pages: usize,
    pub elapsed: Duration,
}

impl BatchStats {
    pub fn merge(&mut self, other: &BatchStats) {
        self.leased += other.leased;
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.requeued += other.requeued;
        self.abandoned += other.abandoned;
        self.returned += other.returned;
        self.lost += other.lost;
        self.references_seen += other.references_seen;
        self.edges_stored += other.edges_stored;
        self.enqueued += other.enqueued;
        self.overflow_pages += other.overflow_pages;
        self.elapsed += other.elapsed;
    }

    /// One line per batch.
    pub fn log(&self, batch_no: u64, queue_len: Option<u64>) {
        log::info!(
            "Batch {batch_no}: processed={} skipped={} requeued={} abandoned={} new_edges={} enqueued={} queue={} [{:.2}s]",
            self.processed,
            self.skipped,
            self.requeued,
            self.abandoned,
            self.edges_stored,
            self.enqueued,
            queue_len.map_or("?".to_string(), fmt_num),
            self.elapsed.as_secs_f64()
        );
    }
}

/// Totals for one crawl session, plus the durable counters at the end.
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub batches: u64,
    pub totals: BatchStats,
    pub wall_time: Duration,
    pub counters: CrawlCounters,
    pub queue_len: u64,
    pub interrupted: bool,
}

impl CrawlSummary {
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Crawl session")
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
            ]);

        let t = &self.totals;
        table.add_row(vec![
            Cell::new("Batches"),
            Cell::new(fmt_num(self.batches)),
        ]);
        table.add_row(vec![
            Cell::new("Papers processed").fg(Color::Green),
            Cell::new(fmt_num(t.processed as u64)).fg(Color::Green),
        ]);
        table.add_row(vec![
            Cell::new("Already processed"),
            Cell::new(fmt_num(t.skipped as u64)),
        ]);
        table.add_row(vec![
            Cell::new("Requeued"),
            Cell::new(fmt_num(t.requeued as u64)),
        ]);
        if t.lost > 0 {
            table.add_row(vec![
                Cell::new("Leases lost").fg(Color::Yellow),
                Cell::new(fmt_num(t.lost as u64)).fg(Color::Yellow),
            ]);
        }
        let abandoned = Cell::new(fmt_num(t.abandoned as u64));
        table.add_row(vec![
            Cell::new("Abandoned"),
            if t.abandoned > 0 {
                abandoned.fg(Color::Red)
            } else {
                abandoned
            },
        ]);
        table.add_row(vec![
            Cell::new("References seen"),
            Cell::new(fmt_num(t.references_seen as u64)),
        ]);
        table.add_row(vec![
            Cell::new("New edges"),
            Cell::new(fmt_num(t.edges_stored)),
        ]);
        table.add_row(vec![
            Cell::new("Enqueued"),
            Cell::new(fmt_num(t.enqueued as u64)),
        ]);
        table.add_row(vec![
            Cell::new("Overflow pages"),
            Cell::new(fmt_num(t.overflow_pages as u64)),
        ]);
        table.add_row(vec![
            Cell::new("Queue remaining"),
            Cell::new(fmt_num(self.queue_len)),
        ]);
        table.add_row(vec![
            Cell::new("Total processed (all sessions)"),
            Cell::new(fmt_num(self.counters.processed_papers)),
        ]);
        table.add_row(vec![
            Cell::new("Total edges (all sessions)"),
            Cell::new(fmt_num(self.counters.citation_edges)),
        ]);
        table.add_row(vec![
            Cell::new("Wall time"),
            Cell::new(format!("{:.1}s", self.wall_time.as_secs_f64())),
        ]);

        format!("\n{table}")
    }

    pub fn print(&self) {
        eprintln!("{}", self.format_table());
    }

    /// Minimal summary (non-TTY mode).
    pub fn log(&self) {
        log::info!(
            "Crawl {}: {} papers, {} new edges, {} enqueued, {} abandoned in {} batches; queue={} [{:.1}s]",
            if self.interrupted { "interrupted" } else { "finished" },
            fmt_num(self.totals.processed as u64),
            fmt_num(self.totals.edges_stored),
            fmt_num(self.totals.enqueued as u64),
            self.totals.abandoned,
            self.batches,
            fmt_num(self.queue_len),
            self.wall_time.as_secs_f64()
        );
    }
}
