//! Processing of one leased batch
//!
//! Per paper: `Queued -> InFlight` happens at pop. Success runs
//! fetch -> dedup -> push -> edges -> mark processed -> ack and ends in
//! `Processed`. A retryable failure releases the lease (`InFlight -> Queued`)
//! until the attempt budget runs out; anything else abandons the paper
//! unprocessed.
//!
//! A batch's leases are renewed while its papers are worked through, so a
//! slow but live worker keeps them. Only a worker that stops renewing (it
//! crashed) has its papers redelivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use citecrawl_core::{CitationEdge, CrawlError, PaperId, ProcessedPaper, TaskRecord};
use citecrawl_s2::{PaperMetadata, fetch_batch};
use citecrawl_store::Lease;
use indicatif::ProgressBar;
use rustc_hash::FxHashSet;

use crate::context::CrawlContext;
use crate::stats::BatchStats;

/// Counts from one successfully crawled paper.
#[derive(Debug, Default)]
struct PaperOutcome {
    /// The lease named an alias of a paper that was already processed.
    already_processed: bool,
    references: usize,
    edges_stored: u64,
    enqueued: usize,
    overflow_pages: usize,
}

/// Renews the unsettled leases of a batch once half a lease timeout has
/// passed since the previous renewal.
struct Heartbeat {
    every: Duration,
    last: Instant,
    /// Leases found re-leased by someone else; never settled by this worker.
    lost: FxHashSet<i64>,
}

impl Heartbeat {
    fn new(lease_timeout: Duration) -> Self {
        Self {
            every: lease_timeout / 2,
            last: Instant::now(),
            lost: FxHashSet::default(),
        }
    }

    fn beat(&mut self, ctx: &CrawlContext, unsettled: &[Lease]) {
        if self.last.elapsed() < self.every {
            return;
        }
        match ctx.queue.extend(unsettled) {
            Ok(held) => {
                self.last = Instant::now();
                for lease in unsettled {
                    if !held.contains(&lease.seq) && self.lost.insert(lease.seq) {
                        log::warn!(
                            "{}: lease expired before renewal, leaving it to its new holder",
                            lease.paper_id()
                        );
                    }
                }
            }
            // Try again at the next beat; the lease may still be alive
            Err(e) => log::warn!("Lease renewal failed: {e}"),
        }
    }

    fn is_lost(&self, lease: &Lease) -> bool {
        self.lost.contains(&lease.seq)
    }
}

/// Work through `leases`. Never fails as a whole: every lease ends acked,
/// released, or (if even that fails) left to expire.
pub fn process_batch(
    ctx: &CrawlContext,
    leases: Vec<Lease>,
    stop: &AtomicBool,
    pb: &ProgressBar,
) -> BatchStats {
    let start = Instant::now();
    let mut stats = BatchStats {
        leased: leases.len(),
        ..Default::default()
    };

    let ids: Vec<PaperId> = leases.iter().map(|l| l.paper_id().clone()).collect();
    let pending: FxHashSet<PaperId> = match ctx.dedup.filter_unprocessed(&ids) {
        Ok(pending) => pending.into_iter().collect(),
        Err(e) => {
            let err = CrawlError::from(e);
            for lease in &leases {
                settle(ctx, lease, Err(err.clone()), &mut stats);
            }
            stats.elapsed = start.elapsed();
            return stats;
        }
    };

    let (todo, done): (Vec<Lease>, Vec<Lease>) = leases
        .into_iter()
        .partition(|l| pending.contains(l.paper_id()));
    for lease in &done {
        log::debug!("{} already processed, dropping task", lease.paper_id());
        if let Err(e) = ctx.queue.ack(lease) {
            log::warn!("{}: ack failed: {e}", lease.paper_id());
        }
        stats.skipped += 1;
    }

    if !todo.is_empty() && !stop.load(Ordering::Relaxed) {
        let mut heartbeat = Heartbeat::new(ctx.config.queue.lease_timeout);
        pb.set_message(format!("fetching metadata for {} papers", todo.len()));
        let metadata = fetch_metadata(ctx, &todo, &mut heartbeat);

        for (i, meta) in metadata.into_iter().enumerate() {
            let lease = &todo[i];
            if stop.load(Ordering::Relaxed) {
                return_unstarted(ctx, lease, &mut stats);
                continue;
            }
            heartbeat.beat(ctx, &todo[i..]);
            if heartbeat.is_lost(lease) {
                stats.lost += 1;
                continue;
            }
            pb.set_message(format!("{}", lease.paper_id()));
            let result = meta.and_then(|m| crawl_paper(ctx, &todo[i..], &m, &mut heartbeat));
            settle(ctx, lease, result, &mut stats);
        }
    } else {
        for lease in &todo {
            return_unstarted(ctx, lease, &mut stats);
        }
    }

    stats.elapsed = start.elapsed();
    stats
}

/// Metadata for each lease, positionally. A batch that fails permanently is
/// retried one id at a time so a single bad id only fails itself.
fn fetch_metadata(
    ctx: &CrawlContext,
    leases: &[Lease],
    heartbeat: &mut Heartbeat,
) -> Vec<Result<PaperMetadata, CrawlError>> {
    let ids: Vec<PaperId> = leases.iter().map(|l| l.paper_id().clone()).collect();
    let mut out = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(ctx.config.api.batch_size.max(1)) {
        match fetch_batch(&ctx.requester, chunk) {
            Ok(found) => out.extend(positional(chunk, found)),
            Err(e) if !e.is_retryable() && chunk.len() > 1 => {
                log::warn!(
                    "Batch of {} failed permanently ({e}), retrying one by one",
                    chunk.len()
                );
                for id in chunk {
                    heartbeat.beat(ctx, &leases[out.len()..]);
                    let single = std::slice::from_ref(id);
                    match fetch_batch(&ctx.requester, single) {
                        Ok(found) => out.extend(positional(single, found)),
                        Err(e) => out.push(Err(e.into())),
                    }
                }
            }
            Err(e) => out.extend(chunk.iter().map(|_| Err(CrawlError::from(e.clone())))),
        }
    }
    out
}

fn positional(
    ids: &[PaperId],
    found: Vec<Option<PaperMetadata>>,
) -> impl Iterator<Item = Result<PaperMetadata, CrawlError>> + '_ {
    ids.iter()
        .zip(found)
        .map(|(id, meta)| meta.ok_or_else(|| CrawlError::NotFound(id.clone())))
}

/// Full reference list, new-id push, edges and the processed checkpoint for
/// one paper. `unsettled` starts with the paper's own lease.
///
/// Everything is keyed by the canonical id upstream reports, so a paper
/// seeded by DOI and later cited by its Semantic Scholar id is one paper.
fn crawl_paper(
    ctx: &CrawlContext,
    unsettled: &[Lease],
    meta: &PaperMetadata,
    heartbeat: &mut Heartbeat,
) -> Result<PaperOutcome, CrawlError> {
    let paper_id = &meta.paper_id;
    let mut outcome = PaperOutcome::default();

    if meta.is_alias() {
        log::debug!("{} resolves to {paper_id}", meta.requested);
        if ctx
            .dedup
            .filter_unprocessed(std::slice::from_ref(paper_id))?
            .is_empty()
        {
            outcome.already_processed = true;
            return Ok(outcome);
        }
    }

    let mut references = meta.references.clone();
    if meta.has_overflow() {
        let mut pages =
            ctx.fetcher
                .references_from(paper_id, meta.embedded_len, meta.references.iter().cloned());
        for id in pages.by_ref() {
            references.push(id?);
            heartbeat.beat(ctx, unsettled);
        }
        outcome.overflow_pages = pages.pages_fetched();
        log::debug!(
            "{paper_id}: {} references ({} embedded, {} pages)",
            references.len(),
            meta.references.len(),
            outcome.overflow_pages
        );
    }
    outcome.references = references.len();

    let new_ids = ctx.dedup.filter_new(&references)?;
    if !new_ids.is_empty() {
        let tasks: Vec<TaskRecord> = new_ids
            .iter()
            .map(|id| TaskRecord::discovered(id.clone(), paper_id))
            .collect();
        outcome.enqueued = ctx.queue.push(&tasks)?.len();
    }

    let edges: Vec<CitationEdge> = references
        .iter()
        .map(|cited| CitationEdge::new(paper_id.clone(), cited.clone()))
        .collect();
    outcome.edges_stored = ctx.store.insert_edges(&edges)?;

    let paper = ProcessedPaper::new(paper_id.clone(), meta.fields_of_study.iter().cloned());
    ctx.store.mark_processed(&paper)?;
    Ok(outcome)
}

/// Ack, release or abandon `lease` according to `result`.
fn settle(
    ctx: &CrawlContext,
    lease: &Lease,
    result: Result<PaperOutcome, CrawlError>,
    stats: &mut BatchStats,
) {
    let paper_id = lease.paper_id();
    match result {
        Ok(outcome) if outcome.already_processed => {
            log::debug!("{paper_id}: alias of a processed paper, dropping task");
            stats.skipped += 1;
            if let Err(e) = ctx.queue.ack(lease) {
                log::warn!("{paper_id}: ack failed: {e}");
            }
        }
        Ok(outcome) => {
            stats.processed += 1;
            stats.references_seen += outcome.references;
            stats.edges_stored += outcome.edges_stored;
            stats.enqueued += outcome.enqueued;
            stats.overflow_pages += outcome.overflow_pages;
            if let Err(e) = ctx.queue.ack(lease) {
                // Processed already; a redelivery will be skipped
                log::warn!("{paper_id}: ack failed: {e}");
            }
        }
        Err(e) if e.is_retryable() && lease.attempts < ctx.config.queue.max_paper_attempts => {
            log::warn!(
                "{paper_id}: attempt {}/{} failed, requeueing: {e}",
                lease.attempts,
                ctx.config.queue.max_paper_attempts
            );
            stats.requeued += 1;
            if let Err(qe) = ctx.queue.release(lease, ctx.config.queue.retry_delay) {
                log::warn!("{paper_id}: release failed, lease will expire: {qe}");
            }
        }
        Err(e) => {
            let failure = match e {
                e @ CrawlError::NotFound(_) => e,
                other => CrawlError::PermanentFailure {
                    paper_id: paper_id.clone(),
                    attempts: lease.attempts,
                    reason: other.to_string(),
                },
            };
            log::error!("{failure}");
            stats.abandoned += 1;
            if let Err(qe) = ctx.queue.ack(lease) {
                log::warn!("{paper_id}: ack of abandoned task failed: {qe}");
            }
        }
    }
}

fn return_unstarted(ctx: &CrawlContext, lease: &Lease, stats: &mut BatchStats) {
    stats.returned += 1;
    if let Err(e) = ctx.queue.requeue_unstarted(lease) {
        log::warn!("{}: could not return lease, it will expire: {e}", lease.paper_id());
    }
}
