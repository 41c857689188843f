//! Crawl entry points: fresh/resume preparation and the multi-worker drain

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use citecrawl_core::{PaperId, QueueError, SharedProgress, TaskRecord, fmt_num};
use citecrawl_store::CrawlCounters;
use indicatif::ProgressBar;

use crate::context::CrawlContext;
use crate::reporter::Reporter;
use crate::stats::{BatchStats, CrawlSummary};
use crate::worker;

/// How a session attaches to the durable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartMode {
    /// Wipe everything, then queue `seeds`.
    Fresh { seeds: Vec<PaperId> },
    /// Continue draining whatever is already queued.
    Resume,
}

/// Prepare the durable state for `mode`, drain the queue, and summarise.
///
/// Returns once the queue is empty, `max_batches` is reached, or `stop` is
/// set. A set `stop` shows up as `CrawlSummary::interrupted`.
pub fn run(
    ctx: &CrawlContext,
    mode: &StartMode,
    stop: &AtomicBool,
    progress: &SharedProgress,
) -> anyhow::Result<CrawlSummary> {
    prepare(ctx, mode)?;

    let reporter = match ctx.config.report_interval {
        Some(interval) => Some(Reporter::spawn(
            ctx.db.clone(),
            ctx.queue.clone(),
            interval,
        )?),
        None => None,
    };
    let summary = drain(ctx, stop, progress);
    if let Some(reporter) = reporter {
        reporter.stop();
    }
    summary
}

pub fn prepare(ctx: &CrawlContext, mode: &StartMode) -> anyhow::Result<()> {
    match mode {
        StartMode::Fresh { seeds } => {
            let blank = seeds.iter().filter(|s| s.as_str().trim().is_empty()).count();
            if blank > 0 {
                log::warn!("Ignoring {blank} blank seed ids");
            }
            let seeds: Vec<PaperId> = seeds
                .iter()
                .filter(|s| !s.as_str().trim().is_empty())
                .cloned()
                .collect();
            if seeds.is_empty() {
                bail!("fresh start needs at least one seed paper id");
            }
            log::info!("Fresh start: clearing crawl state");
            ctx.db
                .reset_crawl_state()
                .context("Failed to reset crawl state")?;
            let tasks: Vec<TaskRecord> = seeds.iter().cloned().map(TaskRecord::seed).collect();
            let added = ctx.queue.push(&tasks).context("Failed to queue seeds")?;
            log::info!("Seeded {} of {} papers", added.len(), seeds.len());
        }
        StartMode::Resume => {
            let queued = ctx.queue.len().context("Task queue unavailable")?;
            if queued == 0 {
                bail!("nothing to resume; use --fresh");
            }
            let counters = CrawlCounters::load(&ctx.db).context("Failed to read counters")?;
            log::info!(
                "Resuming: {} queued, {} papers and {} edges stored",
                fmt_num(queued),
                fmt_num(counters.processed_papers),
                fmt_num(counters.citation_edges)
            );
        }
    }
    Ok(())
}

/// Shared by all workers of one drain.
struct DrainState<'a> {
    ctx: &'a CrawlContext,
    stop: &'a AtomicBool,
    /// Batch slots handed out so far (bounded by `max_batches`).
    started: AtomicU64,
    /// Set on a fatal queue error; other workers finish their batch and exit.
    halt: AtomicBool,
    totals: Mutex<BatchStats>,
    totals_line: ProgressBar,
    failure: Mutex<Option<QueueError>>,
    /// Workers currently inside a batch.
    busy: AtomicUsize,
    /// The current idle stretch has been logged; cleared when work is popped.
    idle_noted: AtomicBool,
}

impl DrainState<'_> {
    fn should_exit(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || self.halt.load(Ordering::Relaxed)
    }

    /// Reserve the next batch number, or `None` once the batch budget is used.
    fn claim_batch(&self) -> Option<u64> {
        let n = self.started.fetch_add(1, Ordering::SeqCst);
        match self.ctx.config.max_batches {
            Some(max) if n >= max => {
                self.started.fetch_sub(1, Ordering::SeqCst);
                None
            }
            _ => Some(n + 1),
        }
    }

    fn unclaim_batch(&self) {
        self.started.fetch_sub(1, Ordering::SeqCst);
    }

    fn record(&self, batch: &BatchStats, queue_len: Option<u64>) {
        if let Ok(mut totals) = self.totals.lock() {
            totals.merge(batch);
            self.totals_line.set_message(format!(
                "{} papers, {} new edges, {} enqueued; queue {}",
                fmt_num(totals.processed as u64),
                fmt_num(totals.edges_stored),
                fmt_num(totals.enqueued as u64),
                queue_len.map_or_else(|| "?".to_string(), fmt_num)
            ));
        }
    }

    /// Log once per idle stretch when nothing in this process holds a batch
    /// yet the queue is not empty. After a crash the dead session's leases
    /// keep its papers invisible until they expire.
    fn note_idle(&self, queued: u64) {
        if self.busy.load(Ordering::SeqCst) > 0 || self.idle_noted.swap(true, Ordering::Relaxed) {
            return;
        }
        match self.ctx.queue.in_flight() {
            Ok(in_flight) => log::info!(
                "{}",
                idle_reason(in_flight, queued, self.ctx.config.queue.lease_timeout)
            ),
            Err(e) => log::debug!("Queue inspection failed: {e}"),
        }
    }

    fn fail(&self, e: QueueError) {
        log::error!("Stopping workers: {e}");
        self.halt.store(true, Ordering::Relaxed);
        if let Ok(mut slot) = self.failure.lock() {
            slot.get_or_insert(e);
        }
    }
}

fn idle_reason(in_flight: u64, queued: u64, lease_timeout: Duration) -> String {
    if in_flight == 0 {
        return format!("Waiting for {} queued papers held back for retry", fmt_num(queued));
    }
    format!(
        "Waiting for {} papers leased by another session ({} queued); \
         their leases expire within {}s",
        fmt_num(in_flight),
        fmt_num(queued),
        lease_timeout.as_secs()
    )
}

/// Run `config.workers` workers until the queue is empty.
pub fn drain(
    ctx: &CrawlContext,
    stop: &AtomicBool,
    progress: &SharedProgress,
) -> anyhow::Result<CrawlSummary> {
    let start = Instant::now();
    let workers = ctx.config.workers.max(1);
    log::info!(
        "Crawling with {workers} workers, batch size {}",
        ctx.config.api.batch_size
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("citecrawl-worker-{i}"))
        .build()
        .context("Failed to create thread pool")?;

    // Worker lines are added first so the totals line stays at the bottom
    let lines: Vec<ProgressBar> = (0..workers).map(|w| progress.worker_line(w)).collect();
    let state = DrainState {
        ctx,
        stop,
        started: AtomicU64::new(0),
        halt: AtomicBool::new(false),
        totals: Mutex::new(BatchStats::default()),
        totals_line: progress.totals_line(),
        failure: Mutex::new(None),
        busy: AtomicUsize::new(0),
        idle_noted: AtomicBool::new(false),
    };

    pool.scope(|s| {
        for pb in lines {
            let state = &state;
            s.spawn(move |_| {
                worker_loop(state, &pb);
                pb.finish_and_clear();
            });
        }
    });
    state.totals_line.finish_and_clear();

    if let Some(e) = state.failure.into_inner().ok().flatten() {
        return Err(e).context("Task queue failed during crawl");
    }

    let summary = CrawlSummary {
        batches: state.started.load(Ordering::SeqCst),
        totals: state.totals.into_inner().unwrap_or_default(),
        wall_time: start.elapsed(),
        counters: CrawlCounters::load(&ctx.db).context("Failed to read counters")?,
        queue_len: ctx.queue.len().context("Task queue unavailable")?,
        interrupted: stop.load(Ordering::Relaxed),
    };
    Ok(summary)
}

fn worker_loop(state: &DrainState<'_>, pb: &ProgressBar) {
    let ctx = state.ctx;
    while !state.should_exit() {
        let Some(batch_no) = state.claim_batch() else {
            break;
        };

        pb.set_message("waiting for tasks");
        // Counted busy from before the pop so an idle peer never sees a
        // popped batch as held elsewhere
        state.busy.fetch_add(1, Ordering::SeqCst);
        let leases = match ctx.queue.pop_batch(ctx.config.api.batch_size) {
            Ok(leases) => leases,
            Err(e) => {
                state.busy.fetch_sub(1, Ordering::SeqCst);
                state.unclaim_batch();
                state.fail(e);
                break;
            }
        };

        if leases.is_empty() {
            state.busy.fetch_sub(1, Ordering::SeqCst);
            state.unclaim_batch();
            match ctx.queue.len() {
                // Leased entries stay in the table until acked, so zero means
                // no other worker can still add work.
                Ok(0) => break,
                Ok(queued) => {
                    state.note_idle(queued);
                    std::thread::sleep(ctx.config.queue.idle_poll);
                }
                Err(e) => {
                    state.fail(e);
                    break;
                }
            }
            continue;
        }

        state.idle_noted.store(false, Ordering::Relaxed);
        let stats = worker::process_batch(ctx, leases, state.stop, pb);
        state.busy.fetch_sub(1, Ordering::SeqCst);
        let queue_len = ctx.queue.len().ok();
        stats.log(batch_no, queue_len);
        state.record(&stats, queue_len);
    }
}
