//! Background throughput reporter
//!
//! Runs on its own thread with its own `StopSignal`; the crawl loop never
//! waits on it.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use citecrawl_core::{StopSignal, fmt_num};
use citecrawl_store::{CrawlCounters, Database, TaskQueue};

/// Poll granularity while waiting for the next report.
const TICK: Duration = Duration::from_millis(100);

pub struct Reporter {
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    pub fn spawn(db: Database, queue: TaskQueue, interval: Duration) -> anyhow::Result<Self> {
        let stop = StopSignal::new();
        let signal = stop.clone();
        let handle = std::thread::Builder::new()
            .name("citecrawl-report".into())
            .spawn(move || report_loop(&db, &queue, interval, &signal))
            .context("Failed to spawn reporter thread")?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Reporter thread panicked");
            }
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn report_loop(db: &Database, queue: &TaskQueue, interval: Duration, stop: &StopSignal) {
    let mut next = Instant::now() + interval;
    while !stop.is_stopped() {
        if Instant::now() < next {
            std::thread::sleep(TICK.min(interval));
            continue;
        }
        next = Instant::now() + interval;
        match snapshot(db, queue) {
            Ok(line) => log::info!("{line}"),
            Err(e) => log::warn!("Progress report skipped: {e}"),
        }
    }
}

/// One report line from the durable counters and the queue.
pub fn snapshot(db: &Database, queue: &TaskQueue) -> anyhow::Result<String> {
    let counters = CrawlCounters::load(db)?;
    let queued = queue.len()?;
    let in_flight = queue.in_flight()?;
    let rate = counters
        .papers_per_minute()
        .map_or_else(|| "-".to_string(), |r| format!("{r:.1}"));
    Ok(format!(
        "Progress: {} papers, {} edges, {} papers/min; queue={} ({} in flight)",
        fmt_num(counters.processed_papers),
        fmt_num(counters.citation_edges),
        rate,
        fmt_num(queued),
        fmt_num(in_flight)
    ))
}

