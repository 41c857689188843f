//! Per-process crawl context
//!
//! Built once at startup and passed by reference to every worker. Owns the
//! tokio runtime that drives both HTTP and SQLite; dropping the context
//! closes the pool before the runtime goes away.

use std::sync::Arc;

use anyhow::Context;
use citecrawl_s2::{HttpTransport, Pacer, ReferenceFetcher, Requester, Transport};
use citecrawl_store::{
    CitationStore, Database, DedupFilter, MarkerSet, PROCESSED_MARKER, QUEUED_MARKER, TaskQueue,
};
use tokio::runtime::Runtime;

use crate::config::Config;

pub struct CrawlContext {
    pub config: Config,
    pub db: Database,
    pub queue: TaskQueue,
    pub dedup: DedupFilter,
    pub store: CitationStore,
    pub requester: Arc<Requester>,
    pub fetcher: ReferenceFetcher,
    // Declared last: dropped after everything that uses its handle
    _runtime: Runtime,
}

impl CrawlContext {
    /// Context talking to the real API.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let runtime = build_runtime()?;
        let transport = HttpTransport::new(
            runtime.handle().clone(),
            &config.api.root,
            config.api.key.clone(),
            config.api.timeout,
        )
        .context("Failed to build HTTP client")?;
        if !transport.has_api_key() {
            log::info!("No API key configured, using the unauthenticated rate limit");
        }
        Self::assemble(config, runtime, Arc::new(transport))
    }

    /// Context over an arbitrary transport (tests, replay).
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        let runtime = build_runtime()?;
        Self::assemble(config, runtime, transport)
    }

    fn assemble(
        config: Config,
        runtime: Runtime,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        let db = Database::open(&config.database, runtime.handle().clone(), &config.store)?;
        let queued = MarkerSet::open(&db, QUEUED_MARKER, config.markers.queued())
            .context("Failed to open queued marker")?;
        let processed = MarkerSet::open(&db, PROCESSED_MARKER, config.markers.processed())
            .context("Failed to open processed marker")?;

        let requester = Arc::new(Requester::new(
            transport,
            config.api.retry,
            Pacer::per_second(config.api.requests_per_second),
        ));
        let fetcher = ReferenceFetcher::new(requester.clone(), config.api.limits);

        Ok(Self {
            queue: TaskQueue::new(&db, queued.clone(), config.queue.lease_timeout),
            dedup: DedupFilter::new(&db, queued, processed.clone()),
            store: CitationStore::new(&db, processed),
            requester,
            fetcher,
            db,
            config,
            _runtime: runtime,
        })
    }
}

impl Drop for CrawlContext {
    fn drop(&mut self) {
        self.db.close();
        log::debug!("Crawl database closed");
    }
}

fn build_runtime() -> anyhow::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("citecrawl-io")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}
