#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use citecrawl_core::{CitationEdge, PaperId, ProcessedPaper, ProgressContext, RetryPolicy};
use citecrawl_crawl::{
    ApiConfig, Config, CrawlContext, CrawlSummary, MarkerConfig, QueueConfig, StartMode,
};
use citecrawl_s2::{ApiRequest, FetchLimits, Method, RawResponse, Transport, TransportError};
use citecrawl_store::StoreOptions;
use serde_json::json;

/// In-process stand-in for the Semantic Scholar Graph API.
///
/// Serves `POST paper/batch` (embedding at most `embed_limit` references per
/// paper) and `GET paper/{id}/references`. Ids outside `graph` are known
/// leaves with no references, except those in `missing`. Ids in `aliases`
/// (DOI, ArXiv, ...) resolve to their canonical id in batch lookups.
pub struct FakeScholar {
    graph: BTreeMap<String, Vec<String>>,
    missing: BTreeSet<String>,
    aliases: HashMap<String, String>,
    embed_limit: usize,
    /// Latency of each reference page.
    page_delay: Duration,
    /// Reference pages served, per paper id.
    pages_by_paper: Mutex<HashMap<String, usize>>,
    /// Batch calls containing the id answer 503 while the count is positive.
    failures: Mutex<HashMap<String, usize>>,
    pub batch_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
}

impl FakeScholar {
    /// Graph from `(citing, cited)` pairs; reference order follows the slice.
    pub fn new(edges: &[(&str, &str)]) -> Self {
        let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (citing, cited) in edges {
            graph
                .entry(citing.to_string())
                .or_default()
                .push(cited.to_string());
        }
        Self {
            graph,
            missing: BTreeSet::new(),
            aliases: HashMap::new(),
            embed_limit: usize::MAX,
            page_delay: Duration::ZERO,
            pages_by_paper: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            batch_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_paper(mut self, id: &str, refs: Vec<String>) -> Self {
        self.graph.insert(id.to_string(), refs);
        self
    }

    pub fn embed_limit(mut self, limit: usize) -> Self {
        self.embed_limit = limit;
        self
    }

    pub fn alias(mut self, alias: &str, canonical: &str) -> Self {
        self.aliases.insert(alias.to_string(), canonical.to_string());
        self
    }

    pub fn page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn pages_served(&self, id: &str) -> usize {
        self.pages_by_paper
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn missing(mut self, id: &str) -> Self {
        self.missing.insert(id.to_string());
        self
    }

    pub fn fail_times(self, id: &str, times: usize) -> Self {
        self.failures.lock().unwrap().insert(id.to_string(), times);
        self
    }

    fn refs(&self, id: &str) -> &[String] {
        self.graph.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn batch(&self, request: &ApiRequest) -> RawResponse {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let ids: Vec<String> = request.body.as_ref().unwrap()["ids"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();

        {
            let mut failures = self.failures.lock().unwrap();
            for id in &ids {
                if let Some(left) = failures.get_mut(id) {
                    if *left > 0 {
                        *left -= 1;
                        return RawResponse::new(503, "upstream busy");
                    }
                }
            }
        }

        let records: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| {
                if self.missing.contains(id) {
                    return serde_json::Value::Null;
                }
                let id = self.aliases.get(id).unwrap_or(id);
                let refs = self.refs(id);
                let embedded: Vec<serde_json::Value> = refs
                    .iter()
                    .take(self.embed_limit)
                    .map(|r| json!({ "paperId": r }))
                    .collect();
                json!({
                    "paperId": id,
                    "referenceCount": refs.len(),
                    "fieldsOfStudy": ["Computer Science"],
                    "references": embedded,
                })
            })
            .collect();
        RawResponse::ok(serde_json::Value::Array(records).to_string())
    }

    fn references(&self, id: &str, request: &ApiRequest) -> RawResponse {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .pages_by_paper
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default() += 1;
        std::thread::sleep(self.page_delay);
        let offset: usize = request.query_param("offset").unwrap().parse().unwrap();
        let limit: usize = request.query_param("limit").unwrap().parse().unwrap();
        let refs = self.refs(id);
        let end = (offset + limit).min(refs.len());
        let data: Vec<serde_json::Value> = refs[offset.min(end)..end]
            .iter()
            .map(|r| json!({ "citedPaper": { "paperId": r } }))
            .collect();
        let mut body = json!({ "offset": offset, "data": data });
        if end < refs.len() {
            body["next"] = json!(end);
        }
        RawResponse::ok(body.to_string())
    }
}

impl Transport for FakeScholar {
    fn execute(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        match (request.method, request.path.as_str()) {
            (Method::Post, "paper/batch") => Ok(self.batch(request)),
            (Method::Get, path) => {
                let id = path
                    .strip_prefix("paper/")
                    .and_then(|rest| rest.strip_suffix("/references"))
                    .unwrap_or_else(|| panic!("unexpected path {path}"));
                let id = urlencoding::decode(id).unwrap();
                Ok(self.references(&id, request))
            }
            (method, path) => panic!("unexpected request {method} /{path}"),
        }
    }
}

/// Config for a throwaway database under `dir`: no pacing, no retry sleeps.
pub fn test_config(dir: &Path) -> Config {
    Config {
        database: dir.join("crawl.db"),
        api: ApiConfig {
            requests_per_second: None,
            retry: RetryPolicy::immediate(3),
            batch_size: 10,
            limits: FetchLimits::default(),
            ..Default::default()
        },
        store: StoreOptions {
            retry: RetryPolicy::new(5, Duration::from_millis(10), Duration::from_millis(100)),
            ..Default::default()
        },
        queue: QueueConfig {
            retry_delay: Duration::ZERO,
            idle_poll: Duration::from_millis(10),
            ..Default::default()
        },
        markers: MarkerConfig {
            queued_capacity: 10_000,
            queued_fp_rate: 0.01,
            processed_capacity: 10_000,
            processed_fp_rate: 0.01,
        },
        workers: 1,
        max_batches: None,
        report_interval: None,
    }
}

pub fn open(config: Config, scholar: &Arc<FakeScholar>) -> CrawlContext {
    CrawlContext::with_transport(config, scholar.clone()).unwrap()
}

pub fn crawl(ctx: &CrawlContext, mode: StartMode) -> anyhow::Result<CrawlSummary> {
    let stop = AtomicBool::new(false);
    let progress = Arc::new(ProgressContext::hidden());
    citecrawl_crawl::run(ctx, &mode, &stop, &progress)
}

pub fn fresh(seeds: &[&str]) -> StartMode {
    StartMode::Fresh {
        seeds: seeds.iter().map(|s| PaperId::from(*s)).collect(),
    }
}

pub fn edges(ctx: &CrawlContext) -> Vec<CitationEdge> {
    ctx.store.edges().unwrap()
}

pub fn edge_list(pairs: &[(&str, &str)]) -> Vec<CitationEdge> {
    let mut edges: Vec<CitationEdge> = pairs
        .iter()
        .map(|(a, b)| CitationEdge::new(*a, *b))
        .collect();
    edges.sort();
    edges
}

pub fn processed(ctx: &CrawlContext) -> Vec<ProcessedPaper> {
    ctx.store.processed_papers().unwrap()
}

pub fn processed_ids(ctx: &CrawlContext) -> Vec<String> {
    processed(ctx)
        .into_iter()
        .map(|p| p.paper_id.into_inner())
        .collect()
}

pub fn pending(ctx: &CrawlContext) -> Vec<String> {
    ctx.queue
        .pending_ids()
        .unwrap()
        .into_iter()
        .map(PaperId::into_inner)
        .collect()
}

/// A -> B, C, D; B -> C, E; C -> F; D -> A; F -> B, G. Seven papers,
/// nine edges, one cycle.
const SAMPLE: &[(&str, &str)] = &[
    ("A", "B"),
    ("A", "C"),
    ("A", "D"),
    ("B", "C"),
    ("B", "E"),
    ("C", "F"),
    ("D", "A"),
    ("F", "B"),
    ("F", "G"),
];

pub fn sample_graph() -> FakeScholar {
    FakeScholar::new(SAMPLE)
}

pub fn sample_edges() -> Vec<CitationEdge> {
    edge_list(SAMPLE)
}
