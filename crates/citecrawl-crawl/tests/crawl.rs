mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use citecrawl_core::ProgressContext;
use citecrawl_crawl::StartMode;
use citecrawl_store::CrawlCounters;
use common::*;
use tempfile::TempDir;

#[test]
fn fresh_start_one_batch() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(FakeScholar::new(&[("A", "B"), ("A", "C")]));
    let mut config = test_config(dir.path());
    config.max_batches = Some(1);
    let ctx = open(config, &scholar);

    let summary = crawl(&ctx, fresh(&["A"])).unwrap();

    assert_eq!(edges(&ctx), edge_list(&[("A", "B"), ("A", "C")]));
    assert_eq!(processed_ids(&ctx), vec!["A"]);
    assert_eq!(pending(&ctx), vec!["B", "C"]);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.totals.processed, 1);
    assert_eq!(summary.totals.enqueued, 2);
    assert_eq!(summary.queue_len, 2);
    assert!(!summary.interrupted);
}

#[test]
fn drains_whole_graph() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(sample_graph());
    let ctx = open(test_config(dir.path()), &scholar);

    let summary = crawl(&ctx, fresh(&["A"])).unwrap();

    assert_eq!(edges(&ctx), sample_edges());
    assert_eq!(processed_ids(&ctx), vec!["A", "B", "C", "D", "E", "F", "G"]);
    assert!(pending(&ctx).is_empty());
    assert_eq!(summary.queue_len, 0);
    assert_eq!(summary.totals.processed, 7);
    assert_eq!(summary.counters.processed_papers, 7);
    assert_eq!(summary.counters.citation_edges, 9);
}

#[test]
fn fields_of_study_recorded() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(FakeScholar::new(&[("A", "B")]));
    let ctx = open(test_config(dir.path()), &scholar);

    crawl(&ctx, fresh(&["A"])).unwrap();

    for paper in processed(&ctx) {
        assert!(paper.fields_of_study.contains("Computer Science"));
    }
}

#[test]
fn resume_matches_uninterrupted_run() {
    let full_dir = TempDir::new().unwrap();
    let scholar = Arc::new(sample_graph());
    let mut config = test_config(full_dir.path());
    config.api.batch_size = 1;
    let full = open(config, &scholar);
    crawl(&full, fresh(&["A"])).unwrap();

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.api.batch_size = 1;
    config.max_batches = Some(3);
    {
        let partial = open(config.clone(), &scholar);
        crawl(&partial, fresh(&["A"])).unwrap();
        assert_eq!(processed_ids(&partial), vec!["A", "B", "C"]);
        assert!(!pending(&partial).is_empty());
    }

    config.max_batches = None;
    let resumed = open(config, &scholar);
    crawl(&resumed, StartMode::Resume).unwrap();

    assert_eq!(edges(&resumed), edges(&full));
    assert_eq!(processed(&resumed), processed(&full));
    assert!(pending(&resumed).is_empty());
}

#[test]
fn resume_with_empty_queue_fails() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(sample_graph());
    let ctx = open(test_config(dir.path()), &scholar);

    let err = crawl(&ctx, StartMode::Resume).unwrap_err();
    assert!(err.to_string().contains("nothing to resume"));

    crawl(&ctx, fresh(&["A"])).unwrap();
    let err = crawl(&ctx, StartMode::Resume).unwrap_err();
    assert!(err.to_string().contains("use --fresh"));
}

#[test]
fn fresh_start_without_seeds_fails() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(sample_graph());
    let ctx = open(test_config(dir.path()), &scholar);

    assert!(crawl(&ctx, fresh(&[])).is_err());
}

#[test]
fn fresh_start_discards_previous_crawl() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(sample_graph());
    let ctx = open(test_config(dir.path()), &scholar);
    crawl(&ctx, fresh(&["A"])).unwrap();

    let summary = crawl(&ctx, fresh(&["F"])).unwrap();

    assert_eq!(processed_ids(&ctx), vec!["B", "C", "E", "F", "G"]);
    assert_eq!(
        edges(&ctx),
        edge_list(&[("B", "C"), ("B", "E"), ("C", "F"), ("F", "B"), ("F", "G")])
    );
    assert_eq!(summary.counters.processed_papers, 5);
    assert_eq!(summary.counters.citation_edges, 5);
}

#[test]
fn transient_failure_is_requeued() {
    let dir = TempDir::new().unwrap();
    // Three 503s exhaust the request retries once.
    let scholar = Arc::new(FakeScholar::new(&[("A", "B")]).fail_times("A", 3));
    let ctx = open(test_config(dir.path()), &scholar);

    let summary = crawl(&ctx, fresh(&["A"])).unwrap();

    assert_eq!(summary.totals.requeued, 1);
    assert_eq!(summary.totals.abandoned, 0);
    assert_eq!(processed_ids(&ctx), vec!["A", "B"]);
    assert_eq!(edges(&ctx), edge_list(&[("A", "B")]));
}

#[test]
fn paper_abandoned_after_attempt_budget() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(FakeScholar::new(&[("A", "B")]).fail_times("A", 1_000));
    let ctx = open(test_config(dir.path()), &scholar);

    let summary = crawl(&ctx, fresh(&["A"])).unwrap();

    assert_eq!(summary.totals.requeued, 2);
    assert_eq!(summary.totals.abandoned, 1);
    assert!(processed_ids(&ctx).is_empty());
    assert!(edges(&ctx).is_empty());
    assert!(pending(&ctx).is_empty());
}

#[test]
fn unknown_paper_abandoned_alone() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(FakeScholar::new(&[("A", "B"), ("A", "X")]).missing("X"));
    let ctx = open(test_config(dir.path()), &scholar);

    let summary = crawl(&ctx, fresh(&["A"])).unwrap();

    assert_eq!(summary.totals.abandoned, 1);
    assert_eq!(summary.totals.requeued, 0);
    assert_eq!(processed_ids(&ctx), vec!["A", "B"]);
    // The edge was discovered from A, which is known
    assert_eq!(edges(&ctx), edge_list(&[("A", "B"), ("A", "X")]));
}

#[test]
fn long_reference_list_paged_in() {
    let dir = TempDir::new().unwrap();
    let refs: Vec<String> = (0..1500).map(|i| format!("R{i:04}")).collect();
    let scholar = Arc::new(
        FakeScholar::new(&[])
            .with_paper("P", refs.clone())
            .embed_limit(1000),
    );
    let mut config = test_config(dir.path());
    config.max_batches = Some(1);
    let ctx = open(config, &scholar);

    let summary = crawl(&ctx, fresh(&["P"])).unwrap();

    assert_eq!(scholar.page_calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.totals.overflow_pages, 1);
    assert_eq!(summary.totals.references_seen, 1500);
    assert_eq!(edges(&ctx).len(), 1500);
    assert_eq!(pending(&ctx), refs);
}

#[test]
fn short_reference_list_needs_no_paging() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(sample_graph());
    let ctx = open(test_config(dir.path()), &scholar);

    crawl(&ctx, fresh(&["A"])).unwrap();

    assert_eq!(scholar.page_calls.load(Ordering::SeqCst), 0);
}

/// Binary tree of `n` papers where every paper also cites its parent.
fn tree(n: usize) -> FakeScholar {
    let mut scholar = FakeScholar::new(&[]);
    for i in 0..n {
        let mut refs = Vec::new();
        for child in [2 * i + 1, 2 * i + 2] {
            if child < n {
                refs.push(format!("T{child:03}"));
            }
        }
        if i > 0 {
            refs.push(format!("T{:03}", (i - 1) / 2));
        }
        scholar = scholar.with_paper(&format!("T{i:03}"), refs);
    }
    scholar
}

#[test]
fn parallel_workers_match_single_worker() {
    let single_dir = TempDir::new().unwrap();
    let scholar = Arc::new(tree(80));
    let mut config = test_config(single_dir.path());
    config.api.batch_size = 3;
    let single = open(config, &scholar);
    crawl(&single, fresh(&["T000"])).unwrap();

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.api.batch_size = 3;
    config.workers = 4;
    let parallel = open(config, &scholar);
    let summary = crawl(&parallel, fresh(&["T000"])).unwrap();

    assert_eq!(processed_ids(&parallel).len(), 80);
    assert_eq!(edges(&parallel), edges(&single));
    assert_eq!(processed(&parallel), processed(&single));
    // No paper processed twice
    assert_eq!(summary.counters.processed_papers, 80);
    assert_eq!(summary.counters.citation_edges, edges(&single).len() as u64);
}

#[test]
fn stop_flag_leaves_queue_for_resume() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(sample_graph());
    let ctx = open(test_config(dir.path()), &scholar);
    let progress = Arc::new(ProgressContext::hidden());

    let stopped = AtomicBool::new(true);
    let summary = citecrawl_crawl::run(&ctx, &fresh(&["A"]), &stopped, &progress).unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.totals.processed, 0);
    assert_eq!(pending(&ctx), vec!["A"]);

    crawl(&ctx, StartMode::Resume).unwrap();
    assert_eq!(edges(&ctx), sample_edges());
}

#[test]
fn counters_track_store() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(sample_graph());
    let ctx = open(test_config(dir.path()), &scholar);
    crawl(&ctx, fresh(&["A"])).unwrap();

    let counters = CrawlCounters::load(&ctx.db).unwrap();
    assert_eq!(counters.processed_papers, 7);
    assert_eq!(counters.citation_edges, 9);
    assert!(counters.started_at.is_some());
    assert!(counters.last_activity().is_some());

    let line = citecrawl_crawl::reporter::snapshot(&ctx.db, &ctx.queue).unwrap();
    assert!(line.contains("7 papers"));
    assert!(line.contains("9 edges"));
}

#[test]
fn slow_batch_keeps_its_leases() {
    // Five seeds, each needing three 40ms reference pages: one batch takes
    // about twice the lease timeout, while a second worker polls for work.
    let mut scholar = FakeScholar::new(&[]);
    for s in 1..=5 {
        let refs = (0..4).map(|r| format!("L{s}-{r}")).collect();
        scholar = scholar.with_paper(&format!("S{s}"), refs);
    }
    let scholar = Arc::new(
        scholar
            .embed_limit(1)
            .page_delay(std::time::Duration::from_millis(40)),
    );

    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.workers = 2;
    config.api.limits.page_size = 1;
    config.queue.lease_timeout = std::time::Duration::from_millis(300);
    let ctx = open(config, &scholar);

    let summary = crawl(&ctx, fresh(&["S1", "S2", "S3", "S4", "S5"])).unwrap();

    for s in 1..=5 {
        assert_eq!(scholar.pages_served(&format!("S{s}")), 3, "S{s} crawled twice");
    }
    assert_eq!(summary.totals.requeued, 0);
    assert_eq!(summary.totals.abandoned, 0);
    assert_eq!(summary.totals.lost, 0);
    assert_eq!(summary.counters.processed_papers, 25);
    assert_eq!(summary.counters.citation_edges, 20);
}

#[test]
fn alias_seed_stored_under_canonical_id() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(sample_graph().alias("DOI:10.1145/3318464", "A"));
    let ctx = open(test_config(dir.path()), &scholar);

    let summary = crawl(&ctx, fresh(&["DOI:10.1145/3318464"])).unwrap();

    // D -> A leads back to the seed, which must not be crawled a second time
    assert_eq!(processed_ids(&ctx), vec!["A", "B", "C", "D", "E", "F", "G"]);
    assert_eq!(edges(&ctx), sample_edges());
    assert_eq!(summary.totals.processed, 7);
    assert!(pending(&ctx).is_empty());
}

#[test]
fn alias_of_processed_paper_is_skipped() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(sample_graph().alias("ARXIV:1705.10311", "A"));
    let ctx = open(test_config(dir.path()), &scholar);

    crawl(&ctx, fresh(&["A", "ARXIV:1705.10311"])).unwrap();

    assert_eq!(processed_ids(&ctx), vec!["A", "B", "C", "D", "E", "F", "G"]);
    assert_eq!(scholar.page_calls.load(Ordering::SeqCst), 0);
    assert_eq!(edges(&ctx), sample_edges());
}

#[test]
fn blank_seeds_are_ignored() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(sample_graph());
    let ctx = open(test_config(dir.path()), &scholar);

    let err = crawl(&ctx, fresh(&["", "  "])).unwrap_err();
    assert!(err.to_string().contains("at least one seed"));

    crawl(&ctx, fresh(&["", "A"])).unwrap();
    assert_eq!(processed_ids(&ctx), vec!["A", "B", "C", "D", "E", "F", "G"]);
}

#[test]
fn resume_after_crash_waits_out_stale_leases() {
    let dir = TempDir::new().unwrap();
    let scholar = Arc::new(sample_graph());
    let mut config = test_config(dir.path());
    config.queue.lease_timeout = std::time::Duration::from_millis(200);
    let ctx = open(config, &scholar);

    // A session that leased the seed and died without acking
    citecrawl_crawl::prepare(&ctx, &fresh(&["A"])).unwrap();
    let stale = ctx.queue.pop_batch(10).unwrap();
    assert_eq!(stale.len(), 1);

    let summary = crawl(&ctx, StartMode::Resume).unwrap();

    assert_eq!(edges(&ctx), sample_edges());
    assert_eq!(summary.totals.processed, 7);
    assert_eq!(summary.totals.requeued, 0);
    assert!(!ctx.queue.ack(&stale[0]).unwrap());
}
