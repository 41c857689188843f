//! Crawl subcommand - fresh start from seeds, or resume the existing queue

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use citecrawl_core::{PaperId, SharedProgress, shutdown_flag};
use citecrawl_crawl::{CrawlContext, StartMode};
use clap::{ArgGroup, Args};

use crate::config::Config;

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("mode").required(true).args(["fresh", "resume"])))]
pub struct CrawlArgs {
    /// Clear all crawl state and start from SEEDS
    #[arg(long, requires = "seeds")]
    pub fresh: bool,

    /// Continue draining the existing queue
    #[arg(long, conflicts_with = "seeds")]
    pub resume: bool,

    /// Seed paper ids (with --fresh)
    #[arg(value_name = "PAPER_ID")]
    pub seeds: Vec<String>,

    /// Number of parallel workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// SQLite database holding queue, markers and citations
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Stop after this many batches
    #[arg(long)]
    pub max_batches: Option<u64>,

    /// Papers per metadata request
    #[arg(long)]
    pub batch_size: Option<usize>,
}

impl CrawlArgs {
    fn mode(&self) -> StartMode {
        if self.fresh {
            StartMode::Fresh {
                seeds: self
                    .seeds
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(PaperId::new)
                    .collect(),
            }
        } else {
            StartMode::Resume
        }
    }
}

pub fn run(args: CrawlArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    setup_signal_handler()?;

    let mut crawl_config = config.crawl_config(args.workers);
    if let Some(database) = &args.database {
        crawl_config.database = database.clone();
    }
    if let Some(batch_size) = args.batch_size {
        crawl_config.api.batch_size = batch_size.max(1);
    }
    crawl_config.max_batches = args.max_batches;
    let mode = args.mode();

    log::info!(
        "citecrawl starting: database={}, workers={}, mode={}",
        crawl_config.database.display(),
        crawl_config.workers,
        if args.fresh { "fresh" } else { "resume" }
    );

    let ctx = CrawlContext::open(crawl_config).context("Cannot open crawl state")?;
    let summary = citecrawl_crawl::run(&ctx, &mode, shutdown_flag(), progress)?;

    if progress.is_tty() {
        summary.print();
    } else {
        summary.log();
    }

    if summary.interrupted {
        log::warn!("Shutdown requested; continue with `citecrawl crawl --resume`");
        return Ok(ExitCode::from(130));
    }
    if summary.queue_len > 0 {
        log::info!("Batch limit reached; continue with `citecrawl crawl --resume`");
    }
    Ok(ExitCode::SUCCESS)
}

fn setup_signal_handler() -> Result<()> {
    // First signal: set graceful shutdown flag
    // Second signal: force exit
    // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
    unsafe {
        signal_hook::low_level::register(signal_hook::consts::SIGTERM, || {
            if shutdown_flag().swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
        })
        .context("Failed to register SIGTERM handler")?;
        signal_hook::low_level::register(signal_hook::consts::SIGINT, || {
            if shutdown_flag().swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
        })
        .context("Failed to register SIGINT handler")?;
    }
    Ok(())
}
