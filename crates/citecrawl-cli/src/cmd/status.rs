//! Status subcommand - counters and queue depth from the crawl database

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use citecrawl_core::fmt_num;
use citecrawl_crawl::CrawlContext;
use citecrawl_store::CrawlCounters;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// SQLite database to inspect
    #[arg(short, long)]
    pub database: Option<PathBuf>,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let mut crawl_config = config.crawl_config(None);
    if let Some(database) = args.database {
        crawl_config.database = database;
    }
    if !crawl_config.database.exists() {
        bail!(
            "No crawl database at {}; start one with `citecrawl crawl --fresh`",
            crawl_config.database.display()
        );
    }
    crawl_config.report_interval = None;
    let database = crawl_config.database.clone();
    let ctx = CrawlContext::open(crawl_config).context("Cannot open crawl state")?;

    let counters = CrawlCounters::load(&ctx.db).context("Failed to read counters")?;
    let queued = ctx.queue.len()?;
    let visible = ctx.queue.visible_len()?;
    let in_flight = ctx.queue.in_flight()?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Crawl status").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Database", &database.display().to_string()]);
    table.add_row(vec![
        Cell::new("Processed papers").fg(Color::Green),
        Cell::new(fmt_num(counters.processed_papers)).fg(Color::Green),
    ]);
    table.add_row(vec!["Citation edges", &fmt_num(counters.citation_edges)]);
    table.add_row(vec!["Started", &fmt_time(counters.started_at)]);
    table.add_row(vec!["Last activity", &fmt_time(counters.last_activity())]);
    table.add_row(vec![
        "Papers/min",
        &counters
            .papers_per_minute()
            .map_or_else(|| "-".to_string(), |r| format!("{r:.1}")),
    ]);
    table.add_row(vec!["Queued", &fmt_num(queued)]);
    table.add_row(vec!["  ready", &fmt_num(visible)]);
    table.add_row(vec!["  in flight", &fmt_num(in_flight)]);

    eprintln!("\n{table}");
    Ok(())
}

fn fmt_time(t: Option<DateTime<Utc>>) -> String {
    t.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
