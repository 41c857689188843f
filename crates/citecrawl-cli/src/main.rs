//! citecrawl - citation graph crawler for the Semantic Scholar Graph API
//!
//! Walks references breadth-first from seed papers, storing citation edges
//! and per-paper fields of study in a resumable SQLite database.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use citecrawl_core::SharedProgress;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "citecrawl")]
#[command(about = "Citation graph crawler for the Semantic Scholar Graph API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./citecrawl.toml or ~/.config/citecrawl/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl from seed papers (--fresh) or continue a previous crawl (--resume)
    Crawl(cmd::crawl::CrawlArgs),
    /// Show counters and queue depth of a crawl database
    Status(cmd::status::StatusArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(citecrawl_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug; spinners show activity
    //   non-TTY: info unless --debug; logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    citecrawl_core::init_logging(quiet, cli.debug, multi);

    match run(cli, &progress) {
        Ok(code) => code,
        Err(e) => {
            log::error!("Fatal error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli, progress: &SharedProgress) -> Result<ExitCode> {
    let config = if let Some(path) = &cli.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Crawl(args) => cmd::crawl::run(args, &config, progress),
        Command::Status(args) => {
            cmd::status::run(args, &config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Database", &config.database.path.display().to_string()]);
    table.add_row(vec!["API URL", &config.api.url]);
    table.add_row(vec![
        "API key",
        if config.api.api_key.is_some() {
            "configured"
        } else {
            "not set"
        },
    ]);
    table.add_row(vec![
        "Rate limit",
        &if config.api.requests_per_second > 0.0 {
            format!("{} req/s", config.api.requests_per_second)
        } else {
            "off".to_string()
        },
    ]);
    table.add_row(vec!["Request timeout", &format!("{}s", config.api.timeout_secs)]);
    table.add_row(vec!["Max retries", &config.api.max_retries.to_string()]);
    table.add_row(vec!["Batch size", &config.api.batch_size.to_string()]);
    table.add_row(vec![
        "Reference pages",
        &format!(
            "{} per page, at most {}",
            config.api.page_size, config.api.max_references
        ),
    ]);
    table.add_row(vec![
        "Lease timeout",
        &format!("{}s", config.queue.lease_timeout_secs),
    ]);
    table.add_row(vec![
        "Retry delay",
        &format!("{}s", config.queue.retry_delay_secs),
    ]);
    table.add_row(vec![
        "Attempts per paper",
        &config.queue.max_paper_attempts.to_string(),
    ]);
    table.add_row(vec![
        "Queued marker",
        &format!(
            "{} @ {}",
            config.markers.queued_capacity, config.markers.queued_fp_rate
        ),
    ]);
    table.add_row(vec![
        "Processed marker",
        &format!(
            "{} @ {}",
            config.markers.processed_capacity, config.markers.processed_fp_rate
        ),
    ]);
    table.add_row(vec![
        "Workers",
        &format!("{} (max: {})", config.workers.default, config.workers.max),
    ]);

    eprintln!("\n{table}");
}
