//! Crawl progress display
//!
//! On a terminal every worker gets a spinner line showing the paper it is
//! on, plus one totals line under them. Off a terminal all bars are hidden
//! and the per-batch log lines are the only progress output.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const TICK: Duration = Duration::from_millis(80);

/// Shared by all workers of a process; cheap to hand out by `Arc`.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Draw only when stderr is a terminal.
    pub fn new() -> Self {
        Self::with_tty(std::io::stderr().is_terminal())
    }

    /// Never draws (tests, piped output).
    pub fn hidden() -> Self {
        Self::with_tty(false)
    }

    fn with_tty(is_tty: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Spinner for worker `idx`; the message is the current activity.
    pub fn worker_line(&self, idx: usize) -> ProgressBar {
        self.spinner("{spinner:.green} {prefix:<10.cyan.bold} {wide_msg}", format!("worker-{idx}"))
    }

    /// Running totals for the session, kept below the worker lines.
    pub fn totals_line(&self) -> ProgressBar {
        self.spinner("  {prefix:<10.bold} {wide_msg}", "total".to_string())
    }

    fn spinner(&self, template: &str, prefix: String) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::with_template(template) {
            pb.set_style(style);
        }
        pb.set_prefix(prefix);
        pb.enable_steady_tick(TICK);
        pb
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// For the log bridge, which suspends drawing while a line is written.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedProgress = Arc<ProgressContext>;

/// `1234567` -> `"1,234,567"`.
pub fn fmt_num(n: u64) -> String {
    let digits = n.to_string();
    let head = digits.len() % 3;
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    out.push_str(&digits[..head]);
    for (i, group) in digits.as_bytes()[head..].chunks(3).enumerate() {
        if head > 0 || i > 0 {
            out.push(',');
        }
        // ASCII digits
        out.extend(group.iter().map(|&b| b as char));
    }
    out
}
