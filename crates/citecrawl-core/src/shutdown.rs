//! Graceful shutdown support via atomic flags

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide flag set by the SIGTERM/SIGINT handler.
///
/// Static so the signal handler can reach it without allocation.
pub fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

/// Cancellation flag owned by one background task.
///
/// Independent of the process flag: stopping a reporter does not stop the
/// crawl, and vice versa.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
