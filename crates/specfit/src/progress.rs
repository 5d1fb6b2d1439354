use std::sync::atomic::{AtomicBool, Ordering};

/// Observer notified by the pipeline at iteration boundaries.
///
/// Stage and progress calls happen on the orchestrating thread.
/// [`ProgressMonitor::is_cancelled`] may also be polled by per-texel workers
/// between solver iterations, so a texel is never left half updated.
pub trait ProgressMonitor: Send + Sync {
    /// A new stage begins.
    fn on_stage(&self, _stage: &str) {}

    /// Fraction of the current stage completed, in `[0, 1]`.
    fn on_progress(&self, _fraction: f64) {}

    /// The whole fit finished.
    fn on_complete(&self) {}

    /// Whether the caller asked to stop.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A monitor that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressMonitor for NoProgress {}

/// A monitor that logs stages and cancels when a shared flag is raised.
#[derive(Debug, Default)]
pub struct LogProgress {
    cancelled: AtomicBool,
}

impl LogProgress {
    /// Create a monitor that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation at the next iteration boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl ProgressMonitor for LogProgress {
    fn on_stage(&self, stage: &str) {
        log::info!("stage: {stage}");
    }

    fn on_progress(&self, fraction: f64) {
        log::debug!("progress: {:.1}%", 100.0 * fraction);
    }

    fn on_complete(&self) {
        log::info!("fit complete");
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
