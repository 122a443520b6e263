use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared flag for aborting long-running batch jobs.
///
/// Checked between tasks and between pages, never inside a pixel loop.
/// Partial outputs are discarded by the caller when a job reports cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
