//! Cooperative cancellation token.
//!
//! There is no way to kill a native thread safely, so cancellation here is
//! a contract, not a mechanism: every worker body receives a token it is
//! expected to poll at its own safe points (between hardware commands,
//! inside wait loops). The scheduler's forced-termination path sets the
//! token and waits a bounded time for the body to notice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag between a worker body and the scheduler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested. Bodies should poll this at
    /// every safe point.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
