//! Scheduler tuning knobs.

use serde::Deserialize;
use std::time::Duration;

/// Tuning for the forced-termination path of
/// [`ResourceScheduler`](super::ResourceScheduler).
///
/// Termination is cooperative and best-effort: the scheduler cancels the
/// worker's token, wakes it, and then polls up to `kill_retries` times with
/// `kill_backoff` between attempts for the worker thread to exit. Loadable
/// from configuration files:
///
/// ```toml
/// [scheduler]
/// kill_retries = 10
/// kill_backoff = "25ms"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Exit polls after cancelling a worker.
    pub kill_retries: u32,
    /// Sleep between exit polls.
    #[serde(with = "humantime_serde")]
    pub kill_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kill_retries: 20,
            kill_backoff: Duration::from_millis(25),
        }
    }
}
