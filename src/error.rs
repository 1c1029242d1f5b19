//! Error types for the acquisition core.
//!
//! Step-body failures are deliberately *not* modeled here: a failing
//! `init`/`main`/`end`/`response` callback returns `anyhow::Error` and
//! propagates untouched through the owning driver to the acquisition thread,
//! which logs it and stops its loop. Hiding a broken acquisition routine
//! behind a recovery path would corrupt the experiment, so the drivers fail
//! fast. The scheduler takes the opposite stance for submitted bodies (see
//! [`crate::sched`]): one bad task must not starve its resource queue.

use thiserror::Error;

/// Errors surfaced by [`crate::sched::ResourceScheduler`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler has been shut down and no longer accepts work.
    #[error("scheduler is shut down; resource '{resource}' no longer accepts work")]
    ShutDown {
        /// Resource the rejected submission targeted.
        resource: String,
    },

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread for resource '{resource}': {message}")]
    Spawn {
        /// Resource the submission targeted.
        resource: String,
        /// OS error description.
        message: String,
    },
}

/// The peer end of a [`crate::channel::MessageChannel`] is gone.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("device channel closed")]
pub struct ChannelClosed;
