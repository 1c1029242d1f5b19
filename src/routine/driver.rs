//! Drivers: resumable depth-first walkers over a step tree.
//!
//! One routine instance owns two drivers on two threads — the
//! [`SignalDriver`] issuing triggers/moves and the [`DataDriver`] consuming
//! the resulting frames. They hold mirrored trees built by
//! [`super::TreeBuilder`] and never share mutable state; the device channel
//! is their only synchronization point.
//!
//! A driver call advances the walk until something forces a yield:
//!
//! - the current step reports [`Tick::Pending`] (multi-tick body, or a
//!   signal step waiting for a device acknowledgment),
//! - the walk reaches a step flagged `defer_until_next_tick`, which needs a
//!   genuine external event before it may run,
//! - the pass completes (cursor cleared; signal side consumes one repeat).
//!
//! Traversal order is strict: run the current step; on completion move to
//! its sibling; once the sibling chain ends, descend into the last node's
//! child only if the chain's final result was true. The walk is an explicit
//! loop, so arbitrarily deep routines cannot overflow the stack.

use anyhow::Result;
use tracing::{debug, trace};

use super::step::{StepId, StepTree, Tick};

/// What a driver invocation accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// A step is mid-flight (multi-tick, pending acknowledgment, or parked
    /// on a deferred step); tick again on the next external event.
    Pending,
    /// One full pass over the tree completed; the signal side has repeats
    /// remaining.
    PassComplete,
    /// The routine is complete; further calls return `Finished` immediately.
    Finished,
}

/// Shared cursor state for both driver kinds.
struct Cursor {
    current: Option<StepId>,
    finished: bool,
}

impl Cursor {
    fn new() -> Self {
        Self {
            current: None,
            finished: false,
        }
    }
}

/// Result of one walk invocation, before repeat accounting.
enum Pass {
    Pending,
    Complete,
}

/// Advance the walk as far as this tick allows. Resumes from
/// `cursor.current` when a previous invocation yielded mid-tree.
fn walk<C>(
    tree: &mut StepTree<C>,
    cursor: &mut Cursor,
    cx: &mut C,
    mut ack_pending: bool,
) -> Result<Pass> {
    let mut current = cursor.current.unwrap_or(StepId::ROOT);

    loop {
        // Run the sibling chain at the current level.
        let chain_result = loop {
            let was_awaiting = tree.node(current).awaiting_response();
            match tree.node_mut(current).run(cx, ack_pending)? {
                Tick::Pending { .. } => {
                    cursor.current = Some(current);
                    return Ok(Pass::Pending);
                }
                Tick::Done { result } => {
                    trace!(step = %tree.node(current).name(), result, "step complete");
                    if was_awaiting {
                        // The acknowledgment belonged to this step; later
                        // steps in the same tick must not see it.
                        ack_pending = false;
                    }
                    match tree.node(current).sibling {
                        None => break result,
                        Some(next) => {
                            current = next;
                            if tree.node(current).defer {
                                cursor.current = Some(current);
                                return Ok(Pass::Pending);
                            }
                        }
                    }
                }
            }
        };

        // Descend only when the whole chain finished with a truthy result.
        if chain_result {
            if let Some(child) = tree.node(current).child {
                current = child;
                if tree.node(current).defer {
                    cursor.current = Some(current);
                    return Ok(Pass::Pending);
                }
                continue;
            }
        }

        cursor.current = None;
        return Ok(Pass::Complete);
    }
}

/// Driver for the signal-generation side of a routine.
///
/// Repeats the whole tree `repeats_requested` times, then reports
/// [`DriverStatus::Finished`].
pub struct SignalDriver<C> {
    tree: StepTree<C>,
    cursor: Cursor,
    repeats_requested: u32,
    repeats_remaining: u32,
}

impl<C> SignalDriver<C> {
    pub(crate) fn new(tree: StepTree<C>, repeats: u32) -> Self {
        Self {
            tree,
            cursor: Cursor::new(),
            repeats_requested: repeats,
            repeats_remaining: repeats,
        }
    }

    /// Advance the routine by one tick.
    ///
    /// `ack_pending` marks this invocation as carrying the device
    /// acknowledgment the current step is waiting for; the payload itself
    /// travels in `cx`.
    ///
    /// # Errors
    ///
    /// Propagates any step-body failure unmodified.
    pub fn run(&mut self, cx: &mut C, ack_pending: bool) -> Result<DriverStatus> {
        if self.cursor.finished || self.tree.is_empty() {
            self.cursor.finished = true;
            return Ok(DriverStatus::Finished);
        }

        match walk(&mut self.tree, &mut self.cursor, cx, ack_pending)? {
            Pass::Pending => Ok(DriverStatus::Pending),
            Pass::Complete => {
                self.repeats_remaining = self.repeats_remaining.saturating_sub(1);
                if self.repeats_remaining == 0 {
                    self.cursor.finished = true;
                    debug!(
                        repeats = self.repeats_requested,
                        "signal routine finished"
                    );
                    Ok(DriverStatus::Finished)
                } else {
                    trace!(remaining = self.repeats_remaining, "signal pass complete");
                    Ok(DriverStatus::PassComplete)
                }
            }
        }
    }

    /// Restore the driver to its freshly built state: cursor cleared,
    /// repeats refilled, all transient step flags dropped.
    pub fn reset(&mut self) {
        self.cursor = Cursor::new();
        self.repeats_remaining = self.repeats_requested;
        for node in &mut self.tree.nodes {
            node.clear_transient_state();
        }
    }

    /// True once all requested repeats have completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cursor.finished
    }

    /// Repeats left, including the pass currently in flight.
    #[must_use]
    pub fn repeats_remaining(&self) -> u32 {
        self.repeats_remaining
    }

    /// Name of the step the cursor is parked on, if mid-pass.
    #[must_use]
    pub fn current_step(&self) -> Option<&str> {
        self.cursor.current.map(|id| self.tree.node(id).name())
    }
}

/// Driver for the data-consumption side of a routine.
///
/// Has no repeat counter of its own: the acquisition loop keeps ticking it
/// for as long as the signal side keeps producing, and stops when the
/// signal driver finishes.
pub struct DataDriver<C> {
    tree: StepTree<C>,
    cursor: Cursor,
}

impl<C> DataDriver<C> {
    pub(crate) fn new(tree: StepTree<C>) -> Self {
        Self {
            tree,
            cursor: Cursor::new(),
        }
    }

    /// Advance the routine by one tick.
    ///
    /// # Errors
    ///
    /// Propagates any step-body failure unmodified.
    pub fn run(&mut self, cx: &mut C) -> Result<DriverStatus> {
        if self.cursor.finished || self.tree.is_empty() {
            self.cursor.finished = true;
            return Ok(DriverStatus::Finished);
        }

        match walk(&mut self.tree, &mut self.cursor, cx, false)? {
            Pass::Pending => Ok(DriverStatus::Pending),
            Pass::Complete => {
                trace!("data pass complete");
                Ok(DriverStatus::PassComplete)
            }
        }
    }

    /// Clear the cursor and all transient step flags.
    pub fn reset(&mut self) {
        self.cursor = Cursor::new();
        for node in &mut self.tree.nodes {
            node.clear_transient_state();
        }
    }

    /// Name of the step the cursor is parked on, if mid-pass.
    #[must_use]
    pub fn current_step(&self) -> Option<&str> {
        self.cursor.current.map(|id| self.tree.node(id).name())
    }
}
