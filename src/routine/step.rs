//! Step nodes: the leaf unit of an acquisition routine.
//!
//! A step bundles a name, a [`StepBody`] (its callbacks), a repeat mode and
//! tree links. Steps live in an arena ([`StepTree`]) and point at each other
//! through [`StepId`] indices, so a routine tree is a flat `Vec` with no
//! reference cycles and the driver walk never recurses.
//!
//! One call to [`StepNode::run`] is one *tick*. A step may need several
//! ticks to finish: a `MultiStep` keeps ticking until its `end` callback
//! reports completion, and a Signal step with a `response` callback goes
//! *pending* after `main` until the caller re-invokes it with the device
//! acknowledgment in hand.

use anyhow::Result;
use tracing::trace;

/// How a step decides it is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMode {
    /// One tick is one execution; `end` is never consulted.
    #[default]
    OneStep,
    /// Tick until the `end` callback reports true.
    MultiStep,
}

/// Which driver a node belongs to.
///
/// The two modalities share the tick algorithm; response handling (the
/// pending sub-state between issuing a primary action and receiving its
/// acknowledgment) exists only on the Signal side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    /// Issues triggers and moves; may await device acknowledgments.
    Signal,
    /// Consumes frames produced by the signal side.
    Data,
}

/// Index of a step inside its [`StepTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepId(pub(crate) usize);

impl StepId {
    /// The root of every non-empty tree.
    pub(crate) const ROOT: StepId = StepId(0);
}

/// Callback set of one step, polymorphic over the routine context `C`.
///
/// `init` runs once per entry into the step (re-entry via repeats runs it
/// again), `main` is the body, `end` gates completion of `MultiStep` steps,
/// and `response` handles the asynchronous device acknowledgment for steps
/// that declare one via [`has_response`](StepBody::has_response).
///
/// The `bool` returned by `main`/`response` is the step's result: a true
/// result at the end of a sibling chain makes the driver descend into the
/// chain's child level.
///
/// Errors are not caught by the step or its driver; they propagate to the
/// thread running the driver loop, which is expected to log and stop.
pub trait StepBody<C>: Send {
    /// One-time setup for this entry into the step.
    fn init(&mut self, _cx: &mut C) -> Result<()> {
        Ok(())
    }

    /// The step's primary action.
    fn main(&mut self, cx: &mut C) -> Result<bool>;

    /// Completion check for `MultiStep` steps. Defaults to true, so a step
    /// that omits `end` behaves as `OneStep` regardless of declared mode.
    fn end(&mut self, _cx: &mut C) -> Result<bool> {
        Ok(true)
    }

    /// Handle the device acknowledgment for a pending step. Only called when
    /// [`has_response`](StepBody::has_response) is true.
    fn response(&mut self, _cx: &mut C) -> Result<bool> {
        Ok(true)
    }

    /// Whether this body declares a `response` callback.
    fn has_response(&self) -> bool {
        false
    }
}

type InitFn<C> = Box<dyn FnMut(&mut C) -> Result<()> + Send>;
type BodyFn<C> = Box<dyn FnMut(&mut C) -> Result<bool> + Send>;

/// Closure-backed [`StepBody`], the form most routine definitions use.
pub struct FnStep<C> {
    init: Option<InitFn<C>>,
    main: BodyFn<C>,
    end: Option<BodyFn<C>>,
    response: Option<BodyFn<C>>,
}

impl<C> FnStep<C> {
    /// Body with only a `main` callback.
    pub fn new<F>(main: F) -> Self
    where
        F: FnMut(&mut C) -> Result<bool> + Send + 'static,
    {
        Self {
            init: None,
            main: Box::new(main),
            end: None,
            response: None,
        }
    }

    /// Body whose `main` does nothing and reports true.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_| Ok(true))
    }

    /// Attach an `init` callback.
    #[must_use]
    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: FnMut(&mut C) -> Result<()> + Send + 'static,
    {
        self.init = Some(Box::new(init));
        self
    }

    /// Attach an `end` callback.
    #[must_use]
    pub fn with_end<F>(mut self, end: F) -> Self
    where
        F: FnMut(&mut C) -> Result<bool> + Send + 'static,
    {
        self.end = Some(Box::new(end));
        self
    }

    /// Attach a `response` callback, making the step pend on an
    /// acknowledgment after each `main`.
    #[must_use]
    pub fn with_response<F>(mut self, response: F) -> Self
    where
        F: FnMut(&mut C) -> Result<bool> + Send + 'static,
    {
        self.response = Some(Box::new(response));
        self
    }
}

// Setters used by the routine builder's closure-based descriptor API.
impl<C> FnStep<C> {
    pub(crate) fn set_init(&mut self, init: InitFn<C>) {
        self.init = Some(init);
    }

    pub(crate) fn set_main(&mut self, main: BodyFn<C>) {
        self.main = main;
    }

    pub(crate) fn set_end(&mut self, end: BodyFn<C>) {
        self.end = Some(end);
    }

    pub(crate) fn set_response(&mut self, response: BodyFn<C>) {
        self.response = Some(response);
    }
}

impl<C> StepBody<C> for FnStep<C> {
    fn init(&mut self, cx: &mut C) -> Result<()> {
        match &mut self.init {
            Some(f) => f(cx),
            None => Ok(()),
        }
    }

    fn main(&mut self, cx: &mut C) -> Result<bool> {
        (self.main)(cx)
    }

    fn end(&mut self, cx: &mut C) -> Result<bool> {
        match &mut self.end {
            Some(f) => f(cx),
            None => Ok(true),
        }
    }

    fn response(&mut self, cx: &mut C) -> Result<bool> {
        match &mut self.response {
            Some(f) => f(cx),
            None => Ok(true),
        }
    }

    fn has_response(&self) -> bool {
        self.response.is_some()
    }
}

/// Outcome of one tick of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The step is not finished; the driver must preserve its cursor and
    /// tick again on the next external event. `result` is `None` for the
    /// no-op placeholder tick of a device-bound step.
    Pending {
        /// Result of whatever body ran this tick, if one ran.
        result: Option<bool>,
    },
    /// The step finished; `result` decides descent at the end of a sibling
    /// chain.
    Done {
        /// Result of the final body call.
        result: bool,
    },
}

/// One node of a routine tree.
pub struct StepNode<C> {
    pub(crate) name: String,
    pub(crate) body: Box<dyn StepBody<C>>,
    pub(crate) modality: Modality,
    pub(crate) mode: StepMode,
    /// Completion is driven by an external device event, not by ticking.
    pub(crate) device_bound: bool,
    /// Yield control to the caller before running this step in the same
    /// tick that reached it.
    pub(crate) defer: bool,
    pub(crate) initialized: bool,
    pub(crate) awaiting_response: bool,
    pub(crate) child: Option<StepId>,
    pub(crate) sibling: Option<StepId>,
}

impl<C> StepNode<C> {
    pub(crate) fn new(
        name: impl Into<String>,
        modality: Modality,
        body: Box<dyn StepBody<C>>,
    ) -> Self {
        Self {
            name: name.into(),
            body,
            modality,
            mode: StepMode::OneStep,
            device_bound: false,
            defer: false,
            initialized: false,
            awaiting_response: false,
            child: None,
            sibling: None,
        }
    }

    /// Step name, as given to the builder.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while a device acknowledgment is outstanding.
    #[must_use]
    pub fn awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    /// Execute one tick.
    ///
    /// `ack_pending` tells the step that this invocation carries the device
    /// acknowledgment it has been waiting for (the payload itself travels in
    /// the context).
    pub fn run(&mut self, cx: &mut C, ack_pending: bool) -> Result<Tick> {
        if !self.initialized {
            self.body.init(cx)?;
            self.initialized = true;
        }

        let has_response = self.modality == Modality::Signal && self.body.has_response();

        let result = if !self.awaiting_response && !has_response {
            Some(self.body.main(cx)?)
        } else if !self.awaiting_response && !ack_pending {
            // Primary action issued; completion arrives asynchronously.
            let result = self.body.main(cx)?;
            self.awaiting_response = true;
            trace!(step = %self.name, "awaiting device response");
            return Ok(Tick::Pending {
                result: Some(result),
            });
        } else if self.awaiting_response && ack_pending {
            self.awaiting_response = false;
            Some(self.body.response(cx)?)
        } else if self.device_bound {
            // Placeholder tick: completion is driven entirely by an external
            // device event, so there is nothing to run.
            return Ok(Tick::Pending { result: None });
        } else {
            // Synchronous convenience path: the acknowledgment is already
            // available, so main and response run in the same tick.
            let main_result = self.body.main(cx)?;
            if has_response {
                self.awaiting_response = false;
                Some(self.body.response(cx)?)
            } else {
                Some(main_result)
            }
        };

        if self.mode == StepMode::MultiStep && !self.body.end(cx)? {
            return Ok(Tick::Pending { result });
        }

        // Reset so re-entry (via repeats) runs init() again.
        self.initialized = false;
        Ok(Tick::Done {
            result: result.unwrap_or(false),
        })
    }

    /// Drop transient run-time state, leaving the step as freshly built.
    pub(crate) fn clear_transient_state(&mut self) {
        self.initialized = false;
        self.awaiting_response = false;
    }
}

/// Arena of step nodes; index 0 is the root.
pub struct StepTree<C> {
    pub(crate) nodes: Vec<StepNode<C>>,
}

impl<C> StepTree<C> {
    pub(crate) fn new(nodes: Vec<StepNode<C>>) -> Self {
        Self { nodes }
    }

    /// Number of steps in the routine.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True for a routine with no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn node(&self, id: StepId) -> &StepNode<C> {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: StepId) -> &mut StepNode<C> {
        &mut self.nodes[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Log {
        calls: Vec<&'static str>,
    }

    fn node(body: FnStep<Log>, mode: StepMode) -> StepNode<Log> {
        let mut n = StepNode::new("s", Modality::Signal, Box::new(body));
        n.mode = mode;
        n
    }

    #[test]
    fn test_one_step_is_done_on_first_tick() {
        let mut cx = Log { calls: vec![] };
        let mut n = node(
            FnStep::new(|cx: &mut Log| {
                cx.calls.push("main");
                Ok(true)
            }),
            StepMode::OneStep,
        );

        let tick = n.run(&mut cx, false).unwrap();
        assert_eq!(tick, Tick::Done { result: true });
        assert_eq!(cx.calls, vec!["main"]);
        assert!(!n.initialized);
    }

    #[test]
    fn test_multi_step_ticks_until_end_reports_true() {
        // end() is false for the first 3 ticks, true on tick 4.
        let mut cx = Log { calls: vec![] };
        let mut remaining = 3u32;
        let body = FnStep::new(|cx: &mut Log| {
            cx.calls.push("main");
            Ok(true)
        })
        .with_end(move |_| {
            if remaining == 0 {
                Ok(true)
            } else {
                remaining -= 1;
                Ok(false)
            }
        });
        let mut n = node(body, StepMode::MultiStep);

        for _ in 0..3 {
            assert_eq!(
                n.run(&mut cx, false).unwrap(),
                Tick::Pending {
                    result: Some(true)
                }
            );
        }
        assert_eq!(n.run(&mut cx, false).unwrap(), Tick::Done { result: true });
        assert_eq!(cx.calls.len(), 4);
    }

    #[test]
    fn test_declared_multi_step_without_end_behaves_as_one_step() {
        let mut cx = Log { calls: vec![] };
        let mut n = node(FnStep::new(|_| Ok(true)), StepMode::MultiStep);
        assert_eq!(n.run(&mut cx, false).unwrap(), Tick::Done { result: true });
    }

    #[test]
    fn test_response_step_pends_until_acknowledged() {
        let mut cx = Log { calls: vec![] };
        let body = FnStep::new(|cx: &mut Log| {
            cx.calls.push("main");
            Ok(true)
        })
        .with_response(|cx: &mut Log| {
            cx.calls.push("response");
            Ok(true)
        });
        let mut n = node(body, StepMode::OneStep);

        // First tick issues the action and goes pending.
        assert_eq!(
            n.run(&mut cx, false).unwrap(),
            Tick::Pending {
                result: Some(true)
            }
        );
        assert!(n.awaiting_response());

        // Re-invocation with the acknowledgment completes the step.
        assert_eq!(n.run(&mut cx, true).unwrap(), Tick::Done { result: true });
        assert!(!n.awaiting_response());
        assert_eq!(cx.calls, vec!["main", "response"]);
    }

    #[test]
    fn test_data_modality_ignores_response_callback() {
        // Data steps have no pending sub-state; a response callback is
        // simply ignored by the resolution logic.
        let mut cx = Log { calls: vec![] };
        let body = FnStep::new(|cx: &mut Log| {
            cx.calls.push("main");
            Ok(true)
        })
        .with_response(|cx: &mut Log| {
            cx.calls.push("response");
            Ok(true)
        });
        let mut n = StepNode::new("d", Modality::Data, Box::new(body));

        assert_eq!(n.run(&mut cx, false).unwrap(), Tick::Done { result: true });
        assert_eq!(cx.calls, vec!["main"]);
    }

    #[test]
    fn test_device_bound_step_ticks_as_noop_while_waiting() {
        let mut cx = Log { calls: vec![] };
        let body = FnStep::new(|cx: &mut Log| {
            cx.calls.push("main");
            Ok(true)
        })
        .with_response(|cx: &mut Log| {
            cx.calls.push("response");
            Ok(true)
        });
        let mut n = node(body, StepMode::OneStep);
        n.device_bound = true;

        assert_eq!(
            n.run(&mut cx, false).unwrap(),
            Tick::Pending {
                result: Some(true)
            }
        );
        // Ticked again without the acknowledgment: placeholder no-op.
        assert_eq!(n.run(&mut cx, false).unwrap(), Tick::Pending { result: None });
        assert_eq!(cx.calls, vec!["main"]);

        // The acknowledgment finally lands.
        assert_eq!(n.run(&mut cx, true).unwrap(), Tick::Done { result: true });
        assert_eq!(cx.calls, vec!["main", "response"]);
    }

    #[test]
    fn test_reentry_runs_init_again() {
        let mut cx = Log { calls: vec![] };
        let body = FnStep::new(|cx: &mut Log| {
            cx.calls.push("main");
            Ok(true)
        })
        .with_init(|cx: &mut Log| {
            cx.calls.push("init");
            Ok(())
        });
        let mut n = node(body, StepMode::OneStep);

        n.run(&mut cx, false).unwrap();
        n.run(&mut cx, false).unwrap();
        assert_eq!(cx.calls, vec!["init", "main", "init", "main"]);
    }

    #[test]
    fn test_body_error_propagates() {
        let mut cx = Log { calls: vec![] };
        let mut n = node(
            FnStep::new(|_| anyhow::bail!("stage controller rebooted")),
            StepMode::OneStep,
        );
        let err = n.run(&mut cx, false).unwrap_err();
        assert!(err.to_string().contains("stage controller rebooted"));
    }
}
