//! Compiles a nested list-of-lists routine spec into the paired trees.
//!
//! A routine spec is a `Vec` of levels, each level a `Vec` of
//! [`StepSpec`] descriptors. The first descriptor of a level becomes the
//! `child` of the previous level's last node; every later descriptor
//! becomes the `sibling` of its predecessor within the level. Each
//! descriptor produces one Signal node and one Data node with identical
//! options, so both drivers see structurally identical trees.
//!
//! ```text
//! [[a], [b, c], [d]]        a
//!                           └── child: b ── sibling: c
//!                                           └── child: d
//! ```

use super::driver::{DataDriver, SignalDriver};
use super::step::{FnStep, Modality, StepBody, StepId, StepMode, StepNode, StepTree};

enum SpecBody<C> {
    Fns(FnStep<C>),
    Custom(Box<dyn StepBody<C>>),
}

impl<C: 'static> SpecBody<C> {
    fn into_body(self) -> Box<dyn StepBody<C>> {
        match self {
            SpecBody::Fns(f) => Box::new(f),
            SpecBody::Custom(b) => b,
        }
    }
}

/// Descriptor for one step of a routine: node options plus a body for each
/// modality.
///
/// Missing callbacks keep their defaults: `init` is a no-op, `main` does
/// nothing and reports true, `end` is constant-true (so a step omitting
/// `end` behaves as `OneStep` even when declared `MultiStep`).
pub struct StepSpec<C> {
    name: String,
    mode: StepMode,
    device_bound: bool,
    defer: bool,
    signal: SpecBody<C>,
    data: SpecBody<C>,
}

impl<C: 'static> StepSpec<C> {
    /// Descriptor with default (no-op, truthy) bodies for both modalities.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: StepMode::OneStep,
            device_bound: false,
            defer: false,
            signal: SpecBody::Fns(FnStep::noop()),
            data: SpecBody::Fns(FnStep::noop()),
        }
    }

    /// Set the repeat mode (copied onto both nodes).
    #[must_use]
    pub fn mode(mut self, mode: StepMode) -> Self {
        self.mode = mode;
        self
    }

    /// Mark completion as driven entirely by an external device event.
    ///
    /// Such a step ticks as a no-op placeholder while waiting; the routine
    /// only makes progress once the acquisition loop delivers the event.
    /// Liveness is therefore the loop's contract — pair a device-bound step
    /// with a real event source (or scheduler-level termination for a
    /// wedged device), or the routine stalls there.
    #[must_use]
    pub fn device_bound(mut self) -> Self {
        self.device_bound = true;
        self
    }

    /// Yield the driver tick when the walk reaches this step, instead of
    /// running it synchronously after its predecessor.
    #[must_use]
    pub fn defer_until_next_tick(mut self) -> Self {
        self.defer = true;
        self
    }

    /// Replace the Signal-side `main` callback.
    #[must_use]
    pub fn signal_main<F>(mut self, main: F) -> Self
    where
        F: FnMut(&mut C) -> anyhow::Result<bool> + Send + 'static,
    {
        match &mut self.signal {
            SpecBody::Fns(f) => f.set_main(Box::new(main)),
            SpecBody::Custom(_) => self.signal = SpecBody::Fns(FnStep::new(main)),
        }
        self
    }

    /// Attach a Signal-side `init` callback.
    #[must_use]
    pub fn signal_init<F>(mut self, init: F) -> Self
    where
        F: FnMut(&mut C) -> anyhow::Result<()> + Send + 'static,
    {
        if let SpecBody::Fns(f) = &mut self.signal {
            f.set_init(Box::new(init));
        }
        self
    }

    /// Attach a Signal-side `end` callback.
    #[must_use]
    pub fn signal_end<F>(mut self, end: F) -> Self
    where
        F: FnMut(&mut C) -> anyhow::Result<bool> + Send + 'static,
    {
        if let SpecBody::Fns(f) = &mut self.signal {
            f.set_end(Box::new(end));
        }
        self
    }

    /// Attach a Signal-side `response` callback; the step will pend on a
    /// device acknowledgment after each `main`.
    #[must_use]
    pub fn signal_response<F>(mut self, response: F) -> Self
    where
        F: FnMut(&mut C) -> anyhow::Result<bool> + Send + 'static,
    {
        if let SpecBody::Fns(f) = &mut self.signal {
            f.set_response(Box::new(response));
        }
        self
    }

    /// Replace the Data-side `main` callback.
    #[must_use]
    pub fn data_main<F>(mut self, main: F) -> Self
    where
        F: FnMut(&mut C) -> anyhow::Result<bool> + Send + 'static,
    {
        match &mut self.data {
            SpecBody::Fns(f) => f.set_main(Box::new(main)),
            SpecBody::Custom(_) => self.data = SpecBody::Fns(FnStep::new(main)),
        }
        self
    }

    /// Attach a Data-side `init` callback.
    #[must_use]
    pub fn data_init<F>(mut self, init: F) -> Self
    where
        F: FnMut(&mut C) -> anyhow::Result<()> + Send + 'static,
    {
        if let SpecBody::Fns(f) = &mut self.data {
            f.set_init(Box::new(init));
        }
        self
    }

    /// Attach a Data-side `end` callback.
    #[must_use]
    pub fn data_end<F>(mut self, end: F) -> Self
    where
        F: FnMut(&mut C) -> anyhow::Result<bool> + Send + 'static,
    {
        if let SpecBody::Fns(f) = &mut self.data {
            f.set_end(Box::new(end));
        }
        self
    }

    /// Install a full [`StepBody`] implementation for the Signal side,
    /// replacing any closure callbacks set so far.
    #[must_use]
    pub fn signal_body(mut self, body: impl StepBody<C> + 'static) -> Self {
        self.signal = SpecBody::Custom(Box::new(body));
        self
    }

    /// Install a full [`StepBody`] implementation for the Data side,
    /// replacing any closure callbacks set so far.
    #[must_use]
    pub fn data_body(mut self, body: impl StepBody<C> + 'static) -> Self {
        self.data = SpecBody::Custom(Box::new(body));
        self
    }

    fn into_nodes(self) -> (StepNode<C>, StepNode<C>) {
        let mut signal = StepNode::new(self.name.clone(), Modality::Signal, self.signal.into_body());
        let mut data = StepNode::new(self.name, Modality::Data, self.data.into_body());
        for node in [&mut signal, &mut data] {
            node.mode = self.mode;
            node.device_bound = self.device_bound;
            node.defer = self.defer;
        }
        (signal, data)
    }
}

/// Compiles routine specs into a `(SignalDriver, DataDriver)` pair.
#[derive(Debug, Clone, Copy)]
pub struct TreeBuilder {
    repeats: u32,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    /// Builder with a single pass over the tree.
    #[must_use]
    pub fn new() -> Self {
        Self { repeats: 1 }
    }

    /// Repeat the whole tree `repeats` times on the signal side.
    #[must_use]
    pub fn repeats(mut self, repeats: u32) -> Self {
        self.repeats = repeats;
        self
    }

    /// Build the paired drivers from a nested routine spec.
    ///
    /// The drivers share no mutable state; they communicate only through
    /// whatever channel the caller puts into the routine context.
    #[must_use]
    pub fn build<C: 'static>(self, levels: Vec<Vec<StepSpec<C>>>) -> (SignalDriver<C>, DataDriver<C>) {
        let mut signal_nodes: Vec<StepNode<C>> = Vec::new();
        let mut data_nodes: Vec<StepNode<C>> = Vec::new();

        let mut prev_level_last: Option<StepId> = None;
        for level in levels {
            let mut prev_in_level: Option<StepId> = None;
            for spec in level {
                let id = StepId(signal_nodes.len());
                let (signal, data) = spec.into_nodes();
                signal_nodes.push(signal);
                data_nodes.push(data);

                match prev_in_level {
                    // First node of a level hangs off the previous level's
                    // last node.
                    None => {
                        if let Some(parent) = prev_level_last {
                            signal_nodes[parent.0].child = Some(id);
                            data_nodes[parent.0].child = Some(id);
                        }
                    }
                    Some(prev) => {
                        signal_nodes[prev.0].sibling = Some(id);
                        data_nodes[prev.0].sibling = Some(id);
                    }
                }
                prev_in_level = Some(id);
            }
            if prev_in_level.is_some() {
                prev_level_last = prev_in_level;
            }
        }

        (
            SignalDriver::new(StepTree::new(signal_nodes), self.repeats),
            DataDriver::new(StepTree::new(data_nodes)),
        )
    }
}
