//! Declarative step-tree engine for acquisition routines.
//!
//! A routine is a tree of [`StepNode`]s with `init`/`main`/`end` (and
//! optionally `response`) callbacks. Siblings model a sequential list of
//! steps; a child models a nested sub-routine entered only once the whole
//! sibling chain at the current level has completed with a truthy result
//! ("check condition → yes-branch steps").
//!
//! [`TreeBuilder`] compiles a nested list-of-lists routine spec into two
//! mirrored trees, one of Signal modality and one of Data modality, and
//! hands each to its driver. The [`SignalDriver`] issues triggers and moves;
//! the [`DataDriver`] consumes the frames those triggers produce. Each
//! driver keeps a resumable cursor, so a single external event (a device
//! acknowledgment, a frame arrival) advances the walk by exactly as much as
//! the routine allows before the next blocking point.
//!
//! # Example
//!
//! ```
//! use acq_core::routine::{StepMode, StepSpec, TreeBuilder, DriverStatus};
//!
//! // Context shared by all step bodies of one driver.
//! struct Ctx { moves: u32 }
//!
//! let spec = vec![vec![
//!     StepSpec::<Ctx>::new("move_stage").signal_main(|cx: &mut Ctx| {
//!         cx.moves += 1;
//!         Ok(true)
//!     }),
//! ]];
//!
//! let (mut signal, _data) = TreeBuilder::new().build(spec);
//! let mut cx = Ctx { moves: 0 };
//! assert_eq!(signal.run(&mut cx, false).unwrap(), DriverStatus::Finished);
//! assert_eq!(cx.moves, 1);
//! ```

mod builder;
mod driver;
mod step;

pub use builder::{StepSpec, TreeBuilder};
pub use driver::{DataDriver, DriverStatus, SignalDriver};
pub use step::{FnStep, Modality, StepBody, StepId, StepMode, StepNode, StepTree, Tick};
