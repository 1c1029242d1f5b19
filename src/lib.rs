//! Acquisition execution core for a modular microscope control application.
//!
//! This crate implements the two pieces of the acquisition pipeline that sit
//! between the experiment description and the hardware drivers:
//!
//! - [`routine`]: a declarative step-tree engine. An acquisition routine is
//!   compiled by [`routine::TreeBuilder`] into two mirrored step trees walked
//!   by a [`routine::SignalDriver`] (issues triggers and moves) and a
//!   [`routine::DataDriver`] (consumes the resulting frames). The two drivers
//!   run on their own threads and stay in lock-step only through the device
//!   message channel, never through shared state.
//! - [`sched`]: a per-resource serialized task scheduler. Each named hardware
//!   resource (a stage axis, a camera) gets a FIFO queue of workers, and at
//!   most one worker per resource executes at any instant. Waiting workers
//!   can be cancelled; runaway workers can be terminated best-effort.
//!
//! # Architecture
//!
//! ```text
//! routine spec (nested lists)
//!        │ TreeBuilder::build
//!        ▼
//! ┌──────────────┐   device channel   ┌──────────────┐
//! │ SignalDriver │ ──── send ───────▶ │              │
//! │  (thread A)  │                    │ device layer │
//! ├──────────────┤                    │  (external)  │
//! │  DataDriver  │ ◀─── receive ───── │              │
//! │  (thread B)  │                    └──────────────┘
//! └──────────────┘
//!
//! ResourceScheduler: "stage_x" → [w1 running | w2 | w3 ...]
//!                    "camera"  → [w4 running]
//! ```
//!
//! Device drivers, GUI bindings, waveform math and the concrete DAQ pipe are
//! external collaborators; step bodies reach the hardware through the opaque
//! [`channel::MessageChannel`] seam.

pub mod channel;
pub mod error;
pub mod routine;
pub mod sched;

pub use channel::MessageChannel;
pub use error::{ChannelClosed, SchedulerError};
pub use routine::{
    DataDriver, DriverStatus, SignalDriver, StepBody, StepMode, StepSpec, TreeBuilder,
};
pub use sched::{CancelToken, ResourceScheduler, SchedulerConfig, Worker};
