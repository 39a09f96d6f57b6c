//! Interface between the scenario engine and an externally constructed
//! streaming pipeline.
//!
//! The engine never builds a pipeline; it drives one through the
//! [`Pipeline`] trait and observes it through [`BusMessage`]s delivered on
//! a channel. [`testing::ScriptedPipeline`] is a scripted in-memory
//! implementation for tests and embedder smoke runs.

pub mod bus;
pub mod pipeline;
pub mod seek;
pub mod state;
pub mod testing;

pub use bus::{BusMessage, BusSender};
pub use pipeline::{
    Buffer, Pipeline, PipelineError, Sample, SignalHandle, SinkInfo, StreamInfo, StreamKind,
    TargetSelector, TrackSwitchBackend,
};
pub use seek::{SeekFlags, SeekSpec, SeekType};
pub use state::{PipelineState, StateChangeOutcome};
