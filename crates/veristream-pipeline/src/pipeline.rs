use std::fmt;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use veristream_core::Value;

use crate::seek::SeekSpec;
use crate::state::{PipelineState, StateChangeOutcome};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("no element matches {selector}")]
    ElementNotFound { selector: String },
    #[error("element `{element}` has no property `{property}`")]
    NoSuchProperty { element: String, property: String },
    #[error("property `{property}` on `{element}` expects {expected}")]
    PropertyTypeMismatch {
        element: String,
        property: String,
        expected: &'static str,
    },
    #[error("state change to {target} failed")]
    StateChangeFailed { target: PipelineState },
    #[error("pad of `{element}` is not linked")]
    PadNotLinked { element: String },
    #[error("pipeline does not support {operation}")]
    NotSupported { operation: &'static str },
    #[error("{0}")]
    Io(String),
}

/// How elements are looked up: by instance name, by element class, or by
/// factory name. Exactly one criterion is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    Name(String),
    Class(String),
    FactoryName(String),
}

impl TargetSelector {
    /// Build a selector from the conventional structure fields
    /// `target-element-name` / `target-element-klass` /
    /// `target-element-factory-name`.
    pub fn from_fields(
        name: Option<&str>,
        class: Option<&str>,
        factory: Option<&str>,
    ) -> Option<TargetSelector> {
        if let Some(name) = name {
            return Some(TargetSelector::Name(name.to_string()));
        }
        if let Some(class) = class {
            return Some(TargetSelector::Class(class.to_string()));
        }
        factory.map(|f| TargetSelector::FactoryName(f.to_string()))
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSelector::Name(n) => write!(f, "name `{n}`"),
            TargetSelector::Class(c) => write!(f, "class `{c}`"),
            TargetSelector::FactoryName(n) => write!(f, "factory `{n}`"),
        }
    }
}

/// Which mechanism the pipeline exposes for switching tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSwitchBackend {
    /// Input-selector elements, one per track type.
    Selector,
    /// `current-audio` / `n-audio`-style properties plus a flags property.
    PlaybinFlags,
    /// Stream collections and `select_streams`.
    StreamCollection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Audio,
    Video,
    Text,
    Unknown,
}

impl StreamKind {
    pub fn from_name(s: &str) -> StreamKind {
        match s {
            "audio" => StreamKind::Audio,
            "video" => StreamKind::Video,
            "text" => StreamKind::Text,
            _ => StreamKind::Unknown,
        }
    }

    pub fn property_suffix(&self) -> &'static str {
        match self {
            StreamKind::Audio => "audio",
            StreamKind::Video => "video",
            StreamKind::Text => "text",
            StreamKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: String,
    pub kind: StreamKind,
}

/// Descriptor for a sink element, used by `check-last-sample` matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkInfo {
    pub name: String,
    pub factory: String,
    pub pad_caps: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Buffer {
    pub data: Vec<u8>,
    pub caps: Option<String>,
}

/// A sink's most recently rendered buffer plus its caps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub data: Vec<u8>,
    pub caps: Option<String>,
}

/// Token for a connected signal watch; pass back to
/// [`Pipeline::disconnect_signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalHandle(pub u64);

/// Callback fired from a pipeline thread. Implementations must only do
/// channel sends; the engine's completion channel is the intended target.
pub type SignalCallback = Box<dyn Fn() + Send + Sync>;

/// One-shot callback fired when a pushed buffer transits the downstream
/// peer pad.
pub type TransitCallback = Box<dyn FnOnce() + Send>;

/// The externally constructed pipeline, as seen by the scenario engine.
///
/// Everything here is assumed cheap; blocking work stays on the pipeline
/// side. Element-addressed methods take the element's instance name; the
/// empty string addresses the top-level pipeline object itself.
pub trait Pipeline: Send + Sync {
    fn name(&self) -> &str;

    // State.
    fn current_state(&self) -> PipelineState;
    fn set_state(&self, state: PipelineState) -> Result<StateChangeOutcome, PipelineError>;

    // Queries.
    fn query_position(&self) -> Option<Duration>;
    fn query_duration(&self) -> Option<Duration>;
    fn query_latency(&self) -> Option<Duration>;
    /// Playback rate of the current segment.
    fn query_rate(&self) -> f64;

    // Flow control.
    fn seek(&self, spec: &SeekSpec) -> Result<(), PipelineError>;
    fn send_eos(&self) -> Result<(), PipelineError>;
    fn flush(&self, element: &str, reset_time: bool) -> Result<(), PipelineError>;

    // Elements.
    fn resolve_targets(&self, selector: &TargetSelector) -> Vec<String>;
    fn get_property(&self, element: &str, property: &str) -> Result<Value, PipelineError>;
    fn set_property(
        &self,
        element: &str,
        property: &str,
        value: &Value,
    ) -> Result<(), PipelineError>;
    fn emit_signal(&self, element: &str, signal: &str) -> Result<(), PipelineError>;
    fn connect_signal(
        &self,
        element: &str,
        signal: &str,
        callback: SignalCallback,
    ) -> Result<SignalHandle, PipelineError>;
    fn disconnect_signal(&self, handle: SignalHandle);

    // App sources.
    fn push_buffer(
        &self,
        element: &str,
        buffer: Buffer,
        on_transit: TransitCallback,
    ) -> Result<(), PipelineError>;
    fn push_eos(&self, element: &str) -> Result<(), PipelineError>;

    // Tracks.
    fn track_backend(&self) -> TrackSwitchBackend;
    fn streams(&self) -> Vec<StreamInfo>;
    fn selected_stream_ids(&self) -> Vec<String>;
    fn select_streams(&self, ids: &[String]) -> Result<(), PipelineError>;

    // Sinks.
    fn sinks(&self) -> Vec<SinkInfo>;
    fn last_sample(&self, sink: &str) -> Option<Sample>;

    // Observability.
    fn dump_graph(&self, path: &Path) -> Result<(), PipelineError>;
}
