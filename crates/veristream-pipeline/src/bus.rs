use crate::state::PipelineState;

/// Channel on which a pipeline delivers its observations to the engine.
pub type BusSender = crossbeam_channel::Sender<BusMessage>;

/// Asynchronous pipeline observations consumed by the bus reactor.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// A state transition completed somewhere in the pipeline.
    /// `from_pipeline` is true when the top-level pipeline itself changed.
    StateChanged {
        from_pipeline: bool,
        old: PipelineState,
        new: PipelineState,
    },
    /// An asynchronous operation (seek, async state change) finished.
    AsyncDone,
    Eos,
    Error { message: String },
    Buffering { percent: u8 },
    StreamsSelected { stream_ids: Vec<String> },
    StreamStart,
    Latency,
    Qos { dropped: Option<u64> },
    /// Named element/application message, matched by `wait, message-type=`.
    Element { name: String },
}

impl BusMessage {
    /// Wire name used by `wait, message-type=<name>`.
    pub fn type_name(&self) -> &str {
        match self {
            BusMessage::StateChanged { .. } => "state-changed",
            BusMessage::AsyncDone => "async-done",
            BusMessage::Eos => "eos",
            BusMessage::Error { .. } => "error",
            BusMessage::Buffering { .. } => "buffering",
            BusMessage::StreamsSelected { .. } => "streams-selected",
            BusMessage::StreamStart => "stream-start",
            BusMessage::Latency => "latency",
            BusMessage::Qos { .. } => "qos",
            BusMessage::Element { name } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_messages_match_by_their_own_name() {
        let msg = BusMessage::Element {
            name: "splitmuxsink-fragment-closed".into(),
        };
        assert_eq!(msg.type_name(), "splitmuxsink-fragment-closed");
        assert_eq!(BusMessage::Eos.type_name(), "eos");
    }
}
