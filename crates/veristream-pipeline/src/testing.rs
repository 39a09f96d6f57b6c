//! Scripted in-memory [`Pipeline`] used by the engine's integration tests
//! and by embedders' smoke runs. Every call is recorded; bus traffic is
//! emitted on the channel handed to [`ScriptedPipeline::new`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use veristream_core::Value;

use crate::bus::{BusMessage, BusSender};
use crate::pipeline::{
    Buffer, Pipeline, PipelineError, Sample, SignalCallback, SignalHandle, SinkInfo, StreamInfo,
    TargetSelector, TrackSwitchBackend, TransitCallback,
};
use crate::seek::{SeekSpec, SeekType};
use crate::state::{PipelineState, StateChangeOutcome};

#[derive(Debug, Clone, Default)]
pub struct ScriptedElement {
    pub factory: String,
    pub class: String,
    pub properties: HashMap<String, Value>,
}

#[derive(Default)]
struct ScriptState {
    state: PipelineState,
    position: Option<Duration>,
    duration: Option<Duration>,
    latency: Option<Duration>,
    rate: f64,
    async_state_changes: bool,
    seek_applies_position: bool,
    track_backend: Option<TrackSwitchBackend>,
    elements: HashMap<String, ScriptedElement>,
    sinks: Vec<SinkInfo>,
    samples: HashMap<String, Sample>,
    streams: Vec<StreamInfo>,
    selected: Vec<String>,
    auto_streams_selected: bool,
    signal_watches: HashMap<SignalHandle, (String, String, SignalCallback)>,
    next_signal_id: u64,
    defer_transit: bool,
    pending_transits: Vec<TransitCallback>,
    // Recorded calls.
    seeks: Vec<SeekSpec>,
    state_requests: Vec<PipelineState>,
    property_sets: Vec<(String, String, Value)>,
    pushed: Vec<(String, Buffer)>,
    pushed_eos: Vec<String>,
    emitted_signals: Vec<(String, String)>,
    flushed: Vec<(String, bool)>,
    select_requests: Vec<Vec<String>>,
    dumped: Vec<PathBuf>,
    eos_sent: bool,
}

pub struct ScriptedPipeline {
    name: String,
    bus: BusSender,
    script: Mutex<ScriptState>,
}

impl ScriptedPipeline {
    pub fn new(bus: BusSender) -> Self {
        Self {
            name: "scripted-pipeline".to_string(),
            bus,
            script: Mutex::new(ScriptState {
                rate: 1.0,
                seek_applies_position: true,
                ..ScriptState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.script.lock().expect("scripted pipeline poisoned")
    }

    // Script configuration.

    /// Make `set_state` return `Async` and follow up with
    /// `state-changed` + `async-done` on the bus.
    pub fn script_async_state_changes(&self, yes: bool) {
        self.lock().async_state_changes = yes;
    }

    pub fn script_position(&self, position: Option<Duration>) {
        self.lock().position = position;
    }

    pub fn script_duration(&self, duration: Option<Duration>) {
        self.lock().duration = duration;
    }

    pub fn script_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    pub fn script_rate(&self, rate: f64) {
        self.lock().rate = rate;
    }

    pub fn script_track_backend(&self, backend: TrackSwitchBackend) {
        self.lock().track_backend = Some(backend);
    }

    pub fn script_element(&self, name: &str, element: ScriptedElement) {
        self.lock().elements.insert(name.to_string(), element);
    }

    pub fn script_sink(&self, sink: SinkInfo, sample: Option<Sample>) {
        let mut script = self.lock();
        if let Some(sample) = sample {
            script.samples.insert(sink.name.clone(), sample);
        }
        script.sinks.push(sink);
    }

    pub fn script_streams(&self, streams: Vec<StreamInfo>, selected: Vec<String>) {
        let mut script = self.lock();
        script.streams = streams;
        script.selected = selected;
    }

    /// Answer `select_streams` with a `streams-selected` bus message.
    pub fn script_auto_streams_selected(&self, yes: bool) {
        self.lock().auto_streams_selected = yes;
    }

    /// Hold pushed-buffer transit callbacks until
    /// [`ScriptedPipeline::release_transits`].
    pub fn script_defer_transit(&self, yes: bool) {
        self.lock().defer_transit = yes;
    }

    // Test-side triggers.

    pub fn release_transits(&self) {
        let pending = std::mem::take(&mut self.lock().pending_transits);
        for transit in pending {
            transit();
        }
    }

    pub fn fire_signal(&self, element: &str, signal: &str) {
        let script = self.lock();
        for (watched_element, watched_signal, callback) in script.signal_watches.values() {
            if watched_element == element && watched_signal == signal {
                callback();
            }
        }
    }

    pub fn emit_bus(&self, message: BusMessage) {
        let _ = self.bus.send(message);
    }

    // Recorded-call accessors.

    pub fn seeks(&self) -> Vec<SeekSpec> {
        self.lock().seeks.clone()
    }

    pub fn state_requests(&self) -> Vec<PipelineState> {
        self.lock().state_requests.clone()
    }

    pub fn property_sets(&self) -> Vec<(String, String, Value)> {
        self.lock().property_sets.clone()
    }

    pub fn pushed_buffers(&self) -> Vec<(String, Buffer)> {
        self.lock().pushed.clone()
    }

    pub fn emitted_signals(&self) -> Vec<(String, String)> {
        self.lock().emitted_signals.clone()
    }

    pub fn flushed(&self) -> Vec<(String, bool)> {
        self.lock().flushed.clone()
    }

    pub fn select_requests(&self) -> Vec<Vec<String>> {
        self.lock().select_requests.clone()
    }

    pub fn eos_sent(&self) -> bool {
        self.lock().eos_sent
    }

    pub fn property_value(&self, element: &str, property: &str) -> Option<Value> {
        self.lock()
            .elements
            .get(element)
            .and_then(|e| e.properties.get(property).cloned())
    }
}

impl Pipeline for ScriptedPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn current_state(&self) -> PipelineState {
        self.lock().state
    }

    fn set_state(&self, state: PipelineState) -> Result<StateChangeOutcome, PipelineError> {
        let (old, outcome) = {
            let mut script = self.lock();
            script.state_requests.push(state);
            let old = script.state;
            script.state = state;
            let outcome = if script.async_state_changes {
                StateChangeOutcome::Async
            } else {
                StateChangeOutcome::Success
            };
            (old, outcome)
        };
        let _ = self.bus.send(BusMessage::StateChanged {
            from_pipeline: true,
            old,
            new: state,
        });
        if outcome == StateChangeOutcome::Async {
            let _ = self.bus.send(BusMessage::AsyncDone);
        }
        Ok(outcome)
    }

    fn query_position(&self) -> Option<Duration> {
        self.lock().position
    }

    fn query_duration(&self) -> Option<Duration> {
        self.lock().duration
    }

    fn query_latency(&self) -> Option<Duration> {
        self.lock().latency
    }

    fn query_rate(&self) -> f64 {
        self.lock().rate
    }

    fn seek(&self, spec: &SeekSpec) -> Result<(), PipelineError> {
        {
            let mut script = self.lock();
            script.seeks.push(*spec);
            if script.seek_applies_position && spec.start_type == SeekType::Set {
                script.position = spec.start;
            }
        }
        let _ = self.bus.send(BusMessage::AsyncDone);
        Ok(())
    }

    fn send_eos(&self) -> Result<(), PipelineError> {
        self.lock().eos_sent = true;
        let _ = self.bus.send(BusMessage::Eos);
        Ok(())
    }

    fn flush(&self, element: &str, reset_time: bool) -> Result<(), PipelineError> {
        let mut script = self.lock();
        if !element.is_empty() && !script.elements.contains_key(element) {
            return Err(PipelineError::ElementNotFound {
                selector: format!("name `{element}`"),
            });
        }
        script.flushed.push((element.to_string(), reset_time));
        Ok(())
    }

    fn resolve_targets(&self, selector: &TargetSelector) -> Vec<String> {
        let script = self.lock();
        let mut names: Vec<String> = script
            .elements
            .iter()
            .filter(|(name, element)| match selector {
                TargetSelector::Name(n) => *name == n,
                TargetSelector::Class(c) => element.class == *c,
                TargetSelector::FactoryName(f) => element.factory == *f,
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn get_property(&self, element: &str, property: &str) -> Result<Value, PipelineError> {
        let script = self.lock();
        let Some(target) = script.elements.get(element) else {
            return Err(PipelineError::ElementNotFound {
                selector: format!("name `{element}`"),
            });
        };
        target
            .properties
            .get(property)
            .cloned()
            .ok_or_else(|| PipelineError::NoSuchProperty {
                element: element.to_string(),
                property: property.to_string(),
            })
    }

    fn set_property(
        &self,
        element: &str,
        property: &str,
        value: &Value,
    ) -> Result<(), PipelineError> {
        let mut script = self.lock();
        let Some(target) = script.elements.get_mut(element) else {
            return Err(PipelineError::ElementNotFound {
                selector: format!("name `{element}`"),
            });
        };
        if !target.properties.contains_key(property) {
            return Err(PipelineError::NoSuchProperty {
                element: element.to_string(),
                property: property.to_string(),
            });
        }
        target.properties.insert(property.to_string(), value.clone());
        script
            .property_sets
            .push((element.to_string(), property.to_string(), value.clone()));
        Ok(())
    }

    fn emit_signal(&self, element: &str, signal: &str) -> Result<(), PipelineError> {
        let mut script = self.lock();
        if !script.elements.contains_key(element) {
            return Err(PipelineError::ElementNotFound {
                selector: format!("name `{element}`"),
            });
        }
        script
            .emitted_signals
            .push((element.to_string(), signal.to_string()));
        Ok(())
    }

    fn connect_signal(
        &self,
        element: &str,
        signal: &str,
        callback: SignalCallback,
    ) -> Result<SignalHandle, PipelineError> {
        let mut script = self.lock();
        if !script.elements.contains_key(element) {
            return Err(PipelineError::ElementNotFound {
                selector: format!("name `{element}`"),
            });
        }
        script.next_signal_id += 1;
        let handle = SignalHandle(script.next_signal_id);
        script
            .signal_watches
            .insert(handle, (element.to_string(), signal.to_string(), callback));
        Ok(handle)
    }

    fn disconnect_signal(&self, handle: SignalHandle) {
        self.lock().signal_watches.remove(&handle);
    }

    fn push_buffer(
        &self,
        element: &str,
        buffer: Buffer,
        on_transit: TransitCallback,
    ) -> Result<(), PipelineError> {
        let transit = {
            let mut script = self.lock();
            if !script.elements.contains_key(element) {
                return Err(PipelineError::ElementNotFound {
                    selector: format!("name `{element}`"),
                });
            }
            script.pushed.push((element.to_string(), buffer));
            if script.defer_transit {
                script.pending_transits.push(on_transit);
                None
            } else {
                Some(on_transit)
            }
        };
        if let Some(transit) = transit {
            transit();
        }
        Ok(())
    }

    fn push_eos(&self, element: &str) -> Result<(), PipelineError> {
        let mut script = self.lock();
        if !script.elements.contains_key(element) {
            return Err(PipelineError::ElementNotFound {
                selector: format!("name `{element}`"),
            });
        }
        script.pushed_eos.push(element.to_string());
        Ok(())
    }

    fn track_backend(&self) -> TrackSwitchBackend {
        self.lock()
            .track_backend
            .unwrap_or(TrackSwitchBackend::StreamCollection)
    }

    fn streams(&self) -> Vec<StreamInfo> {
        self.lock().streams.clone()
    }

    fn selected_stream_ids(&self) -> Vec<String> {
        self.lock().selected.clone()
    }

    fn select_streams(&self, ids: &[String]) -> Result<(), PipelineError> {
        let auto = {
            let mut script = self.lock();
            script.select_requests.push(ids.to_vec());
            script.selected = ids.to_vec();
            script.auto_streams_selected
        };
        if auto {
            let _ = self.bus.send(BusMessage::StreamsSelected {
                stream_ids: ids.to_vec(),
            });
        }
        Ok(())
    }

    fn sinks(&self) -> Vec<SinkInfo> {
        self.lock().sinks.clone()
    }

    fn last_sample(&self, sink: &str) -> Option<Sample> {
        self.lock().samples.get(sink).cloned()
    }

    fn dump_graph(&self, path: &Path) -> Result<(), PipelineError> {
        self.lock().dumped.push(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_state_changes_reach_the_bus() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pipeline = ScriptedPipeline::new(tx);
        pipeline.set_state(PipelineState::Paused).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            BusMessage::StateChanged {
                from_pipeline: true,
                old: PipelineState::Null,
                new: PipelineState::Paused,
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn async_state_change_appends_async_done() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pipeline = ScriptedPipeline::new(tx);
        pipeline.script_async_state_changes(true);
        let outcome = pipeline.set_state(PipelineState::Playing).unwrap();
        assert_eq!(outcome, StateChangeOutcome::Async);
        rx.try_recv().unwrap();
        assert_eq!(rx.try_recv().unwrap(), BusMessage::AsyncDone);
    }

    #[test]
    fn seek_applies_position_and_completes() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pipeline = ScriptedPipeline::new(tx);
        let spec = SeekSpec {
            rate: 1.0,
            start_type: SeekType::Set,
            start: Some(Duration::from_secs(5)),
            ..SeekSpec::default()
        };
        pipeline.seek(&spec).unwrap();
        assert_eq!(pipeline.query_position(), Some(Duration::from_secs(5)));
        assert_eq!(rx.try_recv().unwrap(), BusMessage::AsyncDone);
    }

    #[test]
    fn property_access_checks_existence() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let pipeline = ScriptedPipeline::new(tx);
        let mut element = ScriptedElement {
            factory: "volume".into(),
            class: "Filter/Effect/Audio".into(),
            ..ScriptedElement::default()
        };
        element
            .properties
            .insert("volume".into(), Value::Double(1.0));
        pipeline.script_element("vol", element);

        pipeline
            .set_property("vol", "volume", &Value::Double(0.5))
            .unwrap();
        assert_eq!(
            pipeline.get_property("vol", "volume").unwrap(),
            Value::Double(0.5)
        );
        assert!(matches!(
            pipeline.get_property("vol", "mute"),
            Err(PipelineError::NoSuchProperty { .. })
        ));
        assert!(matches!(
            pipeline.get_property("gone", "volume"),
            Err(PipelineError::ElementNotFound { .. })
        ));
    }

    #[test]
    fn signal_watches_fire_and_disconnect() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let pipeline = ScriptedPipeline::new(tx);
        pipeline.script_element("demux", ScriptedElement::default());
        let (fired_tx, fired_rx) = crossbeam_channel::unbounded();
        let handle = pipeline
            .connect_signal(
                "demux",
                "no-more-pads",
                Box::new(move || {
                    let _ = fired_tx.send(());
                }),
            )
            .unwrap();
        pipeline.fire_signal("demux", "no-more-pads");
        assert!(fired_rx.try_recv().is_ok());
        pipeline.disconnect_signal(handle);
        pipeline.fire_signal("demux", "no-more-pads");
        assert!(fired_rx.try_recv().is_err());
    }
}
