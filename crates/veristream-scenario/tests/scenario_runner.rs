//! End-to-end runs of complete scenarios against a scripted pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use sha1::{Digest, Sha1};
use veristream_core::{CollectingSink, FatalityFlags, IssueId, Reporter, Value};
use veristream_pipeline::testing::{ScriptedElement, ScriptedPipeline};
use veristream_pipeline::{
    BusMessage, Pipeline, PipelineState, SeekFlags, SinkInfo, StreamInfo, StreamKind,
    TrackSwitchBackend,
};
use veristream_scenario::{
    loader, ActionTypeRegistry, EngineSettings, Scenario, ScenarioRunner,
};

const RUN_BUDGET: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(2);

struct Harness {
    pipeline: Arc<ScriptedPipeline>,
    bus_rx: Receiver<BusMessage>,
    sink: Arc<CollectingSink>,
    _dir: tempfile::TempDir,
    scenario_path: PathBuf,
}

impl Harness {
    fn new(scenario_text: &str) -> Self {
        let dir = tempfile::tempdir().expect("create scenario dir");
        let scenario_path = dir.path().join("under-test.scenario");
        std::fs::write(&scenario_path, scenario_text).expect("write scenario");
        let (bus_tx, bus_rx) = crossbeam_channel::unbounded();
        Self {
            pipeline: Arc::new(ScriptedPipeline::new(bus_tx)),
            bus_rx,
            sink: CollectingSink::new(),
            _dir: dir,
            scenario_path,
        }
    }

    fn load(&self, settings: EngineSettings) -> Scenario {
        let registry = Arc::new(ActionTypeRegistry::with_builtins());
        let reporter = Reporter::new("under-test", self.sink.clone(), FatalityFlags::default());
        loader::load(
            self.scenario_path.to_str().expect("utf-8 path"),
            registry,
            reporter,
            settings,
        )
        .expect("scenario loads")
    }

    /// Run the scenario on a driver thread so the test can script the
    /// pipeline while it executes.
    fn spawn(&self, settings: EngineSettings) -> JoinHandle<Scenario> {
        let scenario = self.load(settings);
        let pipeline: Arc<dyn Pipeline> = self.pipeline.clone();
        let bus_rx = self.bus_rx.clone();
        std::thread::spawn(move || {
            ScenarioRunner::new(scenario, pipeline, bus_rx)
                .with_run_timeout(RUN_BUDGET)
                .run()
        })
    }

    fn wait_until(&self, what: &str, predicate: impl Fn() -> bool) {
        let deadline = Instant::now() + RUN_BUDGET;
        while !predicate() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(POLL);
        }
    }
}

fn secs(s: f64) -> Option<Duration> {
    Some(Duration::from_secs_f64(s))
}

#[test]
fn accurate_seek_updates_the_segment_and_stays_in_range() {
    let harness = Harness::new(
        "description, summary=\"accurate seek\", handles-states=true;\n\
         set-state, state=playing;\n\
         seek, playback-time=1.0, start=5.0, flags=accurate+flush;\n\
         stop, playback-time=10.0;\n",
    );

    let handle = harness.spawn(EngineSettings::default());

    // The scenario starts the pipeline itself, then waits for t=1.0.
    harness.wait_until("pipeline playing", || {
        harness.pipeline.current_state() == PipelineState::Playing
    });
    harness.pipeline.script_duration(secs(60.0));
    harness.pipeline.script_position(secs(1.5));

    harness.wait_until("seek to fire", || harness.pipeline.seeks().len() == 1);
    let seek = harness.pipeline.seeks()[0];
    assert_eq!(seek.start, secs(5.0));
    assert!(seek.flags.contains(SeekFlags::ACCURATE));
    assert!(seek.flags.contains(SeekFlags::FLUSH));

    // Let the stream reach the stop time.
    harness.pipeline.script_position(secs(10.5));
    let scenario = handle.join().expect("runner thread");

    assert_eq!(scenario.segment(), (Duration::from_secs(5), None));
    assert_eq!(harness.sink.count(IssueId::QueryPositionOutOfSegment), 0);
    assert_eq!(harness.sink.count(IssueId::ScenarioNotEnded), 0);
    assert_eq!(
        harness.pipeline.state_requests().last(),
        Some(&PipelineState::Null)
    );
}

#[test]
fn playback_time_expressions_use_scenario_variables() {
    let harness = Harness::new(
        "set-vars, base=2.0;\n\
         seek, playback-time=\"base*3\", start=0.0, flags=flush;\n",
    );

    let handle = harness.spawn(EngineSettings::default());
    harness.wait_until("pipeline playing", || {
        harness.pipeline.current_state() == PipelineState::Playing
    });

    harness.pipeline.script_duration(secs(60.0));
    harness.pipeline.script_position(secs(5.9));
    std::thread::sleep(Duration::from_millis(60));
    assert!(
        harness.pipeline.seeks().is_empty(),
        "seek fired before base*3 seconds"
    );

    harness.pipeline.script_position(secs(6.1));
    harness.wait_until("seek to fire", || harness.pipeline.seeks().len() == 1);
    let scenario = handle.join().expect("runner thread");
    assert_eq!(harness.pipeline.seeks()[0].start, secs(0.0));
    assert_eq!(scenario.pending_actions(), 0);
}

#[test]
fn repeat_runs_the_action_and_its_subaction_each_iteration() {
    let harness = Harness::new(
        "description, handles-states=true;\n\
         play;\n\
         pause, duration=0.02, repeat=2, \
         sub-action=\"set-property, target-element-name=vol, property-name=volume, \
         property-value=0.5\";\n",
    );
    let mut volume = ScriptedElement {
        factory: "volume".into(),
        class: "Filter/Effect/Audio".into(),
        ..ScriptedElement::default()
    };
    volume.properties.insert("volume".into(), Value::Double(1.0));
    harness.pipeline.script_element("vol", volume);

    let handle = harness.spawn(EngineSettings::default());
    let _ = handle.join().expect("runner thread");

    let pauses = harness
        .pipeline
        .state_requests()
        .iter()
        .filter(|s| **s == PipelineState::Paused)
        .count();
    assert_eq!(pauses, 3, "one initial run plus two repeats");

    let volume_sets = harness
        .pipeline
        .property_sets()
        .iter()
        .filter(|(element, property, _)| element == "vol" && property == "volume")
        .count();
    assert_eq!(volume_sets, 3, "each iteration runs the sub-action once");
    assert_eq!(
        harness.pipeline.property_value("vol", "volume"),
        Some(Value::Double(0.5))
    );
}

fn audio_streams_pipeline(harness: &Harness) {
    harness.pipeline.script_track_backend(TrackSwitchBackend::StreamCollection);
    harness.pipeline.script_streams(
        vec![
            StreamInfo {
                id: "A0".into(),
                kind: StreamKind::Audio,
            },
            StreamInfo {
                id: "A1".into(),
                kind: StreamKind::Audio,
            },
            StreamInfo {
                id: "V0".into(),
                kind: StreamKind::Video,
            },
        ],
        vec!["A0".into(), "V0".into()],
    );
}

#[test]
fn switch_track_completes_when_the_expected_streams_are_selected() {
    let harness = Harness::new("switch-track, type=audio, index=\"+1\";\n");
    audio_streams_pipeline(&harness);
    harness.pipeline.script_auto_streams_selected(true);

    let handle = harness.spawn(EngineSettings::default());
    let _ = handle.join().expect("runner thread");

    let requests = harness.pipeline.select_requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].contains(&"A1".to_string()));
    assert!(requests[0].contains(&"V0".to_string()));
    assert!(!requests[0].contains(&"A0".to_string()));
    assert_eq!(
        harness.sink.count(IssueId::ScenarioActionExecutionError),
        0
    );
}

#[test]
fn switch_track_reports_when_the_selection_does_not_match() {
    let harness = Harness::new("switch-track, type=audio, index=\"+1\";\n");
    audio_streams_pipeline(&harness);

    let handle = harness.spawn(EngineSettings::default());
    harness.wait_until("stream selection request", || {
        !harness.pipeline.select_requests().is_empty()
    });

    // The pipeline "answers" with the old selection.
    harness.pipeline.emit_bus(BusMessage::StreamsSelected {
        stream_ids: vec!["A0".into(), "V0".into()],
    });
    let _ = handle.join().expect("runner thread");

    let reports = harness.sink.reports();
    let mismatch = reports
        .iter()
        .find(|r| r.issue == IssueId::ScenarioActionExecutionError)
        .expect("a mismatch report");
    assert!(
        mismatch.message.contains("has not been activated"),
        "unexpected message: {}",
        mismatch.message
    );
}

#[test]
fn wait_multiplier_zero_disables_waits() {
    let harness = Harness::new(
        "description, handles-states=true;\n\
         wait, duration=5.0;\n",
    );
    let mut settings = EngineSettings::default();
    settings.wait_multiplier = 0.0;

    let started = Instant::now();
    let handle = harness.spawn(settings);
    let _ = handle.join().expect("runner thread");
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "the wait should have been skipped"
    );
}

#[test]
fn wait_multiplier_scales_the_wait() {
    let harness = Harness::new(
        "description, handles-states=true;\n\
         wait, duration=0.05;\n",
    );
    let mut settings = EngineSettings::default();
    settings.wait_multiplier = 2.0;

    let started = Instant::now();
    let handle = harness.spawn(settings);
    let _ = handle.join().expect("runner thread");
    assert!(
        started.elapsed() >= Duration::from_millis(100),
        "the wait should have been doubled"
    );
}

#[test]
fn check_last_sample_compares_sha1_checksums() {
    let data = b"one video frame".to_vec();
    let mut hasher = Sha1::new();
    hasher.update(&data);
    let checksum = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();

    let harness = Harness::new(&format!(
        "description, handles-states=true;\n\
         check-last-sample, sink-name=fakesink0, checksum=\"{checksum}\";\n\
         check-last-sample, sink-name=fakesink0, \
         checksum=\"0000000000000000000000000000000000000000\";\n",
    ));
    harness.pipeline.script_sink(
        SinkInfo {
            name: "fakesink0".into(),
            factory: "fakesink".into(),
            pad_caps: Some("video/x-raw".into()),
        },
        Some(veristream_pipeline::Sample {
            data,
            caps: Some("video/x-raw".into()),
        }),
    );

    let handle = harness.spawn(EngineSettings::default());
    let _ = handle.join().expect("runner thread");

    let mismatches: Vec<_> = harness
        .sink
        .reports()
        .into_iter()
        .filter(|r| r.issue == IssueId::ScenarioActionExecutionError)
        .collect();
    assert_eq!(mismatches.len(), 1, "only the wrong checksum reports");
    assert!(mismatches[0].message.contains(&checksum));
    assert!(mismatches[0].message.contains("0000000000000000"));
}

#[test]
fn eos_reports_not_executed_actions_and_synthesizes_stop() {
    let harness = Harness::new("seek, playback-time=9999.0, start=0.0;\n");

    let handle = harness.spawn(EngineSettings::default());
    harness.wait_until("pipeline playing", || {
        harness.pipeline.current_state() == PipelineState::Playing
    });
    harness.pipeline.script_duration(secs(60.0));
    harness.pipeline.script_position(secs(2.0));

    std::thread::sleep(Duration::from_millis(40));
    harness.pipeline.emit_bus(BusMessage::Eos);
    let _ = handle.join().expect("runner thread");

    assert_eq!(harness.sink.count(IssueId::ScenarioNotEnded), 1);
    let report = harness
        .sink
        .reports()
        .into_iter()
        .find(|r| r.issue == IssueId::ScenarioNotEnded)
        .expect("not-ended report");
    assert!(report.message.contains("1 actions were not executed"));
    // The synthesized stop tears the pipeline down.
    assert_eq!(
        harness.pipeline.state_requests().last(),
        Some(&PipelineState::Null)
    );
}

#[test]
fn async_actions_report_a_timeout() {
    let harness = Harness::new(
        "description, handles-states=true;\n\
         wait, duration=60.0, timeout=0.05;\n",
    );

    let scenario = harness.load(EngineSettings::default());
    let pipeline: Arc<dyn Pipeline> = harness.pipeline.clone();
    let bus_rx = harness.bus_rx.clone();
    let scenario = ScenarioRunner::new(scenario, pipeline, bus_rx)
        .with_run_timeout(Duration::from_millis(300))
        .run();

    assert_eq!(harness.sink.count(IssueId::ScenarioActionTimeout), 1);
    assert_eq!(scenario.pending_actions(), 1, "the wait is still in flight");
}

#[test]
fn buffering_blocks_dispatch_until_complete() {
    let harness = Harness::new(
        "seek, playback-time=1.0, start=2.0, flags=flush;\n\
         stop, playback-time=1.0;\n",
    );

    let handle = harness.spawn(EngineSettings::default());
    harness.wait_until("pipeline playing", || {
        harness.pipeline.current_state() == PipelineState::Playing
    });

    harness.pipeline.emit_bus(BusMessage::Buffering { percent: 40 });
    harness.pipeline.script_duration(secs(60.0));
    harness.pipeline.script_position(secs(1.5));

    std::thread::sleep(Duration::from_millis(60));
    assert!(
        harness.pipeline.seeks().is_empty(),
        "nothing may run while buffering"
    );

    harness.pipeline.emit_bus(BusMessage::Buffering { percent: 100 });
    harness.wait_until("seek after buffering", || {
        harness.pipeline.seeks().len() == 1
    });
    let _ = handle.join().expect("runner thread");
}

#[test]
fn wait_for_signal_completes_when_the_signal_fires() {
    let harness = Harness::new(
        "description, handles-states=true;\n\
         wait, signal-name=no-more-pads, target-element-name=demux;\n\
         emit-signal, target-element-name=demux, signal-name=drained;\n",
    );
    harness
        .pipeline
        .script_element("demux", ScriptedElement::default());

    let handle = harness.spawn(EngineSettings::default());
    std::thread::sleep(Duration::from_millis(40));
    assert!(
        harness.pipeline.emitted_signals().is_empty(),
        "the queue must wait on the signal"
    );

    harness.pipeline.fire_signal("demux", "no-more-pads");
    let _ = handle.join().expect("runner thread");
    assert_eq!(
        harness.pipeline.emitted_signals(),
        vec![("demux".to_string(), "drained".to_string())]
    );
}

#[test]
fn wait_for_message_completes_on_the_matching_message() {
    let harness = Harness::new(
        "description, handles-states=true;\n\
         wait, message-type=latency;\n",
    );

    let handle = harness.spawn(EngineSettings::default());
    std::thread::sleep(Duration::from_millis(40));
    assert!(!handle.is_finished(), "the wait must still be pending");

    harness.pipeline.emit_bus(BusMessage::Latency);
    let scenario = handle.join().expect("runner thread");
    assert_eq!(scenario.pending_actions(), 0);
}

#[test]
fn interlaced_appsrc_push_overlaps_the_following_actions() {
    let payload_dir = tempfile::tempdir().expect("payload dir");
    let payload = payload_dir.path().join("frames.bin");
    std::fs::write(&payload, vec![7u8; 64]).expect("write payload");

    let harness = Harness::new(&format!(
        "description, handles-states=true;\n\
         appsrc-push, target-element-name=src, file-name=\"{}\", offset=8, size=16;\n\
         emit-signal, target-element-name=src, signal-name=probe;\n",
        payload.display()
    ));
    harness
        .pipeline
        .script_element("src", ScriptedElement::default());
    harness.pipeline.script_defer_transit(true);

    let handle = harness.spawn(EngineSettings::default());

    // The push stays pending (pipeline below PAUSED -> interlaced), yet
    // the next action runs.
    harness.wait_until("follow-up action", || {
        !harness.pipeline.emitted_signals().is_empty()
    });
    assert!(!handle.is_finished(), "interlaced push still outstanding");

    harness.pipeline.release_transits();
    let _ = handle.join().expect("runner thread");

    let pushed = harness.pipeline.pushed_buffers();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].0, "src");
    assert_eq!(pushed[0].1.data, vec![7u8; 16]);
}

#[test]
fn config_interval_overrides_the_dispatch_tick() {
    let mut settings = EngineSettings::default();
    settings.apply_config_entries(
        &veristream_core::structure::parse_structures(
            "core, scenario-action-execution-interval=1;",
        )
        .unwrap(),
    );
    let harness = Harness::new(
        "description, handles-states=true;\n\
         wait, duration=0.01;\n",
    );
    let handle = harness.spawn(settings);
    let _ = handle.join().expect("runner thread");
}
