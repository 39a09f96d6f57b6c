//! Scenario state: the three action queues, segment bookkeeping and the
//! flags the dispatcher and bus reactor coordinate through.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;
use veristream_core::time::{duration_secs_f64, secs_to_duration};
use veristream_core::{IssueId, Reporter, Structure, Value};
use veristream_pipeline::{Pipeline, PipelineState, SeekFlags, SeekSpec, SignalHandle};

use crate::action::{Action, ActionArena, ActionId};
use crate::config::EngineSettings;
use crate::error::ScenarioError;
use crate::expr;
use crate::types::ActionTypeRegistry;
use crate::vars::VariableStore;

/// Default tolerance around seek positions, 1 ms.
pub const DEFAULT_SEEK_POS_TOLERANCE: Duration = Duration::from_millis(1);

/// Fields of the scenario's `description` record.
#[derive(Debug, Clone, Default)]
pub struct ScenarioDescription {
    pub summary: Option<String>,
    pub is_config: bool,
    /// The engine drives state transitions; otherwise the external
    /// driver does.
    pub handles_states: bool,
    pub pipeline_name: Option<String>,
    pub max_latency: Option<Duration>,
    pub max_dropped: Option<u64>,
    pub seek: bool,
    pub reverse_playback: bool,
    pub need_clock_sync: bool,
    pub min_media_duration: Option<f64>,
    pub min_audio_track: Option<u32>,
    pub min_video_track: Option<u32>,
    pub duration: Option<f64>,
    /// Unrecognized fields, kept for forward compatibility.
    pub extra: Vec<(String, Value)>,
}

impl ScenarioDescription {
    pub fn from_structure(structure: &Structure) -> Self {
        let mut description = Self::default();
        for (key, value) in structure.fields() {
            match key {
                "summary" => description.summary = value.as_str().map(str::to_string),
                "is-config" => description.is_config = value.as_bool().unwrap_or(false),
                "handles-states" => {
                    description.handles_states = value.as_bool().unwrap_or(false)
                }
                "pipeline-name" => {
                    description.pipeline_name = value.as_str().map(str::to_string)
                }
                "max-latency" => {
                    description.max_latency = value.as_double().and_then(secs_to_duration)
                }
                "max-dropped" => {
                    description.max_dropped =
                        value.as_int().filter(|v| *v >= 0).map(|v| v as u64)
                }
                "seek" => description.seek = value.as_bool().unwrap_or(false),
                "reverse-playback" => {
                    description.reverse_playback = value.as_bool().unwrap_or(false)
                }
                "need-clock-sync" => {
                    description.need_clock_sync = value.as_bool().unwrap_or(false)
                }
                "min-media-duration" => description.min_media_duration = value.as_double(),
                "min-audio-track" => {
                    description.min_audio_track =
                        value.as_int().filter(|v| *v >= 0).map(|v| v as u32)
                }
                "min-video-track" => {
                    description.min_video_track =
                        value.as_int().filter(|v| *v >= 0).map(|v| v as u32)
                }
                "duration" => description.duration = value.as_double(),
                _ => description.extra.push((key.to_string(), value.clone())),
            }
        }
        description
    }
}

/// Work item posted to the main loop, the only cross-thread entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineTask {
    /// `set_done` for the given action.
    Completed(ActionId),
}

/// Thread-safe completion handle handed to pad probes, signal watches and
/// timers. Sending is all it does; the main loop applies the state
/// transition after verifying the action generation.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    tx: Sender<EngineTask>,
    id: ActionId,
}

impl CompletionHandle {
    pub fn set_done(&self) {
        let _ = self.tx.send(EngineTask::Completed(self.id));
    }
}

/// Deferred main-loop work with a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeadlineKind {
    /// A `wait duration=` elapses.
    WaitDone(ActionId),
    /// `pause duration=` expired; restore PLAYING.
    RestorePlaying,
    /// Plain dispatcher kick.
    Dispatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Deadline {
    pub at: Instant,
    pub kind: DeadlineKind,
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at).then(self.kind.cmp(&other.kind))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A loaded scenario and everything the engine mutates while running it.
pub struct Scenario {
    pub(crate) reporter: Reporter,
    pub(crate) registry: Arc<ActionTypeRegistry>,
    pub(crate) settings: EngineSettings,
    pub(crate) description: ScenarioDescription,
    pipeline: Option<Weak<dyn Pipeline>>,

    pub(crate) arena: ActionArena,
    /// Ordered main queue.
    pub(crate) actions: VecDeque<ActionId>,
    /// Actions running in parallel with the main queue.
    pub(crate) interlaced_actions: Vec<ActionId>,
    /// Actions waiting for matching element creation.
    pub(crate) on_addition_actions: Vec<ActionId>,
    pub(crate) vars: VariableStore,

    // Derived from the last seek.
    pub(crate) segment_start: Duration,
    pub(crate) segment_stop: Option<Duration>,
    pub(crate) seek_flags: SeekFlags,
    pub(crate) last_seek: Option<SeekSpec>,
    pub(crate) seeked_in_pause: bool,
    pub(crate) seek_pos_tol: Duration,

    pub(crate) target_state: Option<PipelineState>,
    pub(crate) changing_state: bool,
    pub(crate) needs_async_done: bool,
    pub(crate) buffering: bool,
    pub(crate) got_eos: bool,
    pub(crate) needs_playback_parsing: bool,

    pub(crate) pending_switch_track: Option<ActionId>,
    pub(crate) message_wait: Option<(ActionId, String)>,
    pub(crate) signal_wait: Option<(ActionId, SignalHandle)>,

    pub(crate) dropped: Option<u64>,
    pub(crate) max_dropped: Option<u64>,
    pub(crate) max_latency: Option<Duration>,

    pub(crate) action_execution_interval: Duration,
    /// Mirrors the single outstanding dispatcher source of the original
    /// design: no new dispatch is scheduled while one is armed or a wait
    /// is in flight.
    pub(crate) dispatch_armed: bool,
    pub(crate) stopping: bool,

    /// Plugin-feature rank overrides collected from config actions.
    pub(crate) feature_ranks: HashMap<String, u32>,
    pub(crate) disabled_features: Vec<String>,

    pub(crate) task_tx: Sender<EngineTask>,
    task_rx: Option<Receiver<EngineTask>>,
    pub(crate) deadlines: BinaryHeap<Reverse<Deadline>>,
    pub(crate) action_counter: u32,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Scenario {
    pub fn new(reporter: Reporter, registry: Arc<ActionTypeRegistry>, settings: EngineSettings) -> Self {
        let (task_tx, task_rx) = crossbeam_channel::unbounded();
        let action_execution_interval = settings.action_execution_interval;
        let max_latency = settings.max_latency;
        let max_dropped = settings.max_dropped;
        Self {
            reporter,
            registry,
            settings,
            description: ScenarioDescription::default(),
            pipeline: None,
            arena: ActionArena::new(),
            actions: VecDeque::new(),
            interlaced_actions: Vec::new(),
            on_addition_actions: Vec::new(),
            vars: VariableStore::new(),
            segment_start: Duration::ZERO,
            segment_stop: None,
            seek_flags: SeekFlags::NONE,
            last_seek: None,
            seeked_in_pause: false,
            seek_pos_tol: DEFAULT_SEEK_POS_TOLERANCE,
            target_state: None,
            changing_state: false,
            needs_async_done: false,
            buffering: false,
            got_eos: false,
            needs_playback_parsing: false,
            pending_switch_track: None,
            message_wait: None,
            signal_wait: None,
            dropped: None,
            max_dropped,
            max_latency,
            action_execution_interval,
            dispatch_armed: false,
            stopping: false,
            feature_ranks: HashMap::new(),
            disabled_features: Vec::new(),
            task_tx,
            task_rx: Some(task_rx),
            deadlines: BinaryHeap::new(),
            action_counter: 0,
        }
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn description(&self) -> &ScenarioDescription {
        &self.description
    }

    pub fn vars(&self) -> &VariableStore {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut VariableStore {
        &mut self.vars
    }

    pub fn registry(&self) -> &ActionTypeRegistry {
        &self.registry
    }

    /// Remaining main-queue length, for introspection and tests.
    pub fn pending_actions(&self) -> usize {
        self.actions.len()
    }

    /// Human-readable rendering of every queued action, main queue first,
    /// then the on-addition queue.
    pub fn describe_pending(&self) -> Vec<String> {
        let render = |id: &ActionId| {
            self.arena.get(*id).map(|action| {
                format!(
                    "{:3}. {} (playback-time: {})",
                    action.action_number,
                    action.describe(),
                    veristream_core::time::format_time(action.playback_time),
                )
            })
        };
        self.actions
            .iter()
            .filter_map(render)
            .chain(
                self.on_addition_actions
                    .iter()
                    .filter_map(|id| render(id).map(|line| format!("{line} [on-addition]"))),
            )
            .collect()
    }

    /// The segment bounds derived from the last completed seek.
    pub fn segment(&self) -> (Duration, Option<Duration>) {
        (self.segment_start, self.segment_stop)
    }

    /// Whether the pipeline reached end of stream.
    pub fn got_eos(&self) -> bool {
        self.got_eos
    }

    /// Feature-rank overrides collected from `set-rank` /
    /// `set-feature-rank` config actions, for the embedder to apply when
    /// assembling the pipeline.
    pub fn feature_ranks(&self) -> &HashMap<String, u32> {
        &self.feature_ranks
    }

    /// Plugins disabled through `disable-plugin` actions.
    pub fn disabled_features(&self) -> &[String] {
        &self.disabled_features
    }

    pub(crate) fn attach_pipeline(&mut self, pipeline: &Arc<dyn Pipeline>) {
        self.pipeline = Some(Arc::downgrade(pipeline));
    }

    /// Reacquire the pipeline for the duration of one handler.
    pub fn pipeline(&self) -> Option<Arc<dyn Pipeline>> {
        self.pipeline.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn take_task_receiver(&mut self) -> Receiver<EngineTask> {
        self.task_rx
            .take()
            .expect("scenario task receiver already taken")
    }

    pub fn completion_handle(&self, id: ActionId) -> CompletionHandle {
        CompletionHandle {
            tx: self.task_tx.clone(),
            id,
        }
    }

    /// Execute-on-idle mode: no synchronous dispatcher recursion.
    pub(crate) fn execute_on_idle(&self) -> bool {
        self.action_execution_interval.is_zero()
    }

    pub(crate) fn arm_dispatcher(&mut self) {
        self.dispatch_armed = true;
    }

    pub(crate) fn schedule(&mut self, delay: Duration, kind: DeadlineKind) {
        self.deadlines.push(Reverse(Deadline {
            at: Instant::now() + delay,
            kind,
        }));
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.peek().map(|Reverse(d)| d.at)
    }

    pub(crate) fn next_action_number(&mut self) -> u32 {
        let n = self.action_counter;
        self.action_counter += 1;
        n
    }

    pub fn report(&self, issue: IssueId, message: impl Into<String>) {
        self.reporter.report(issue, message);
    }

    /// Execution failure for `action`; respects the reduced severity of
    /// optional actions.
    pub fn report_action_error(&self, action: &Action, message: impl Into<String>) {
        let message = format!("{} ({})", message.into(), action.describe());
        if action.optional {
            self.reporter.report_at(
                IssueId::ScenarioActionExecutionError,
                veristream_core::ReportLevel::Warning,
                message,
            );
        } else {
            self.reporter
                .report(IssueId::ScenarioActionExecutionError, message);
        }
    }

    /// Refresh the `position` / `duration` pseudo-variables from the
    /// pipeline; unknown values become +∞.
    pub(crate) fn refresh_time_vars(&mut self) {
        let (position, duration) = match self.pipeline() {
            Some(p) => (p.query_position(), p.query_duration()),
            None => (None, None),
        };
        self.vars
            .set_double("position", duration_secs_f64(position));
        self.vars
            .set_double("duration", duration_secs_f64(duration));
    }

    /// Read a time field off `action`: a number is seconds; a string is
    /// substituted and evaluated against the variable store.
    pub fn action_time_field(
        &mut self,
        action: &Action,
        field: &str,
    ) -> Result<Option<Duration>, ScenarioError> {
        let Some(value) = action.structure.get(field) else {
            return Ok(None);
        };
        match value {
            Value::Int(i) => Ok(secs_to_duration(*i as f64)),
            Value::Double(d) => Ok(secs_to_duration(*d)),
            Value::Str(s) => {
                let raw = s.clone();
                self.refresh_time_vars();
                let substituted = self.vars.substitute(&raw)?;
                let secs = expr::eval(&substituted, &|name| self.vars.lookup_double(name))?;
                Ok(secs_to_duration(secs))
            }
            other => Err(ScenarioError::InvalidField {
                action: action.type_name.clone(),
                field: field.to_string(),
                reason: format!("expected a time, got `{other}`"),
            }),
        }
    }

    /// Segment bookkeeping after a seek completed (`async-done`).
    /// `end`-typed endpoints stay untouched: resolving them needs the
    /// media duration, which the pipeline only reports reliably later.
    pub(crate) fn update_segment_from_seek(&mut self, seek: &SeekSpec) {
        if seek.start_type == veristream_pipeline::SeekType::Set {
            self.segment_start = seek.start.unwrap_or(Duration::ZERO);
        }
        if seek.stop_type == veristream_pipeline::SeekType::Set {
            self.segment_stop = seek.stop;
        }
    }

    pub(crate) fn check_latency(&self, pipeline: &Arc<dyn Pipeline>) {
        let Some(max_latency) = self.max_latency else {
            return;
        };
        let Some(latency) = pipeline.query_latency() else {
            self.report(
                IssueId::ScenarioActionExecutionError,
                "failed to perform latency query",
            );
            return;
        };
        if latency > max_latency {
            self.report(
                IssueId::ConfigLatencyTooHigh,
                format!(
                    "pipeline latency is too high: {} (max allowed {})",
                    veristream_core::time::format_time(Some(latency)),
                    veristream_core::time::format_time(Some(max_latency)),
                ),
            );
        }
    }

    pub(crate) fn check_dropped(&self) {
        let (Some(max_dropped), Some(dropped)) = (self.max_dropped, self.dropped) else {
            return;
        };
        debug!(dropped, max_dropped, "dropped buffer tally");
        if dropped > max_dropped {
            self.report(
                IssueId::ConfigTooManyBuffersDropped,
                format!(
                    "too many buffers have been dropped: {dropped} (max allowed: {max_dropped})"
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veristream_core::{CollectingSink, FatalityFlags};

    fn test_scenario() -> Scenario {
        let reporter = Reporter::new("test", CollectingSink::new(), FatalityFlags::default());
        Scenario::new(
            reporter,
            Arc::new(ActionTypeRegistry::new()),
            EngineSettings::default(),
        )
    }

    #[test]
    fn description_parses_known_and_extra_fields() {
        let structure: Structure =
            "description, summary=\"a test\", handles-states=true, max-latency=0.5, custom=1;"
                .parse()
                .unwrap();
        let description = ScenarioDescription::from_structure(&structure);
        assert_eq!(description.summary.as_deref(), Some("a test"));
        assert!(description.handles_states);
        assert_eq!(description.max_latency, Some(Duration::from_millis(500)));
        assert_eq!(description.extra.len(), 1);
    }

    #[test]
    fn time_field_accepts_numbers_and_expressions() {
        let mut scenario = test_scenario();
        scenario.vars.set_double("base", 2.0);
        let mut structure = Structure::new("seek");
        structure.set("start", Value::Double(1.5));
        structure.set("stop", Value::Str("base*3".into()));
        let action = Action::new("seek", structure);

        assert_eq!(
            scenario.action_time_field(&action, "start").unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            scenario.action_time_field(&action, "stop").unwrap(),
            Some(Duration::from_secs(6))
        );
        assert_eq!(scenario.action_time_field(&action, "missing").unwrap(), None);
    }

    #[test]
    fn completion_handle_posts_to_the_task_channel() {
        let mut scenario = test_scenario();
        let rx = scenario.take_task_receiver();
        let id = scenario.arena.insert(Action::new("wait", Structure::new("wait")));
        scenario.completion_handle(id).set_done();
        assert_eq!(rx.try_recv().unwrap(), EngineTask::Completed(id));
    }

    #[test]
    fn deadlines_pop_in_time_order() {
        let mut scenario = test_scenario();
        scenario.schedule(Duration::from_millis(50), DeadlineKind::RestorePlaying);
        scenario.schedule(Duration::from_millis(10), DeadlineKind::Dispatch);
        let first = scenario.deadlines.pop().unwrap().0;
        assert_eq!(first.kind, DeadlineKind::Dispatch);
    }
}
