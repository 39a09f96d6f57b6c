//! The bus reactor: couples pipeline observations back to action
//! completion and scenario bookkeeping.

use tracing::{debug, info, warn};
use veristream_core::{IssueId, Structure};
use veristream_pipeline::{BusMessage, PipelineState};

use crate::action::{Action, ActionId, ActionState};
use crate::dispatcher;
use crate::scenario::Scenario;
use crate::types::ActionTypeFlags;

/// React to one bus message. The runner has already drained pending
/// completions when the message is EOS or an error.
pub(crate) fn handle_message(scenario: &mut Scenario, message: &BusMessage) {
    match message {
        BusMessage::AsyncDone => on_async_done(scenario),
        BusMessage::StateChanged {
            from_pipeline,
            old,
            new,
        } => {
            if *from_pipeline {
                on_state_changed(scenario, *old, *new);
            }
        }
        BusMessage::Error { message } => {
            warn!(error = %message, "pipeline error, tearing the scenario down");
            on_eos_or_error(scenario, true);
        }
        BusMessage::Eos => on_eos_or_error(scenario, false),
        BusMessage::Buffering { percent } => {
            scenario.buffering = *percent < 100;
            if !scenario.buffering {
                scenario.arm_dispatcher();
            }
        }
        BusMessage::StreamsSelected { stream_ids } => on_streams_selected(scenario, stream_ids),
        BusMessage::Latency => {
            if let Some(pipeline) = scenario.pipeline() {
                scenario.check_latency(&pipeline);
            }
        }
        BusMessage::Qos { dropped } => {
            // Keep the tally current so the final stop report counts the
            // real number of dropped buffers.
            if let Some(dropped) = dropped {
                scenario.dropped = Some(*dropped);
            }
        }
        BusMessage::StreamStart | BusMessage::Element { .. } => {}
    }

    check_waiting_for_message(scenario, message);
}

fn head(scenario: &Scenario) -> Option<ActionId> {
    scenario.actions.front().copied()
}

fn head_sets_state(scenario: &Scenario) -> bool {
    head(scenario)
        .and_then(|id| scenario.arena.get(id))
        .is_some_and(|a| matches!(a.type_name.as_str(), "set-state" | "play" | "pause"))
}

fn on_async_done(scenario: &mut Scenario) {
    if let Some(seek) = scenario.last_seek.take() {
        scenario.update_segment_from_seek(&seek);
        if scenario.target_state == Some(PipelineState::Paused) {
            scenario.seeked_in_pause = true;
        }
        if let Some(id) = head(scenario) {
            apply_completion(scenario, id);
        }
    } else if scenario.needs_async_done {
        scenario.needs_async_done = false;
        if head_sets_state(scenario) && !scenario.changing_state {
            if let Some(id) = head(scenario) {
                apply_completion(scenario, id);
            }
        }
    }

    if scenario.needs_playback_parsing {
        scenario.needs_playback_parsing = false;
        dispatcher::parse_next_playback_time(scenario);
    }
    scenario.arm_dispatcher();
}

fn on_state_changed(scenario: &mut Scenario, old: PipelineState, new: PipelineState) {
    if scenario.changing_state && scenario.target_state == Some(new) {
        scenario.changing_state = false;
        if head_sets_state(scenario) && !scenario.needs_async_done {
            if let Some(id) = head(scenario) {
                apply_completion(scenario, id);
            }
        }
    }

    if old == PipelineState::Ready && new == PipelineState::Paused {
        scenario.arm_dispatcher();
    }

    // Not every pipeline reposts a latency message when it reaches
    // PLAYING, so check it here.
    if new == PipelineState::Playing {
        if let Some(pipeline) = scenario.pipeline() {
            scenario.check_latency(&pipeline);
        }
    }
}

fn on_streams_selected(scenario: &mut Scenario, stream_ids: &[String]) {
    let Some(pending) = scenario.pending_switch_track.take() else {
        return;
    };
    let expected = scenario
        .arena
        .get(pending)
        .map(|a| a.expected_streams.clone())
        .unwrap_or_default();

    if expected.len() != stream_ids.len() {
        scenario.report(
            IssueId::ScenarioActionExecutionError,
            format!(
                "was expecting {} selected streams but got {}",
                expected.len(),
                stream_ids.len()
            ),
        );
    } else if let Some(missing) = expected
        .iter()
        .find(|id| !stream_ids.contains(id))
    {
        scenario.report(
            IssueId::ScenarioActionExecutionError,
            format!("stream {missing} has not been activated"),
        );
    }

    apply_completion(scenario, pending);
    scenario.arm_dispatcher();
}

fn on_eos_or_error(scenario: &mut Scenario, is_error: bool) {
    if !is_error {
        scenario.got_eos = true;
        if scenario.message_wait.is_some() && scenario.actions.len() > 1 {
            // A follow-up action exists; the final message-wait check
            // below resolves the wait and the scenario keeps going.
            debug!("waiting for a message with a next action queued, letting it a chance");
            return;
        }
        check_waiting_for_message(scenario, &BusMessage::Eos);
    }

    let leftover: Vec<ActionId> = scenario
        .actions
        .drain(..)
        .chain(scenario.interlaced_actions.drain(..))
        .chain(scenario.on_addition_actions.drain(..))
        .collect();

    let mut not_executed = Vec::new();
    for id in leftover {
        let Some(action) = scenario.arena.remove(id) else {
            continue;
        };
        let no_execution_not_fatal = scenario
            .registry
            .lookup(&action.type_name)
            .is_some_and(|t| t.flags.contains(ActionTypeFlags::NO_EXECUTION_NOT_FATAL));
        if no_execution_not_fatal || action.state == ActionState::Ok || action.optional {
            continue;
        }
        not_executed.push(action.describe());
    }

    if !not_executed.is_empty() {
        let position = scenario.pipeline().and_then(|p| p.query_position());
        scenario.report(
            IssueId::ScenarioNotEnded,
            format!(
                "{} actions were not executed: {} (position: {})",
                not_executed.len(),
                not_executed.join("; "),
                veristream_core::time::format_time(position),
            ),
        );
    }

    info!("got EOS, generating `stop` action");
    let mut structure = Structure::new("stop");
    structure.set(
        "generated-after-eos",
        veristream_core::Value::Bool(true),
    );
    let mut stop_action = Action::new("stop", structure);
    dispatcher::execute_frame(scenario, &mut stop_action);
}

/// Resolve a `wait, message-type=` when the matching message arrives.
fn check_waiting_for_message(scenario: &mut Scenario, message: &BusMessage) {
    let matches = scenario
        .message_wait
        .as_ref()
        .is_some_and(|(_, wanted)| wanted == message.type_name());
    if !matches {
        return;
    }
    let (id, _) = scenario.message_wait.take().expect("wait just matched");
    info!("stop waiting for message");
    apply_completion(scenario, id);
    scenario.arm_dispatcher();
}

/// The main-loop half of `set_done`: transition the action's state,
/// continue its sub-action chain, and rearm the dispatcher. Stale ids
/// (completed scenarios, removed actions) are ignored.
pub(crate) fn apply_completion(scenario: &mut Scenario, id: ActionId) {
    let Some(mut action) = scenario.arena.take(id) else {
        debug!(?id, "ignoring completion for a gone action");
        return;
    };
    if !matches!(
        action.state,
        ActionState::Async | ActionState::Interlaced | ActionState::InProgress
    ) {
        debug!(action = %action.describe(), "ignoring spurious completion");
        scenario.arena.restore(id, action);
        return;
    }

    if let Some(started) = action.execution_time.take() {
        info!(
            action = %action.type_name,
            duration = %veristream_core::time::format_time(Some(started.elapsed())),
            "action done"
        );
    }

    let was_interlaced = action.state == ActionState::Interlaced;
    let state = dispatcher::continue_sub_chain(scenario, &mut action);
    action.state = state;

    if scenario.signal_wait.map(|(wid, _)| wid) == Some(id) && state != ActionState::Async {
        let (_, handle) = scenario.signal_wait.take().expect("checked above");
        if let Some(pipeline) = scenario.pipeline() {
            pipeline.disconnect_signal(handle);
        }
    }

    if was_interlaced && state != ActionState::Async {
        scenario.interlaced_actions.retain(|other| *other != id);
        scenario.arena.restore(id, action);
        scenario.arena.remove(id);
    } else {
        scenario.arena.restore(id, action);
    }
    scenario.arm_dispatcher();
}
