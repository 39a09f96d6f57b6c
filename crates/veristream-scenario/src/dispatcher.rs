//! The action dispatcher: decides when the head of the main queue fires,
//! executes it (including its sub-action chain) and either recurses to
//! the next action or yields back to the main loop.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};
use veristream_core::time::format_time;
use veristream_core::{IssueId, Value};

use crate::action::{Action, ActionId, ActionReturn, ActionState};
use crate::error::ScenarioError;
use crate::expr;
use crate::scenario::Scenario;
use crate::types::{ActionType, ActionTypeFlags};

/// One dispatcher pass. Executes as many actions as the gates allow; in
/// non-idle mode synchronous completions chain without yielding.
pub(crate) fn dispatch(scenario: &mut Scenario) {
    loop {
        if scenario.stopping {
            return;
        }
        if scenario.buffering {
            debug!("buffering, not executing any action");
            return;
        }
        if scenario.changing_state || scenario.needs_async_done {
            debug!("changing state, not executing any action");
            return;
        }

        let mut head = scenario.actions.front().copied();
        if let Some(id) = head {
            let Some(action) = scenario.arena.get(id) else {
                scenario.actions.pop_front();
                continue;
            };
            match action.state {
                ActionState::InProgress => return,
                ActionState::Ok => {
                    if action.repeat > 0 {
                        // Another iteration: restore the original record
                        // and fall through to the execution gates.
                        let action = scenario.arena.get_mut(id).expect("head just seen");
                        action.repeat -= 1;
                        action.restore_structure();
                        action.state = ActionState::None;
                    } else {
                        pop_head(scenario, id);
                        if scenario.actions.is_empty() {
                            check_scenario_done(scenario);
                            return;
                        }
                        continue;
                    }
                }
                ActionState::Error | ActionState::ErrorReported => {
                    pop_head(scenario, id);
                    continue;
                }
                ActionState::Async => {
                    check_async_timeout(scenario, id);
                    return;
                }
                ActionState::None | ActionState::Interlaced => {}
            }
            head = Some(id);
        }

        // A string playback-time may still be waiting for `duration` to
        // become known; try again before judging the gates.
        parse_next_playback_time(scenario);

        let Some((position, rate)) = check_position(scenario, head) else {
            return;
        };

        if !should_execute(scenario, head, position, rate) {
            scenario.arm_dispatcher();
            return;
        }
        let Some(id) = head else {
            return;
        };

        scenario.seeked_in_pause = false;
        let state = execute_head(scenario, id);

        match state {
            ActionState::Async => {
                // Completion arrives through `set_done`; the dispatcher
                // source stands down until then.
                debug!("waiting for action to be done");
                scenario.dispatch_armed = false;
                return;
            }
            ActionState::Interlaced => {
                scenario.actions.pop_front();
                parse_next_playback_time(scenario);
                scenario.interlaced_actions.push(id);
            }
            ActionState::Ok => {
                let repeat = scenario.arena.get(id).map(|a| a.repeat).unwrap_or(0);
                if repeat <= 0 {
                    pop_head(scenario, id);
                }
            }
            _ => {
                pop_head(scenario, id);
            }
        }

        if scenario.actions.is_empty() {
            check_scenario_done(scenario);
            return;
        }
        if scenario.execute_on_idle() {
            scenario.arm_dispatcher();
            debug!("executing only on idle, waiting for next dispatch");
            return;
        }
        // Recurse to the next action.
    }
}

fn pop_head(scenario: &mut Scenario, id: ActionId) {
    scenario.actions.pop_front();
    scenario.arena.remove(id);
    parse_next_playback_time(scenario);
}

/// Re-evaluate a deferred string `playback-time` on the head action. An
/// expression that still evaluates to +∞ (unknown `duration`) stays
/// deferred; a malformed one fails the action.
pub(crate) fn parse_next_playback_time(scenario: &mut Scenario) {
    let Some(id) = scenario.actions.front().copied() else {
        return;
    };
    let needs_parsing = scenario
        .arena
        .get(id)
        .is_some_and(|a| a.needs_playback_parsing);
    if !needs_parsing {
        return;
    }
    let mut action = scenario.arena.take(id).expect("head exists");
    match scenario.action_time_field(&action, "playback-time") {
        Ok(Some(time)) => {
            action.playback_time = Some(time);
            action.needs_playback_parsing = false;
        }
        Ok(None) => {
            debug!(action = %action.describe(), "playback-time not resolvable yet");
        }
        Err(error) => {
            scenario.report(
                IssueId::ScenarioFileMalformed,
                format!(
                    "could not parse playback-time on `{}`: {error}",
                    action.describe()
                ),
            );
            action.needs_playback_parsing = false;
            action.state = ActionState::ErrorReported;
        }
    }
    scenario.arena.restore(id, action);
}

fn check_scenario_done(scenario: &mut Scenario) {
    if scenario.interlaced_actions.is_empty() && scenario.on_addition_actions.is_empty() {
        debug!("all actions executed");
    }
}

fn check_async_timeout(scenario: &mut Scenario, id: ActionId) {
    let Some(action) = scenario.arena.get(id) else {
        return;
    };
    let (Some(timeout), Some(started)) = (action.timeout, action.execution_time) else {
        return;
    };
    if action.timeout_reported {
        return;
    }
    let elapsed = started.elapsed();
    if elapsed > timeout {
        let message = format!(
            "action {} timed out after: {}",
            action.describe(),
            format_time(Some(elapsed)),
        );
        scenario.report(IssueId::ScenarioActionTimeout, message);
        if let Some(action) = scenario.arena.get_mut(id) {
            action.timeout_reported = true;
        }
    }
}

/// Position and segment gating. `None` means "do not dispatch now".
fn check_position(
    scenario: &mut Scenario,
    head: Option<ActionId>,
) -> Option<(Option<std::time::Duration>, f64)> {
    let Some(pipeline) = scenario.pipeline() else {
        // Gates that need the pipeline are judged in `should_execute`.
        return Some((None, 1.0));
    };

    let position = pipeline.query_position();
    let duration = pipeline.query_duration();
    let playback_time = head
        .and_then(|id| scenario.arena.get(id))
        .and_then(|a| a.playback_time);

    if position.is_none()
        && pipeline.current_state() >= veristream_pipeline::PipelineState::Paused
        && playback_time.is_some()
    {
        debug!("position unknown, waiting");
        scenario.arm_dispatcher();
        return None;
    }

    if let (Some(position), Some(duration)) = (position, duration) {
        if !scenario.got_eos && position > duration {
            scenario.arm_dispatcher();
            scenario.report(
                IssueId::QueryPositionSuperiorDuration,
                format!(
                    "reported position {} > reported duration {}",
                    format_time(Some(position)),
                    format_time(Some(duration)),
                ),
            );
            return Some((Some(position), pipeline.query_rate()));
        }
    }

    if let Some(position) = position {
        let start_with_tolerance = scenario.segment_start.saturating_sub(scenario.seek_pos_tol);
        let stop_with_tolerance = scenario.segment_stop.map(|stop| stop + scenario.seek_pos_tol);

        let above_stop = stop_with_tolerance.is_some_and(|stop| position > stop);
        let below_accurate_start = scenario
            .seek_flags
            .contains(veristream_pipeline::SeekFlags::ACCURATE)
            && position < start_with_tolerance;
        if above_stop || below_accurate_start {
            scenario.report(
                IssueId::QueryPositionOutOfSegment,
                format!(
                    "current position {} not in the expected range [{} -- {}]",
                    format_time(Some(position)),
                    format_time(Some(start_with_tolerance)),
                    format_time(stop_with_tolerance),
                ),
            );
        }
    }

    let rate = pipeline.query_rate();

    if scenario.seeked_in_pause
        && scenario
            .seek_flags
            .contains(veristream_pipeline::SeekFlags::ACCURATE)
    {
        if let Some(position) = position {
            let start = scenario.segment_start;
            let low = start.saturating_sub(scenario.seek_pos_tol);
            let high = start + scenario.seek_pos_tol;
            if position < low || position >= high {
                scenario.seeked_in_pause = false;
                scenario.report(
                    IssueId::EventSeekResultPositionWrong,
                    format!(
                        "reported position after accurate seek in PAUSED state should be \
                         exactly what the user asked for; position {} is not the expected {}",
                        format_time(Some(position)),
                        format_time(Some(start)),
                    ),
                );
            }
        }
    }

    Some((position, rate))
}

/// Decide whether the head action fires now.
fn should_execute(
    scenario: &mut Scenario,
    head: Option<ActionId>,
    position: Option<std::time::Duration>,
    rate: f64,
) -> bool {
    let Some(id) = head else {
        debug!("no action to execute");
        return false;
    };
    let Some(action) = scenario.arena.get(id) else {
        return false;
    };
    if action.needs_playback_parsing {
        // The trigger time is not known yet; keep waiting.
        return false;
    }
    let playback_time = action.playback_time;
    let type_name = action.type_name.clone();
    let describe = action.describe();

    let Some(pipeline) = scenario.pipeline() else {
        let Some(action_type) = scenario.registry.lookup(&type_name) else {
            return false;
        };
        if !action_type
            .flags
            .contains(ActionTypeFlags::DOESNT_NEED_PIPELINE)
        {
            scenario.report(
                IssueId::ScenarioActionExecutionError,
                format!(
                    "trying to execute a `{type_name}` action after the pipeline has been \
                     destroyed, but the type does not allow running without a pipeline"
                ),
            );
            return false;
        }
        if playback_time.is_some() {
            scenario.report(
                IssueId::ScenarioActionExecutionError,
                format!(
                    "trying to execute `{describe}` with a playback time after the pipeline \
                     has been destroyed"
                ),
            );
            return false;
        }
        return true;
    };

    if scenario.got_eos {
        debug!("just got EOS, executing next action");
        scenario.got_eos = false;
        return true;
    }
    if pipeline.current_state() < veristream_pipeline::PipelineState::Paused {
        debug!("pipeline not yet paused, executing action");
        return true;
    }
    let Some(playback_time) = playback_time else {
        return true;
    };
    let Some(position) = position else {
        return false;
    };
    if rate > 0.0 && position < playback_time {
        return false;
    }
    if rate < 0.0 && position > playback_time {
        return false;
    }
    true
}

/// Execute the head action: prepare, run, and walk its synchronous
/// sub-action chain.
fn execute_head(scenario: &mut Scenario, id: ActionId) -> ActionState {
    let Some(mut action) = scenario.arena.take(id) else {
        return ActionState::Error;
    };
    let mut state = execute_frame(scenario, &mut action);
    if state == ActionState::Ok {
        state = continue_sub_chain(scenario, &mut action);
    }
    if state == ActionState::Error {
        scenario.report_action_error(&action, "could not execute");
    }
    action.state = state;
    scenario.arena.restore(id, action);
    state
}

/// Walk pending sub-action frames after a frame finished with OK. Also
/// used from the completion path when an async frame settles.
pub(crate) fn continue_sub_chain(scenario: &mut Scenario, action: &mut Action) -> ActionState {
    if action.executing_last_subaction {
        action.executing_last_subaction = false;
        return ActionState::Ok;
    }
    let mut state = ActionState::Ok;
    while state == ActionState::Ok {
        let Some(sub) = next_subaction_frame(scenario, action) else {
            break;
        };
        action.structure = sub;
        action.type_name = action.structure.name().to_string();
        action.in_subaction = true;
        state = execute_frame(scenario, action);
        if !action.in_subaction {
            // The frame restored the original record: the chain is done,
            // even though the record itself names a sub-action.
            break;
        }
    }
    state
}

/// Pull the next `sub-action` frame off the working structure, if the
/// previous frame did not already restore the original record.
fn next_subaction_frame(
    scenario: &mut Scenario,
    action: &mut Action,
) -> Option<veristream_core::Structure> {
    let value = action.structure.get("sub-action")?;
    let parsed = match value {
        Value::Structure(s) => Ok((**s).clone()),
        Value::Str(s) => s.parse::<veristream_core::Structure>(),
        _ => {
            scenario.report(
                IssueId::ScenarioFileMalformed,
                format!("sub-action on `{}` is not a structure", action.describe()),
            );
            return None;
        }
    };
    match parsed {
        Ok(sub) => Some(sub),
        Err(error) => {
            scenario.report(
                IssueId::ScenarioFileMalformed,
                format!("sub action of `{}` could not be parsed: {error}", action.describe()),
            );
            None
        }
    }
}

/// Run one frame: default prepare, the type's prepare hook, then the
/// handler. Restores the original record afterwards unless the frame
/// carries a `sub-action` to chain into.
pub(crate) fn execute_frame(scenario: &mut Scenario, action: &mut Action) -> ActionState {
    let Some(action_type) = scenario.registry.lookup(&action.type_name) else {
        scenario.report(
            IssueId::UnknownActionType,
            format!("unknown action type `{}`", action.type_name),
        );
        return ActionState::ErrorReported;
    };

    if let Err(error) = default_prepare(scenario, action, &action_type) {
        scenario.report_action_error(
            action,
            format!("action could not be prepared: {error}"),
        );
        return ActionState::ErrorReported;
    }
    if let Some(hook) = &action_type.prepare {
        if let Err(error) = hook(scenario, action) {
            scenario.report_action_error(
                action,
                format!("action could not be prepared: {error}"),
            );
            return ActionState::ErrorReported;
        }
    }

    if !action.printed {
        info!(
            action = %action.describe(),
            number = action.action_number,
            "executing action"
        );
        action.printed = true;
    }

    action.execution_time = Some(Instant::now());
    action.timeout_reported = false;
    action.state = ActionState::InProgress;
    let result = (action_type.execute)(scenario, action);

    if !action.structure.has_field("sub-action") {
        action.restore_structure();
        action.type_name = action.main_structure.name().to_string();
        if result == ActionReturn::Async {
            action.executing_last_subaction = true;
        }
    }

    result.into()
}

/// The default prepare step: variable substitution over every string
/// field, forced conversion of schema-declared time fields, and `repeat`
/// resolution.
fn default_prepare(
    scenario: &mut Scenario,
    action: &mut Action,
    action_type: &Arc<ActionType>,
) -> Result<(), ScenarioError> {
    scenario.refresh_time_vars();

    let string_fields: Vec<(String, String)> = action
        .structure
        .fields()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.to_string(), s.to_string())))
        .collect();
    for (key, raw) in string_fields {
        let substituted = scenario.vars.substitute(&raw)?;
        if substituted != raw {
            action.structure.set(key, Value::Str(substituted));
        }
    }

    for parameter in action_type.parameters.iter().filter(|p| p.is_time()) {
        if let Some(time) = scenario.action_time_field(action, &parameter.name)? {
            action
                .structure
                .set(parameter.name.clone(), Value::Double(time.as_secs_f64()));
        }
    }

    if action.repeat >= 0 {
        return Ok(());
    }
    let Some(repeat) = action.structure.get("repeat").cloned() else {
        return Ok(());
    };
    let resolved = match &repeat {
        Value::Int(i) => *i as f64,
        Value::Double(d) => *d,
        Value::Str(expression) => {
            let substituted = scenario.vars.substitute(expression)?;
            expr::eval(&substituted, &|name| scenario.vars.lookup_double(name))?
        }
        other => {
            return Err(ScenarioError::InvalidField {
                action: action.type_name.clone(),
                field: "repeat".to_string(),
                reason: format!("expected an integer, got `{other}`"),
            });
        }
    };
    if resolved.fract().abs() > 1e-9 {
        return Err(ScenarioError::InvalidField {
            action: action.type_name.clone(),
            field: "repeat".to_string(),
            reason: format!("`{resolved}` is not an integer"),
        });
    }
    action.repeat = resolved as i32;
    Ok(())
}
