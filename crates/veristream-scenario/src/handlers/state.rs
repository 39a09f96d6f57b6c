//! State-changing actions: `set-state`, `play`, `pause` and `stop`.

use std::time::Duration;

use tracing::{debug, info};
use veristream_core::{IssueId, Value};
use veristream_pipeline::{PipelineState, StateChangeOutcome};

use crate::action::{Action, ActionReturn};
use crate::scenario::{DeadlineKind, Scenario};
use crate::types::{ActionParameter, ActionType, ActionTypeFlags, ActionTypeRegistry};

use super::pipeline_or_report;

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("set-state", "core")
            .description("Changes the state of the pipeline to any state")
            .flags(ActionTypeFlags::ASYNC | ActionTypeFlags::NEEDS_CLOCK)
            .parameter(ActionParameter::required(
                "state",
                "string",
                "A pipeline state as a string, one of: null, ready, paused, playing",
            ))
            .execute(execute_set_state)
            .build(),
    );

    registry.register(
        ActionType::builder("play", "core")
            .description("Sets the pipeline state to PLAYING")
            .execute(|scenario, action| {
                debug!("playing back");
                action
                    .structure
                    .set("state", Value::Str("playing".to_string()));
                execute_set_state(scenario, action)
            })
            .build(),
    );

    registry.register(
        ActionType::builder("pause", "core")
            .description(
                "Sets the pipeline to PAUSED. A `duration` parameter makes the pipeline go \
                 back to playing after that many seconds",
            )
            .flags(ActionTypeFlags::ASYNC | ActionTypeFlags::NEEDS_CLOCK)
            .parameter(
                ActionParameter::optional(
                    "duration",
                    "double or string (time)",
                    "The duration during which the stream will be paused",
                )
                .with_default("0.0"),
            )
            .execute(execute_pause)
            .build(),
    );

    registry.register(
        ActionType::builder("stop", "core")
            .description(
                "Stops the execution of the scenario and requests the NULL state from the \
                 pipeline",
            )
            .flags(ActionTypeFlags::NO_EXECUTION_NOT_FATAL)
            .execute(execute_stop)
            .build(),
    );
}

fn execute_set_state(scenario: &mut Scenario, action: &mut Action) -> ActionReturn {
    let Some(pipeline) = pipeline_or_report(scenario, action) else {
        return ActionReturn::ErrorReported;
    };

    let Some(state_str) = action.structure.get_str("state") else {
        scenario.report_action_error(action, "no `state` specified");
        return ActionReturn::ErrorReported;
    };
    let Ok(state) = state_str.parse::<PipelineState>() else {
        scenario.report_action_error(action, format!("unknown state `{state_str}`"));
        return ActionReturn::ErrorReported;
    };

    scenario.target_state = Some(state);
    scenario.changing_state = true;
    scenario.seeked_in_pause = false;

    match pipeline.set_state(state) {
        Err(_) | Ok(StateChangeOutcome::Failure) => {
            scenario.changing_state = false;
            scenario.report(
                IssueId::StateChangeFailure,
                format!("failed to set state to {state}"),
            );
            ActionReturn::Error
        }
        Ok(StateChangeOutcome::Async) => {
            scenario.needs_async_done = true;
            ActionReturn::Async
        }
        Ok(StateChangeOutcome::Success | StateChangeOutcome::NoPreroll) => {
            scenario.changing_state = false;
            ActionReturn::Ok
        }
    }
}

fn execute_pause(scenario: &mut Scenario, action: &mut Action) -> ActionReturn {
    let duration = scenario
        .action_time_field(action, "duration")
        .unwrap_or(None)
        .unwrap_or(Duration::ZERO);

    action
        .structure
        .set("state", Value::Str("paused".to_string()));
    info!(duration = ?duration, "pausing");

    let result = execute_set_state(scenario, action);
    if !matches!(result, ActionReturn::Error | ActionReturn::ErrorReported)
        && !duration.is_zero()
    {
        scenario.schedule(duration, DeadlineKind::RestorePlaying);
    }
    result
}

fn execute_stop(scenario: &mut Scenario, action: &mut Action) -> ActionReturn {
    let Some(pipeline) = pipeline_or_report(scenario, action) else {
        return ActionReturn::ErrorReported;
    };

    // Cancel any outstanding dispatch, tally dropped buffers while the
    // pipeline still answers, then request teardown.
    scenario.dispatch_armed = false;
    scenario.check_dropped();
    let _ = pipeline.set_state(PipelineState::Null);
    scenario.stopping = true;
    ActionReturn::Ok
}
