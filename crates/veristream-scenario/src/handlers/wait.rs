//! The `wait` action: timed, signal-triggered or message-triggered.

use tracing::info;

use crate::action::{Action, ActionReturn};
use crate::scenario::{DeadlineKind, Scenario};
use crate::types::{ActionParameter, ActionType, ActionTypeFlags, ActionTypeRegistry};

use super::{pipeline_or_report, single_target};

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("wait", "core")
            .description(
                "Waits for signal `signal-name`, message `message-type`, or during \
                 `duration` seconds",
            )
            .flags(ActionTypeFlags::DOESNT_NEED_PIPELINE)
            .parameter(ActionParameter::optional(
                "duration",
                "double or string (time)",
                "The duration while no other action will be executed",
            ))
            .parameter(ActionParameter::optional(
                "target-element-name",
                "string",
                "The name of the element to wait @signal-name on",
            ))
            .parameter(ActionParameter::optional(
                "signal-name",
                "string",
                "The name of the signal to wait for on @target-element-name",
            ))
            .parameter(ActionParameter::optional(
                "message-type",
                "string",
                "The name of the message type to wait for",
            ))
            .execute(execute_wait)
            .build(),
    );
}

fn execute_wait(scenario: &mut Scenario, action: &mut Action) -> ActionReturn {
    if action.structure.has_field("signal-name") {
        execute_wait_for_signal(scenario, action)
    } else if action.structure.has_field("message-type") {
        execute_wait_for_message(scenario, action)
    } else {
        execute_timed_wait(scenario, action)
    }
}

fn execute_timed_wait(scenario: &mut Scenario, action: &mut Action) -> ActionReturn {
    let multiplier = scenario.settings.wait_multiplier;
    if multiplier == 0.0 {
        info!("waits are disabled, not waiting");
        return ActionReturn::Ok;
    }

    let duration = match scenario.action_time_field(action, "duration") {
        Ok(Some(duration)) => duration,
        Ok(None) | Err(_) => {
            scenario.report_action_error(action, "duration could not be parsed");
            return ActionReturn::Error;
        }
    };
    let Some(id) = action.slot else {
        return ActionReturn::Error;
    };

    scenario.dispatch_armed = false;
    scenario.schedule(duration.mul_f64(multiplier), DeadlineKind::WaitDone(id));
    ActionReturn::Async
}

fn execute_wait_for_signal(scenario: &mut Scenario, action: &mut Action) -> ActionReturn {
    let Some(pipeline) = pipeline_or_report(scenario, action) else {
        return ActionReturn::ErrorReported;
    };
    let Some(signal_name) = action.structure.get_str("signal-name").map(str::to_string) else {
        scenario.report_action_error(action, "no signal-name given for wait action");
        return ActionReturn::Error;
    };
    let Some(target) = single_target(scenario, action, &pipeline) else {
        return ActionReturn::ErrorReported;
    };
    let Some(id) = action.slot else {
        return ActionReturn::Error;
    };

    info!(signal = %signal_name, target = %target, "waiting for signal");
    let completion = scenario.completion_handle(id);
    let handle = match pipeline.connect_signal(
        &target,
        &signal_name,
        Box::new(move || completion.set_done()),
    ) {
        Ok(handle) => handle,
        Err(error) => {
            scenario.report_action_error(action, error.to_string());
            return ActionReturn::ErrorReported;
        }
    };

    scenario.dispatch_armed = false;
    scenario.signal_wait = Some((id, handle));
    ActionReturn::Async
}

fn execute_wait_for_message(scenario: &mut Scenario, action: &mut Action) -> ActionReturn {
    if pipeline_or_report(scenario, action).is_none() {
        return ActionReturn::ErrorReported;
    }
    let Some(message_type) = action.structure.get_str("message-type") else {
        scenario.report_action_error(action, "no message-type given for wait action");
        return ActionReturn::Error;
    };
    let Some(id) = action.slot else {
        return ActionReturn::Error;
    };

    info!(message = %message_type, "waiting for message");
    scenario.dispatch_armed = false;
    scenario.message_wait = Some((id, message_type.to_string()));
    ActionReturn::Async
}
