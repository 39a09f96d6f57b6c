use crate::action::ActionReturn;
use crate::types::{ActionParameter, ActionType, ActionTypeRegistry};

use super::{pipeline_or_report, single_target};

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("emit-signal", "core")
            .description("Emits a signal (without arguments) on an element in the pipeline")
            .parameter(ActionParameter::required(
                "target-element-name",
                "string",
                "The name of the element to emit a signal on",
            ))
            .parameter(ActionParameter::required(
                "signal-name",
                "string",
                "The name of the signal to emit on @target-element-name",
            ))
            .execute(|scenario, action| {
                let Some(pipeline) = pipeline_or_report(scenario, action) else {
                    return ActionReturn::ErrorReported;
                };
                let Some(target) = single_target(scenario, action, &pipeline) else {
                    return ActionReturn::ErrorReported;
                };
                let Some(signal) = action.structure.get_str("signal-name") else {
                    scenario.report_action_error(action, "no `signal-name` specified");
                    return ActionReturn::ErrorReported;
                };
                match pipeline.emit_signal(&target, signal) {
                    Ok(()) => ActionReturn::Ok,
                    Err(error) => {
                        scenario.report_action_error(action, error.to_string());
                        ActionReturn::ErrorReported
                    }
                }
            })
            .build(),
    );
}
