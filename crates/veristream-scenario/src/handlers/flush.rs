use crate::action::ActionReturn;
use crate::types::{ActionParameter, ActionType, ActionTypeRegistry};

use super::{pipeline_or_report, single_target};

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("flush", "core")
            .description("Sends flush-start and flush-stop events to the target element")
            .parameter(ActionParameter::required(
                "target-element-name",
                "string",
                "The name of the element to flush",
            ))
            .parameter(
                ActionParameter::optional(
                    "reset-time",
                    "boolean",
                    "Whether the flush should reset running time",
                )
                .with_default("TRUE"),
            )
            .execute(|scenario, action| {
                let Some(pipeline) = pipeline_or_report(scenario, action) else {
                    return ActionReturn::ErrorReported;
                };
                let Some(target) = single_target(scenario, action, &pipeline) else {
                    return ActionReturn::ErrorReported;
                };
                let reset_time = action.structure.get_bool("reset-time").unwrap_or(true);
                match pipeline.flush(&target, reset_time) {
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
