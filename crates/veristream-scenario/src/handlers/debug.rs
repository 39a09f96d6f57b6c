use crate::action::ActionReturn;
use crate::logging;
use crate::types::{ActionParameter, ActionType, ActionTypeRegistry};

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("set-debug-threshold", "core")
            .description(
                "Sets the logging threshold to be used, same format as the tracing \
                 environment filter",
            )
            .parameter(ActionParameter::required(
                "debug-threshold",
                "string",
                "String defining the debug threshold",
            ))
            .execute(|scenario, action| {
                let Some(threshold) = action.structure.get_str("debug-threshold") else {
                    scenario.report_action_error(action, "no `debug-threshold` specified");
                    return ActionReturn::ErrorReported;
                };
                logging::set_debug_threshold(threshold);
                ActionReturn::Ok
            })
            .build(),
    );
}
