use crate::action::ActionReturn;
use crate::types::{ActionType, ActionTypeRegistry};

/// Fields that describe the action itself rather than a variable.
const BOOKKEEPING: &[&str] = &[
    "name",
    "playback-time",
    "playback_time",
    "timeout",
    "optional",
    "repeat",
    "sub-action",
    "as-config",
    "optional-action-type",
];

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("set-vars", "core")
            .description(
                "Defines variables to be used in other actions, for example:\n\
                 set-vars, frame1=SomeRandomHash1;\n\
                 check-last-sample, checksum=frame1;",
            )
            .execute(|scenario, action| {
                for (key, value) in action.structure.fields() {
                    if BOOKKEEPING.contains(&key) {
                        continue;
                    }
                    scenario.vars.set(key, value.clone());
                }
                ActionReturn::Ok
            })
            .build(),
    );
}
