use veristream_core::Value;

use crate::action::{Action, ActionReturn};
use crate::scenario::Scenario;
use crate::types::{ActionParameter, ActionType, ActionTypeFlags, ActionTypeRegistry};

use super::{pipeline_or_report, target_selector};

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("set-property", "core")
            .description(
                "Sets a property of an element or klass of elements in the pipeline. \
                 Besides property-name and value, one of `target-element-name`, \
                 `target-element-klass` or `target-element-factory-name` must be given",
            )
            .flags(
                ActionTypeFlags::CAN_EXECUTE_ON_ADDITION
                    | ActionTypeFlags::CAN_BE_OPTIONAL
                    | ActionTypeFlags::HANDLED_IN_CONFIG,
            )
            .parameter(ActionParameter::optional(
                "target-element-name",
                "string",
                "The name of the element to set a property on",
            ))
            .parameter(ActionParameter::optional(
                "target-element-klass",
                "string",
                "The klass of the elements to set a property on",
            ))
            .parameter(ActionParameter::optional(
                "target-element-factory-name",
                "string",
                "The factory name of the elements to set a property on",
            ))
            .parameter(ActionParameter::required(
                "property-name",
                "string",
                "The name of the property to set",
            ))
            .parameter(ActionParameter::required(
                "property-value",
                "the same type as @property-name",
                "The value @property-name is set to",
            ))
            .execute(execute_set_property)
            .build(),
    );
}

fn execute_set_property(scenario: &mut Scenario, action: &mut Action) -> ActionReturn {
    let Some(pipeline) = pipeline_or_report(scenario, action) else {
        return ActionReturn::ErrorReported;
    };
    let Some(selector) = target_selector(scenario, action) else {
        return ActionReturn::ErrorReported;
    };

    let targets = pipeline.resolve_targets(&selector);
    if targets.is_empty() {
        scenario.report_action_error(action, format!("target element not found ({selector})"));
        return ActionReturn::ErrorReported;
    }

    let Some(property) = action.structure.get_str("property-name").map(str::to_string) else {
        scenario.report_action_error(action, "no `property-name` specified");
        return ActionReturn::ErrorReported;
    };
    let Some(value) = action.structure.get("property-value").cloned() else {
        scenario.report_action_error(action, "no `property-value` specified");
        return ActionReturn::ErrorReported;
    };

    let mut result = ActionReturn::Ok;
    for target in targets {
        if let Err(error) = pipeline.set_property(&target, &property, &value) {
            scenario.report_action_error(action, error.to_string());
            result = ActionReturn::ErrorReported;
            continue;
        }
        // Read back to verify the element accepted the value.
        match pipeline.get_property(&target, &property) {
            Ok(read_back) if values_equivalent(&read_back, &value) => {}
            Ok(read_back) => {
                scenario.report_action_error(
                    action,
                    format!(
                        "property `{property}` on `{target}` was set to `{value}` but reads \
                         back as `{read_back}`"
                    ),
                );
                result = ActionReturn::ErrorReported;
            }
            Err(error) => {
                scenario.report_action_error(action, error.to_string());
                result = ActionReturn::ErrorReported;
            }
        }
    }
    result
}

/// Loose comparison across the numeric types a property may coerce
/// through.
fn values_equivalent(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a.as_double(), b.as_double()) {
        (Some(a), Some(b)) => (a - b).abs() < 1e-9,
        _ => a.to_string() == b.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalence_crosses_numeric_types() {
        assert!(values_equivalent(&Value::Int(1), &Value::Double(1.0)));
        assert!(values_equivalent(
            &Value::Str("0.5".into()),
            &Value::Double(0.5)
        ));
        assert!(!values_equivalent(&Value::Int(1), &Value::Double(1.5)));
    }
}
