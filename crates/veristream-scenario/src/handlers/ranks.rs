//! Load-time plugin-registry mutations: `set-rank`, `set-feature-rank`
//! and `disable-plugin`. The resulting tables live on the scenario; the
//! embedder applies them when it assembles the pipeline.

use veristream_core::Value;

use crate::action::{Action, ActionReturn};
use crate::scenario::Scenario;
use crate::types::{rank, ActionParameter, ActionType, ActionTypeFlags, ActionTypeRegistry};

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("set-rank", "core")
            .description("Changes the ranking of a plugin feature or of all features of a plugin")
            .flags(ActionTypeFlags::CONFIG)
            .parameter(ActionParameter::required(
                "name",
                "string",
                "The name of the feature or plugin",
            ))
            .parameter(ActionParameter::required(
                "rank",
                "string, int",
                "The rank to set on @name",
            ))
            .execute(|scenario, action| execute_set_rank(scenario, action, "name"))
            .build(),
    );

    registry.register(
        ActionType::builder("set-feature-rank", "core")
            .description("Changes the ranking of a particular plugin feature")
            .flags(ActionTypeFlags::CONFIG)
            .parameter(ActionParameter::required(
                "feature-name",
                "string",
                "The name of the feature",
            ))
            .parameter(ActionParameter::required(
                "rank",
                "string, int",
                "The rank to set on @feature-name",
            ))
            .execute(|scenario, action| execute_set_rank(scenario, action, "feature-name"))
            .build(),
    );

    registry.register(
        ActionType::builder("disable-plugin", "core")
            .description("Disables a plugin for the rest of the run")
            .parameter(ActionParameter::required(
                "plugin-name",
                "string",
                "The name of the plugin to disable",
            ))
            .parameter(
                ActionParameter::optional(
                    "as-config",
                    "boolean",
                    "Execute at load time instead of when reached",
                )
                .with_default("false"),
            )
            .execute(|scenario, action| {
                let Some(name) = action.structure.get_str("plugin-name") else {
                    scenario.report_action_error(action, "no `plugin-name` specified");
                    return ActionReturn::ErrorReported;
                };
                scenario.disabled_features.push(name.to_string());
                ActionReturn::Ok
            })
            .build(),
    );
}

fn execute_set_rank(scenario: &mut Scenario, action: &mut Action, name_field: &str) -> ActionReturn {
    let Some(name) = action.structure.get_str(name_field).map(str::to_string) else {
        scenario.report_action_error(action, format!("no `{name_field}` specified"));
        return ActionReturn::ErrorReported;
    };
    let rank = match action.structure.get("rank") {
        Some(Value::Int(value)) if *value >= 0 => *value as u32,
        Some(Value::Str(named)) => match named.as_str() {
            "none" => rank::NONE,
            "marginal" => rank::MARGINAL,
            "secondary" => rank::SECONDARY,
            "primary" => rank::PRIMARY,
            other => {
                scenario.report_action_error(action, format!("unknown rank `{other}`"));
                return ActionReturn::ErrorReported;
            }
        },
        _ => {
            scenario.report_action_error(action, "no valid `rank` specified");
            return ActionReturn::ErrorReported;
        }
    };
    scenario.feature_ranks.insert(name, rank);
    ActionReturn::Ok
}
