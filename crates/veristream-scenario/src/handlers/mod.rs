//! Built-in action handlers, one module per family.

mod appsrc;
mod check_last_sample;
mod debug;
mod description;
mod dot_pipeline;
mod emit_signal;
mod eos;
mod flush;
mod ranks;
mod seek;
mod set_property;
mod set_vars;
mod state;
mod switch_track;
mod wait;

use std::sync::Arc;

use veristream_pipeline::{Pipeline, TargetSelector};

use crate::action::{Action, ActionReturn};
use crate::scenario::Scenario;
use crate::types::{ActionParameter, ActionType, ActionTypeRegistry};

/// Install every built-in action type.
pub fn register_builtins(registry: &mut ActionTypeRegistry) {
    description::register(registry);
    seek::register(registry);
    state::register(registry);
    eos::register(registry);
    switch_track::register(registry);
    wait::register(registry);
    set_property::register(registry);
    set_vars::register(registry);
    ranks::register(registry);
    debug::register(registry);
    appsrc::register(registry);
    flush::register(registry);
    emit_signal::register(registry);
    dot_pipeline::register(registry);
    check_last_sample::register(registry);

    // Handled directly by the loader; registered so it shows up in
    // listings and validates like any other type.
    registry.register(
        ActionType::builder("include", "core")
            .description("Includes a sub scenario file")
            .parameter(ActionParameter::required(
                "location",
                "string",
                "The location of the sub scenario to include",
            ))
            .execute(|scenario, action| {
                scenario.report_action_error(action, "include is only valid while loading");
                ActionReturn::ErrorReported
            })
            .build(),
    );
}

/// Reacquire the pipeline; reports and fails the action when it is gone.
pub(crate) fn pipeline_or_report(
    scenario: &Scenario,
    action: &Action,
) -> Option<Arc<dyn Pipeline>> {
    let pipeline = scenario.pipeline();
    if pipeline.is_none() {
        scenario.report_action_error(action, "can't execute action: no pipeline");
    }
    pipeline
}

/// Build the element selector from the conventional `target-element-*`
/// fields; reports when none is given.
pub(crate) fn target_selector(scenario: &Scenario, action: &Action) -> Option<TargetSelector> {
    let selector = TargetSelector::from_fields(
        action.structure.get_str("target-element-name"),
        action.structure.get_str("target-element-klass"),
        action.structure.get_str("target-element-factory-name"),
    );
    if selector.is_none() {
        scenario.report_action_error(action, "no target element specified");
    }
    selector
}

/// Resolve the single element a name-addressed action operates on.
pub(crate) fn single_target(
    scenario: &Scenario,
    action: &Action,
    pipeline: &Arc<dyn Pipeline>,
) -> Option<String> {
    let Some(name) = action.structure.get_str("target-element-name") else {
        scenario.report_action_error(action, "no `target-element-name` specified");
        return None;
    };
    let selector = TargetSelector::Name(name.to_string());
    let mut targets = pipeline.resolve_targets(&selector);
    if targets.is_empty() {
        scenario.report_action_error(action, format!("target element not found ({selector})"));
        return None;
    }
    Some(targets.swap_remove(0))
}
