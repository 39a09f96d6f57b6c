use crate::action::ActionReturn;
use crate::scenario::ScenarioDescription;
use crate::types::{ActionParameter, ActionType, ActionTypeFlags, ActionTypeRegistry};

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("description", "core")
            .description("Allows to describe the scenario in various ways")
            .flags(ActionTypeFlags::CONFIG)
            .parameter(ActionParameter::optional(
                "summary",
                "string",
                "A human readable summary of what the scenario does",
            ))
            .parameter(ActionParameter::optional(
                "is-config",
                "boolean",
                "Whether the scenario is a config only scenario",
            ))
            .parameter(ActionParameter::optional(
                "handles-states",
                "boolean",
                "Whether the scenario drives the pipeline states itself",
            ))
            .parameter(ActionParameter::optional(
                "seek",
                "boolean",
                "Whether the scenario executes seek actions",
            ))
            .parameter(ActionParameter::optional(
                "reverse-playback",
                "boolean",
                "Whether the scenario plays the stream backward",
            ))
            .parameter(ActionParameter::optional(
                "need-clock-sync",
                "boolean",
                "Whether the scenario needs the execution to be synchronized with the clock",
            ))
            .parameter(ActionParameter::optional(
                "min-media-duration",
                "double",
                "Minimum media duration required to run the scenario",
            ))
            .parameter(ActionParameter::optional(
                "min-audio-track",
                "int",
                "Minimum number of audio tracks required",
            ))
            .parameter(ActionParameter::optional(
                "min-video-track",
                "int",
                "Minimum number of video tracks required",
            ))
            .parameter(ActionParameter::optional(
                "duration",
                "double",
                "Expected scenario execution duration",
            ))
            .parameter(ActionParameter::optional(
                "pipeline-name",
                "string",
                "Glob of the pipeline names the scenario can run on",
            ))
            .parameter(ActionParameter::optional(
                "max-latency",
                "double or string (time)",
                "Maximum latency in seconds the pipeline may report",
            ))
            .parameter(ActionParameter::optional(
                "max-dropped",
                "int",
                "Maximum number of dropped buffers tolerated",
            ))
            .execute(|scenario, action| {
                scenario.description = ScenarioDescription::from_structure(&action.structure);
                ActionReturn::Ok
            })
            .build(),
    );
}
