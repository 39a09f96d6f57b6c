use veristream_core::time::format_time;
use veristream_core::IssueId;
use veristream_pipeline::{SeekFlags, SeekSpec, SeekType};

use crate::action::{Action, ActionReturn};
use crate::scenario::Scenario;
use crate::types::{ActionParameter, ActionType, ActionTypeFlags, ActionTypeRegistry};

use super::pipeline_or_report;

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("seek", "core")
            .description(
                "Seeks into the stream. Example of a seek firing when the stream reaches 5s, \
                 seeking to 10s:\n  seek, playback-time=5.0, start=10.0, flags=accurate+flush",
            )
            .flags(ActionTypeFlags::NEEDS_CLOCK)
            .parameter(
                ActionParameter::required(
                    "start",
                    "double or string (time)",
                    "The position to seek to",
                )
                .with_variables("position, duration"),
            )
            .parameter(ActionParameter::optional(
                "flags",
                "string",
                "The seek flags, combined with `+` (e.g. accurate+flush)",
            ))
            .parameter(
                ActionParameter::optional("rate", "double", "The rate of the seek")
                    .with_default("1.0"),
            )
            .parameter(
                ActionParameter::optional(
                    "start_type",
                    "string",
                    "The seek type for the start endpoint (none, set or end)",
                )
                .with_default("set"),
            )
            .parameter(
                ActionParameter::optional(
                    "stop_type",
                    "string",
                    "The seek type for the stop endpoint (none, set or end)",
                )
                .with_default("set"),
            )
            .parameter(
                ActionParameter::optional(
                    "stop",
                    "double or string (time)",
                    "The position at which playback stops",
                )
                .with_variables("position, duration"),
            )
            .execute(execute_seek)
            .build(),
    );
}

fn execute_seek(scenario: &mut Scenario, action: &mut Action) -> ActionReturn {
    let Some(pipeline) = pipeline_or_report(scenario, action) else {
        return ActionReturn::ErrorReported;
    };

    let start = match scenario.action_time_field(action, "start") {
        Ok(Some(start)) => start,
        Ok(None) | Err(_) => {
            scenario.report_action_error(action, "could not parse seek `start`");
            return ActionReturn::ErrorReported;
        }
    };
    let stop = match scenario.action_time_field(action, "stop") {
        Ok(stop) => stop,
        Err(_) => {
            scenario.report_action_error(action, "could not parse seek `stop`");
            return ActionReturn::ErrorReported;
        }
    };

    let rate = action.structure.get_double("rate").unwrap_or(1.0);
    let start_type = match parse_seek_type(scenario, action, "start_type") {
        Ok(t) => t,
        Err(()) => return ActionReturn::ErrorReported,
    };
    let stop_type = match parse_seek_type(scenario, action, "stop_type") {
        Ok(t) => t,
        Err(()) => return ActionReturn::ErrorReported,
    };
    if start_type == SeekType::End || stop_type == SeekType::End {
        scenario.report_action_error(action, "seeking relative to the stream end is not supported");
        return ActionReturn::ErrorReported;
    }

    let flags = match action.structure.get_str("flags") {
        Some(names) => match SeekFlags::from_names(names) {
            Ok(flags) => flags,
            Err(error) => {
                scenario.report_action_error(action, error);
                return ActionReturn::ErrorReported;
            }
        },
        None => SeekFlags::NONE,
    };

    let spec = SeekSpec {
        rate,
        start_type,
        start: Some(start),
        stop_type,
        stop,
        flags,
    };

    if let Err(error) = pipeline.seek(&spec) {
        scenario.report(
            IssueId::EventSeekNotHandled,
            format!(
                "could not execute seek (position {}), seeking to: {} stop: {} rate {rate}: {error}",
                format_time(action.playback_time),
                format_time(spec.start),
                format_time(spec.stop),
            ),
        );
        return ActionReturn::ErrorReported;
    }

    scenario.last_seek = Some(spec);
    scenario.seek_flags = flags;
    ActionReturn::Async
}

fn parse_seek_type(
    scenario: &Scenario,
    action: &Action,
    field: &str,
) -> Result<SeekType, ()> {
    let Some(raw) = action.structure.get_str(field) else {
        return Ok(SeekType::Set);
    };
    raw.parse().map_err(|error: String| {
        scenario.report_action_error(action, error);
    })
}
