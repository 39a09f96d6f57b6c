//! The `switch-track` action, with one back-end per pipeline flavor:
//! input-selector elements, playbin-style `current-*` properties, or
//! playbin3-style stream collections.

use std::sync::Arc;

use tracing::info;
use veristream_core::Value;
use veristream_pipeline::{
    Pipeline, PipelineState, StreamKind, TargetSelector, TrackSwitchBackend,
};

use crate::action::{Action, ActionReturn};
use crate::scenario::Scenario;
use crate::types::{ActionParameter, ActionType, ActionTypeRegistry};

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("switch-track", "core")
            .description("Switches tracks of a given type")
            .parameter(
                ActionParameter::optional(
                    "type",
                    "string",
                    "Selects which track type to change (audio, video or text)",
                )
                .with_default("audio"),
            )
            .parameter(
                ActionParameter::optional(
                    "index",
                    "string: relative switch, int: absolute index",
                    "The Nth track of the given type, or a relative change with a `+` or \
                     `-` prefix (`+1` means next track)",
                )
                .with_default("+1"),
            )
            .parameter(ActionParameter::optional(
                "disable",
                "boolean",
                "Disable the given track type instead of selecting a track",
            ))
            .execute(execute_switch_track)
            .build(),
    );
}

struct TrackIndex {
    relative: bool,
    value: i64,
}

fn parse_index(action: &Action) -> Result<TrackIndex, String> {
    match action.structure.get("index") {
        None => Ok(TrackIndex {
            relative: true,
            value: 1,
        }),
        Some(Value::Int(value)) => Ok(TrackIndex {
            relative: false,
            value: *value,
        }),
        Some(Value::Str(raw)) => {
            let relative = raw.starts_with('+') || raw.starts_with('-');
            let value: i64 = raw
                .parse()
                .map_err(|_| format!("invalid track index `{raw}`"))?;
            Ok(TrackIndex { relative, value })
        }
        Some(other) => Err(format!("invalid track index `{other}`")),
    }
}

fn execute_switch_track(scenario: &mut Scenario, action: &mut Action) -> ActionReturn {
    let Some(pipeline) = super::pipeline_or_report(scenario, action) else {
        return ActionReturn::ErrorReported;
    };

    if scenario.pending_switch_track.is_some() {
        scenario.report_action_error(action, "a track switch is already pending");
        return ActionReturn::ErrorReported;
    }

    let kind = StreamKind::from_name(action.structure.get_str("type").unwrap_or("audio"));
    let disable = action.structure.get_bool("disable").unwrap_or(false);
    let index = match parse_index(action) {
        Ok(index) => index,
        Err(error) => {
            scenario.report_action_error(action, error);
            return ActionReturn::ErrorReported;
        }
    };

    match pipeline.track_backend() {
        TrackSwitchBackend::Selector => {
            switch_with_selector(scenario, action, &pipeline, kind, disable, &index)
        }
        TrackSwitchBackend::PlaybinFlags => {
            switch_with_flags(scenario, action, &pipeline, kind, disable, &index)
        }
        TrackSwitchBackend::StreamCollection => {
            switch_with_streams(scenario, action, &pipeline, kind, disable, &index)
        }
    }
}

/// Input-selector back-end: one selector element per track type, indexed
/// through its `active-index` / `n-pads` properties.
fn switch_with_selector(
    scenario: &mut Scenario,
    action: &mut Action,
    pipeline: &Arc<dyn Pipeline>,
    kind: StreamKind,
    disable: bool,
    index: &TrackIndex,
) -> ActionReturn {
    if disable {
        scenario.report_action_error(
            action,
            "disabling a track is not supported on selector pipelines",
        );
        return ActionReturn::ErrorReported;
    }

    let selectors = pipeline.resolve_targets(&TargetSelector::FactoryName("input-selector".into()));
    let Some(selector) = selectors
        .into_iter()
        .find(|name| name.contains(kind.property_suffix()))
    else {
        scenario.report_action_error(
            action,
            format!("no input-selector found for `{}`", kind.property_suffix()),
        );
        return ActionReturn::ErrorReported;
    };

    let current = pipeline
        .get_property(&selector, "active-index")
        .ok()
        .and_then(|v| v.as_int())
        .unwrap_or(0);
    let total = pipeline
        .get_property(&selector, "n-pads")
        .ok()
        .and_then(|v| v.as_int())
        .unwrap_or(0);
    if total <= 0 {
        scenario.report_action_error(action, format!("selector `{selector}` has no pads"));
        return ActionReturn::ErrorReported;
    }

    let next = resolve_index(current, total, index);
    info!(selector = %selector, from = current, to = next, "switching track");
    if let Err(error) = pipeline.set_property(&selector, "active-index", &Value::Int(next)) {
        scenario.report_action_error(action, error.to_string());
        return ActionReturn::ErrorReported;
    }
    ActionReturn::Ok
}

/// Playbin-flags back-end: `current-audio`-style properties on the
/// pipeline itself, plus a `flags` bit per track type for disabling.
fn switch_with_flags(
    scenario: &mut Scenario,
    action: &mut Action,
    pipeline: &Arc<dyn Pipeline>,
    kind: StreamKind,
    disable: bool,
    index: &TrackIndex,
) -> ActionReturn {
    let flag_bit: i64 = match kind {
        StreamKind::Video => 1 << 0,
        StreamKind::Audio => 1 << 1,
        StreamKind::Text => 1 << 2,
        StreamKind::Unknown => {
            scenario.report_action_error(action, "unknown track type");
            return ActionReturn::ErrorReported;
        }
    };

    let read_flags = || {
        pipeline
            .get_property("", "flags")
            .ok()
            .and_then(|v| v.as_int())
            .unwrap_or(0)
    };

    if disable {
        let flags = read_flags() & !flag_bit;
        if let Err(error) = pipeline.set_property("", "flags", &Value::Int(flags)) {
            scenario.report_action_error(action, error.to_string());
            return ActionReturn::ErrorReported;
        }
        return ActionReturn::Ok;
    }

    let flags = read_flags() | flag_bit;
    if let Err(error) = pipeline.set_property("", "flags", &Value::Int(flags)) {
        scenario.report_action_error(action, error.to_string());
        return ActionReturn::ErrorReported;
    }

    let suffix = kind.property_suffix();
    let current_field = format!("current-{suffix}");
    let total_field = format!("n-{suffix}");
    let current = pipeline
        .get_property("", &current_field)
        .ok()
        .and_then(|v| v.as_int())
        .unwrap_or(0);
    let total = pipeline
        .get_property("", &total_field)
        .ok()
        .and_then(|v| v.as_int())
        .unwrap_or(0);
    if total <= 0 {
        scenario.report_action_error(action, format!("no `{suffix}` track to switch to"));
        return ActionReturn::ErrorReported;
    }

    let next = resolve_index(current, total, index);
    info!(from = current, to = next, kind = suffix, "switching track");
    if let Err(error) = pipeline.set_property("", &current_field, &Value::Int(next)) {
        scenario.report_action_error(action, error.to_string());
        return ActionReturn::ErrorReported;
    }
    ActionReturn::Ok
}

/// Stream-collection back-end: compute the expected selection, ask for
/// it, and complete on the matching `streams-selected` message.
fn switch_with_streams(
    scenario: &mut Scenario,
    action: &mut Action,
    pipeline: &Arc<dyn Pipeline>,
    kind: StreamKind,
    disable: bool,
    index: &TrackIndex,
) -> ActionReturn {
    let streams = pipeline.streams();
    let selected = pipeline.selected_stream_ids();

    let of_kind: Vec<&str> = streams
        .iter()
        .filter(|s| s.kind == kind)
        .map(|s| s.id.as_str())
        .collect();
    if of_kind.is_empty() && !disable {
        scenario.report_action_error(
            action,
            format!("no streams of type `{}` to switch", kind.property_suffix()),
        );
        return ActionReturn::ErrorReported;
    }

    // Keep every selected stream of the other kinds.
    let mut expected: Vec<String> = selected
        .iter()
        .filter(|id| !of_kind.contains(&id.as_str()))
        .cloned()
        .collect();

    if !disable {
        let current = of_kind
            .iter()
            .position(|id| selected.iter().any(|s| s == id))
            .unwrap_or(0) as i64;
        let next = resolve_index(current, of_kind.len() as i64, index);
        expected.push(of_kind[next as usize].to_string());
    }

    info!(expected = ?expected, "requesting stream selection");
    if let Err(error) = pipeline.select_streams(&expected) {
        scenario.report_action_error(action, error.to_string());
        return ActionReturn::ErrorReported;
    }

    let Some(id) = action.slot else {
        return ActionReturn::Error;
    };
    action.expected_streams = expected;
    scenario.pending_switch_track = Some(id);

    if pipeline.current_state() == PipelineState::Playing {
        ActionReturn::Async
    } else {
        ActionReturn::Interlaced
    }
}

fn resolve_index(current: i64, total: i64, index: &TrackIndex) -> i64 {
    let raw = if index.relative {
        current + index.value
    } else {
        index.value
    };
    raw.rem_euclid(total.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_indices_wrap() {
        let next = |current, total, value| {
            resolve_index(
                current,
                total,
                &TrackIndex {
                    relative: true,
                    value,
                },
            )
        };
        assert_eq!(next(0, 2, 1), 1);
        assert_eq!(next(1, 2, 1), 0);
        assert_eq!(next(0, 3, -1), 2);
    }

    #[test]
    fn absolute_indices_clamp_by_modulo() {
        let index = TrackIndex {
            relative: false,
            value: 5,
        };
        assert_eq!(resolve_index(0, 3, &index), 2);
    }
}
