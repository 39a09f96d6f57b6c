//! `appsrc-push` and `appsrc-eos`: feed data into application sources.

use tracing::debug;
use veristream_pipeline::{Buffer, PipelineState};

use crate::action::{Action, ActionReturn};
use crate::scenario::Scenario;
use crate::types::{ActionParameter, ActionType, ActionTypeRegistry};

use super::{pipeline_or_report, single_target};

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("appsrc-push", "core")
            .description(
                "Queues a buffer in an appsrc. If the pipeline state allows flow of \
                 buffers, the next action is not run until the buffer has been pushed",
            )
            .parameter(ActionParameter::required(
                "target-element-name",
                "string",
                "The name of the appsrc to push data on",
            ))
            .parameter(ActionParameter::required(
                "file-name",
                "string",
                "Relative path to a file whose contents will be pushed as a buffer",
            ))
            .parameter(ActionParameter::optional(
                "offset",
                "uint64",
                "Offset within the file where the buffer will start",
            ))
            .parameter(ActionParameter::optional(
                "size",
                "uint64",
                "Number of bytes from the file that will be pushed as a buffer",
            ))
            .parameter(ActionParameter::optional(
                "caps",
                "caps",
                "Caps for the buffer to be pushed",
            ))
            .execute(execute_appsrc_push)
            .build(),
    );

    registry.register(
        ActionType::builder("appsrc-eos", "core")
            .description("Queues an EOS event in an appsrc")
            .parameter(ActionParameter::required(
                "target-element-name",
                "string",
                "The name of the appsrc to emit EOS on",
            ))
            .execute(|scenario, action| {
                let Some(pipeline) = pipeline_or_report(scenario, action) else {
                    return ActionReturn::ErrorReported;
                };
                let Some(target) = single_target(scenario, action, &pipeline) else {
                    return ActionReturn::ErrorReported;
                };
                match pipeline.push_eos(&target) {
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

fn execute_appsrc_push(scenario: &mut Scenario, action: &mut Action) -> ActionReturn {
    let Some(pipeline) = pipeline_or_report(scenario, action) else {
        return ActionReturn::ErrorReported;
    };
    let Some(target) = single_target(scenario, action, &pipeline) else {
        return ActionReturn::ErrorReported;
    };
    let Some(file_name) = action.structure.get_str("file-name") else {
        scenario.report_action_error(action, "no `file-name` specified");
        return ActionReturn::ErrorReported;
    };

    let data = match std::fs::read(file_name) {
        Ok(data) => data,
        Err(error) => {
            scenario.report_action_error(action, format!("could not read `{file_name}`: {error}"));
            return ActionReturn::ErrorReported;
        }
    };

    let offset = action
        .structure
        .get_int("offset")
        .filter(|o| *o >= 0)
        .unwrap_or(0) as usize;
    let size = action
        .structure
        .get_int("size")
        .filter(|s| *s >= 0)
        .map(|s| s as usize)
        .unwrap_or(data.len().saturating_sub(offset));
    if offset.saturating_add(size) > data.len() {
        scenario.report_action_error(
            action,
            format!(
                "range {offset}..{} is out of bounds for `{file_name}` ({} bytes)",
                offset + size,
                data.len()
            ),
        );
        return ActionReturn::ErrorReported;
    }

    let buffer = Buffer {
        data: data[offset..offset + size].to_vec(),
        caps: action.structure.get_str("caps").map(str::to_string),
    };

    let Some(id) = action.slot else {
        return ActionReturn::Error;
    };
    let completion = scenario.completion_handle(id);
    debug!(target = %target, bytes = buffer.data.len(), "pushing buffer");
    if let Err(error) = pipeline.push_buffer(&target, buffer, Box::new(move || completion.set_done()))
    {
        scenario.report_action_error(action, error.to_string());
        return ActionReturn::ErrorReported;
    }

    // With the pipeline prerolled the buffer flows immediately and the
    // next action must wait for it; before preroll it only flows once
    // the pipeline starts, so the action overlaps the queue.
    if pipeline.current_state() >= PipelineState::Paused {
        ActionReturn::Async
    } else {
        ActionReturn::Interlaced
    }
}
