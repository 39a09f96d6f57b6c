use tracing::debug;
use veristream_core::time::format_time;

use crate::action::ActionReturn;
use crate::types::{ActionType, ActionTypeFlags, ActionTypeRegistry};

use super::pipeline_or_report;

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("eos", "core")
            .description("Sends an EOS event to the pipeline")
            .flags(ActionTypeFlags::NO_EXECUTION_NOT_FATAL)
            .execute(|scenario, action| {
                let Some(pipeline) = pipeline_or_report(scenario, action) else {
                    return ActionReturn::ErrorReported;
                };
                debug!(
                    at = %format_time(action.playback_time),
                    "sending EOS to pipeline"
                );
                match pipeline.send_eos() {
                    Ok(()) => ActionReturn::Ok,
                    Err(_) => ActionReturn::Error,
                }
            })
            .build(),
    );
}
