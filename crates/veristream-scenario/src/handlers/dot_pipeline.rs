use tracing::info;

use crate::action::ActionReturn;
use crate::types::{ActionType, ActionTypeRegistry};

use super::pipeline_or_report;

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("dot-pipeline", "core")
            .description(
                "Dumps a graph of the pipeline to the dump directory; the `name` field is \
                 used in the file name. The VERISTREAM_DUMP_DOT_DIR environment variable \
                 must point at the target directory",
            )
            .execute(|scenario, action| {
                let Some(pipeline) = pipeline_or_report(scenario, action) else {
                    return ActionReturn::ErrorReported;
                };
                let Some(dir) = scenario.settings.dump_dot_dir.clone() else {
                    info!("dump dir is not set, not dumping the pipeline graph");
                    return ActionReturn::Ok;
                };
                let name = if action.name.is_empty() {
                    format!("{}-{}", pipeline.name(), action.action_number)
                } else {
                    action.name.clone()
                };
                match pipeline.dump_graph(&dir.join(format!("{name}.dot"))) {
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
