//! `check-last-sample`: compare the SHA-1 of a sink's most recently
//! rendered buffer against a reference checksum.

use sha1::{Digest, Sha1};
use veristream_pipeline::SinkInfo;

use crate::action::{Action, ActionReturn};
use crate::scenario::Scenario;
use crate::types::{ActionParameter, ActionType, ActionTypeFlags, ActionTypeRegistry};

use super::pipeline_or_report;

pub(super) fn register(registry: &mut ActionTypeRegistry) {
    registry.register(
        ActionType::builder("check-last-sample", "core")
            .description(
                "Checks the last-sample checksum on the declared sink element; useful to \
                 validate the exact output frame after a seek",
            )
            .flags(ActionTypeFlags::INTERLACED)
            .parameter(ActionParameter::optional(
                "sink-name",
                "string",
                "The name of the sink element to check the sample on",
            ))
            .parameter(ActionParameter::optional(
                "sink-factory-name",
                "string",
                "The name of the factory of the sink element to check the sample on",
            ))
            .parameter(ActionParameter::optional(
                "sinkpad-caps",
                "string",
                "The caps (as string) of the sink to check",
            ))
            .parameter(ActionParameter::required(
                "checksum",
                "string",
                "The reference SHA-1 checksum of the buffer, or the name of a variable \
                 holding it",
            ))
            .execute(execute_check_last_sample)
            .build(),
    );
}

fn sink_matches(sink: &SinkInfo, action: &Action) -> bool {
    let name = action.structure.get_str("sink-name");
    let factory = action.structure.get_str("sink-factory-name");
    let caps = action.structure.get_str("sinkpad-caps");
    if name.is_none() && factory.is_none() && caps.is_none() {
        return true;
    }
    if name.is_some_and(|n| n == sink.name) {
        return true;
    }
    if factory.is_some_and(|f| f == sink.factory) {
        return true;
    }
    caps.is_some_and(|wanted| sink.pad_caps.as_deref() == Some(wanted))
}

fn execute_check_last_sample(scenario: &mut Scenario, action: &mut Action) -> ActionReturn {
    let Some(pipeline) = pipeline_or_report(scenario, action) else {
        return ActionReturn::ErrorReported;
    };

    let mut matches = pipeline
        .sinks()
        .into_iter()
        .filter(|sink| sink_matches(sink, action));
    let Some(sink) = matches.next() else {
        scenario.report_action_error(
            action,
            format!(
                "could not `check-last-sample` as no sink was found from description `{}`",
                action.describe()
            ),
        );
        return ActionReturn::ErrorReported;
    };
    if let Some(other) = matches.next() {
        scenario.report_action_error(
            action,
            format!(
                "could not `check-last-sample`: several sinks match (`{}` and `{}`)",
                sink.name, other.name
            ),
        );
        return ActionReturn::ErrorReported;
    }

    let Some(sample) = pipeline.last_sample(&sink.name) else {
        scenario.report_action_error(
            action,
            format!(
                "could not `check-last-sample` as `{}` has no last sample; make sure the \
                 sink keeps its last sample around",
                sink.name
            ),
        );
        return ActionReturn::ErrorReported;
    };

    let Some(reference) = action.structure.get_str("checksum") else {
        scenario.report_action_error(action, "no `checksum` specified");
        return ActionReturn::ErrorReported;
    };
    // The checksum may name a variable defined with `set-vars`.
    let reference = scenario
        .vars
        .get(reference)
        .and_then(|v| v.as_str())
        .unwrap_or(reference)
        .to_string();

    let mut hasher = Sha1::new();
    hasher.update(&sample.data);
    let sum = hex_digest(&hasher.finalize());

    if sum != reference {
        scenario.report_action_error(
            action,
            format!("last buffer checksum `{sum}` is different than the expected one: `{reference}`"),
        );
        return ActionReturn::ErrorReported;
    }
    ActionReturn::Ok
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_digest_is_lowercase_hex() {
        let mut hasher = Sha1::new();
        hasher.update(b"abc");
        assert_eq!(
            hex_digest(&hasher.finalize()),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn sink_specs_match_name_factory_or_caps() {
        let sink = SinkInfo {
            name: "fakesink0".into(),
            factory: "fakesink".into(),
            pad_caps: Some("video/x-raw".into()),
        };
        let by_name: veristream_core::Structure =
            "check-last-sample, sink-name=fakesink0, checksum=x;".parse().unwrap();
        let by_factory: veristream_core::Structure =
            "check-last-sample, sink-factory-name=fakesink, checksum=x;"
                .parse()
                .unwrap();
        let by_caps: veristream_core::Structure =
            "check-last-sample, sinkpad-caps=video/x-raw, checksum=x;"
                .parse()
                .unwrap();
        let wrong: veristream_core::Structure =
            "check-last-sample, sink-name=other, checksum=x;".parse().unwrap();
        assert!(sink_matches(&sink, &Action::new("check-last-sample", by_name)));
        assert!(sink_matches(&sink, &Action::new("check-last-sample", by_factory)));
        assert!(sink_matches(&sink, &Action::new("check-last-sample", by_caps)));
        assert!(!sink_matches(&sink, &Action::new("check-last-sample", wrong)));
    }
}
