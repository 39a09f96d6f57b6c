//! Scenario loading: reference resolution, file parsing, validation
//! against the action-type registry, and queue placement.
//!
//! Loader errors abort the scenario: every failure is reported through
//! the reporter and returned as a [`ScenarioError`].

pub mod search;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use veristream_core::time::secs_to_duration;
use veristream_core::{structure::parse_structures, IssueId, Reporter, Structure, Value};

use crate::action::{Action, ActionReturn};
use crate::config::EngineSettings;
use crate::error::ScenarioError;
use crate::expr;
use crate::scenario::{Scenario, ScenarioDescription};
use crate::types::{ActionTypeFlags, ActionTypeRegistry};

/// Load one or more colon-separated scenario references into a fresh
/// [`Scenario`]. At most one reference may be a non-config scenario;
/// config scenarios compose.
pub fn load(
    references: &str,
    registry: Arc<ActionTypeRegistry>,
    reporter: Reporter,
    settings: EngineSettings,
) -> Result<Scenario, ScenarioError> {
    let mut scenario = Scenario::new(reporter, registry, settings);
    load_into(&mut scenario, references)?;
    Ok(scenario)
}

pub fn load_into(scenario: &mut Scenario, references: &str) -> Result<(), ScenarioError> {
    // Config-injected actions run first so their constants and ranks are
    // visible to the scenario files.
    for entry in scenario.settings.config_actions.clone() {
        let mut structure = config_entry_to_action(&entry)?;
        // Types like set-property handle config entries through their
        // on-addition path instead of executing at load time.
        let handled_in_config = scenario
            .registry
            .lookup(structure.name())
            .is_some_and(|t| t.flags.contains(ActionTypeFlags::HANDLED_IN_CONFIG));
        if handled_in_config {
            structure.remove("as-config");
        }
        fill_action(scenario, &structure)?;
    }

    let mut found_action_scenario = false;
    let extra_dirs = scenario.settings.scenarios_paths.clone();
    let mut visited = HashSet::new();

    for reference in references.split(':').filter(|r| !r.is_empty()) {
        let Some(path) = search::resolve(reference, &extra_dirs, None) else {
            scenario.report(
                IssueId::ScenarioFileMalformed,
                format!("scenario `{reference}` not found in any search path"),
            );
            return Err(ScenarioError::ScenarioNotFound {
                name: reference.to_string(),
            });
        };
        let is_config = load_file(scenario, &path, &mut visited, false)?;
        if !is_config {
            if found_action_scenario {
                scenario.report(
                    IssueId::MultipleActionScenarios,
                    format!("`{reference}` is a second non-config scenario"),
                );
                return Err(ScenarioError::MultipleActionScenarios {
                    name: reference.to_string(),
                });
            }
            found_action_scenario = true;
        }
    }

    // Config overrides beat the description, which beats the defaults.
    scenario.max_latency = scenario
        .settings
        .max_latency
        .or(scenario.description.max_latency);
    scenario.max_dropped = scenario
        .settings
        .max_dropped
        .or(scenario.description.max_dropped);

    info!(
        actions = scenario.actions.len(),
        on_addition = scenario.on_addition_actions.len(),
        "scenario loaded"
    );
    Ok(())
}

/// Load a single file; returns whether it declared itself a config
/// scenario. `as_include` drops the file's own `description`.
fn load_file(
    scenario: &mut Scenario,
    path: &Path,
    visited: &mut HashSet<PathBuf>,
    as_include: bool,
) -> Result<bool, ScenarioError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        scenario.report(
            IssueId::ScenarioFileMalformed,
            format!("include cycle through `{}`", path.display()),
        );
        return Err(ScenarioError::IncludeCycle {
            location: path.display().to_string(),
        });
    }

    let text = std::fs::read_to_string(path).map_err(|e| {
        scenario.report(
            IssueId::ScenarioFileMalformed,
            format!("cannot read `{}`: {e}", path.display()),
        );
        ScenarioError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        }
    })?;

    let structures = parse_structures(&text).map_err(|source| {
        scenario.report(
            IssueId::ScenarioFileMalformed,
            format!("`{}`: {source}", path.display()),
        );
        ScenarioError::Malformed {
            path: path.display().to_string(),
            source,
        }
    })?;

    let mut is_config = false;
    for structure in &structures {
        match structure.name() {
            "description" | "meta" => {
                let description = ScenarioDescription::from_structure(structure);
                is_config = description.is_config;
                if !as_include {
                    scenario.description = description;
                }
            }
            "include" => {
                let Some(location) = structure.get_str("location") else {
                    scenario.report(
                        IssueId::IncludeNotFound,
                        "include without a `location` field".to_string(),
                    );
                    return Err(ScenarioError::IncludeNotFound {
                        location: String::new(),
                    });
                };
                let extra_dirs = scenario.settings.scenarios_paths.clone();
                let Some(target) = search::resolve(location, &extra_dirs, Some(path)) else {
                    scenario.report(
                        IssueId::IncludeNotFound,
                        format!("include target `{location}` not found"),
                    );
                    return Err(ScenarioError::IncludeNotFound {
                        location: location.to_string(),
                    });
                };
                load_file(scenario, &target, visited, true)?;
            }
            _ => fill_action(scenario, structure)?,
        }
    }

    debug!(path = %path.display(), is_config, "loaded scenario file");
    Ok(is_config)
}

/// Validate one action structure against the registry and either execute
/// it (config types) or place it on the right queue.
pub(crate) fn fill_action(
    scenario: &mut Scenario,
    structure: &Structure,
) -> Result<(), ScenarioError> {
    let type_name = structure.name().to_string();
    let Some(action_type) = scenario.registry.lookup(&type_name) else {
        if structure.get_bool("optional-action-type").unwrap_or(false) {
            debug!(type_name, "skipping optional unknown action type");
            return Ok(());
        }
        scenario.report(
            IssueId::UnknownActionType,
            format!("unknown action type `{type_name}`"),
        );
        return Err(ScenarioError::UnknownActionType { name: type_name });
    };

    for parameter in action_type.mandatory_parameters() {
        if !structure.has_field(&parameter.name) {
            scenario.report(
                IssueId::MissingMandatoryField,
                format!(
                    "mandatory field `{}` not present on `{structure}`",
                    parameter.name
                ),
            );
            return Err(ScenarioError::MissingMandatoryField {
                action: type_name,
                field: parameter.name.clone(),
            });
        }
    }

    let mut action = Action::new(type_name.clone(), structure.clone());
    action.action_number = scenario.next_action_number();

    match structure
        .get("playback-time")
        .or_else(|| structure.get("playback_time"))
    {
        Some(Value::Int(secs)) => action.playback_time = secs_to_duration(*secs as f64),
        Some(Value::Double(secs)) => action.playback_time = secs_to_duration(*secs),
        Some(Value::Str(_)) => {
            // Expressions may reference `duration`; parse once it is
            // known, at the latest on the first async-done.
            action.needs_playback_parsing = true;
            scenario.needs_playback_parsing = true;
        }
        Some(other) => {
            return Err(invalid_field(
                scenario,
                &action,
                "playback-time",
                format!("expected a time, got `{other}`"),
            ));
        }
        None => debug!(%structure, "no playback time for action"),
    }

    match structure.get("timeout") {
        Some(Value::Int(secs)) => action.timeout = secs_to_duration(*secs as f64),
        Some(Value::Double(secs)) => action.timeout = secs_to_duration(*secs),
        Some(Value::Str(expression)) => {
            let substituted = scenario.vars.substitute(expression)?;
            let secs = expr::eval(&substituted, &|name| scenario.vars.lookup_double(name))?;
            action.timeout = secs_to_duration(secs);
        }
        Some(other) => {
            return Err(invalid_field(
                scenario,
                &action,
                "timeout",
                format!("expected a time, got `{other}`"),
            ));
        }
        None => {}
    }

    if let Some(optional) = structure.get_bool("optional") {
        if optional && !action_type.flags.contains(ActionTypeFlags::CAN_BE_OPTIONAL) {
            scenario.report(
                IssueId::ScenarioFileMalformed,
                format!("action type `{}` cannot be optional", action_type.name),
            );
            return Err(ScenarioError::CannotBeOptional {
                action: action.describe(),
                type_name: action_type.name.clone(),
            });
        }
        action.optional = optional;
    }

    if action_type.flags.is_config() || structure.get_bool("as-config").unwrap_or(false) {
        let result = (action_type.execute)(scenario, &mut action);
        if matches!(result, ActionReturn::Error | ActionReturn::ErrorReported) {
            if result == ActionReturn::Error {
                scenario.report(
                    IssueId::ScenarioActionExecutionError,
                    format!("config action failed: {}", action.describe()),
                );
            }
            return Err(ScenarioError::InvalidField {
                action: action.type_name,
                field: "as-config".to_string(),
                reason: "config action failed".to_string(),
            });
        }
        return Ok(());
    }

    let can_execute_on_addition = action_type
        .flags
        .contains(ActionTypeFlags::CAN_EXECUTE_ON_ADDITION)
        && action.playback_time.is_none()
        && !action.needs_playback_parsing
        && !scenario.actions.iter().any(|id| {
            scenario
                .arena
                .get(*id)
                .is_some_and(|a| a.playback_time.is_some())
        });

    let id = scenario.arena.insert(action);
    if can_execute_on_addition {
        scenario.on_addition_actions.push(id);
    } else {
        scenario.actions.push_back(id);
    }
    Ok(())
}

fn invalid_field(
    scenario: &Scenario,
    action: &Action,
    field: &str,
    reason: String,
) -> ScenarioError {
    scenario.report(
        IssueId::ScenarioFileMalformed,
        format!("invalid `{field}` on `{}`: {reason}", action.describe()),
    );
    ScenarioError::InvalidField {
        action: action.type_name.clone(),
        field: field.to_string(),
        reason,
    }
}

/// Turn an `action=<type>` config entry into the action structure it
/// describes.
fn config_entry_to_action(entry: &Structure) -> Result<Structure, ScenarioError> {
    let Some(type_name) = entry.get_str("action") else {
        return Err(ScenarioError::InvalidField {
            action: entry.name().to_string(),
            field: "action".to_string(),
            reason: "config entry without an action type".to_string(),
        });
    };
    let mut structure = Structure::new(type_name);
    for (key, value) in entry.fields() {
        if key != "action" {
            structure.set(key, value.clone());
        }
    }
    // Config-injected actions always behave as config.
    if !structure.has_field("as-config") {
        structure.set("as-config", Value::Bool(true));
    }
    Ok(structure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use veristream_core::{CollectingSink, FatalityFlags};

    fn loader_fixture() -> (Arc<CollectingSink>, Reporter, Arc<ActionTypeRegistry>) {
        let sink = CollectingSink::new();
        let reporter = Reporter::new("loader-test", sink.clone(), FatalityFlags::default());
        let registry = Arc::new(ActionTypeRegistry::with_builtins());
        (sink, reporter, registry)
    }

    fn write_scenario(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_a_basic_scenario_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(
            dir.path(),
            "basic.scenario",
            "description, summary=\"basic\", handles-states=true;\n\
             set-state, state=playing;\n\
             seek, playback-time=1.0, start=5.0, flags=accurate+flush;\n\
             stop, playback-time=10.0;\n",
        );
        let (_sink, reporter, registry) = loader_fixture();
        let scenario = load(
            path.to_str().unwrap(),
            registry,
            reporter,
            EngineSettings::default(),
        )
        .unwrap();
        assert!(scenario.description().handles_states);
        assert_eq!(scenario.pending_actions(), 3);
    }

    #[test]
    fn unknown_action_type_aborts_unless_optional() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write_scenario(dir.path(), "bad.scenario", "frobnicate, x=1;\n");
        let (sink, reporter, registry) = loader_fixture();
        let err = load(
            bad.to_str().unwrap(),
            registry.clone(),
            reporter.clone(),
            EngineSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownActionType { .. }));
        assert_eq!(sink.count(IssueId::UnknownActionType), 1);

        let tolerated = write_scenario(
            dir.path(),
            "tolerated.scenario",
            "frobnicate, x=1, optional-action-type=true;\nstop;\n",
        );
        let scenario = load(
            tolerated.to_str().unwrap(),
            registry,
            reporter,
            EngineSettings::default(),
        )
        .unwrap();
        assert_eq!(scenario.pending_actions(), 1);
    }

    #[test]
    fn missing_mandatory_field_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(dir.path(), "noseek.scenario", "seek, playback-time=0.0;\n");
        let (sink, reporter, registry) = loader_fixture();
        let err = load(
            path.to_str().unwrap(),
            registry,
            reporter,
            EngineSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::MissingMandatoryField { ref field, .. } if field == "start"
        ));
        assert_eq!(sink.count(IssueId::MissingMandatoryField), 1);
    }

    #[test]
    fn two_action_scenarios_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_scenario(dir.path(), "one.scenario", "stop;\n");
        let second = write_scenario(dir.path(), "two.scenario", "stop;\n");
        let refs = format!(
            "{}:{}",
            first.to_str().unwrap(),
            second.to_str().unwrap()
        );
        let (_sink, reporter, registry) = loader_fixture();
        let err = load(&refs, registry, reporter, EngineSettings::default()).unwrap_err();
        assert!(matches!(err, ScenarioError::MultipleActionScenarios { .. }));
    }

    #[test]
    fn config_scenarios_compose_with_one_action_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_scenario(
            dir.path(),
            "cfg.scenario",
            "description, is-config=true;\nset-vars, base=2.0, as-config=true;\n",
        );
        let main = write_scenario(dir.path(), "main.scenario", "stop, playback-time=1.0;\n");
        let refs = format!("{}:{}", config.to_str().unwrap(), main.to_str().unwrap());
        let (_sink, reporter, registry) = loader_fixture();
        let scenario = load(&refs, registry, reporter, EngineSettings::default()).unwrap();
        assert_eq!(scenario.vars().lookup_double("base"), Some(2.0));
        assert_eq!(scenario.pending_actions(), 1);
    }

    #[test]
    fn includes_resolve_relative_to_the_including_file() {
        let dir = tempfile::tempdir().unwrap();
        write_scenario(
            dir.path(),
            "part.scenario",
            "description, is-config=true;\npause, playback-time=1.0;\n",
        );
        let base = write_scenario(
            dir.path(),
            "base.scenario",
            "description, summary=outer;\ninclude, location=part;\nstop, playback-time=2.0;\n",
        );
        let (_sink, reporter, registry) = loader_fixture();
        let scenario = load(
            base.to_str().unwrap(),
            registry,
            reporter,
            EngineSettings::default(),
        )
        .unwrap();
        // The include's description is ignored, its actions merge in.
        assert_eq!(scenario.description().summary.as_deref(), Some("outer"));
        assert_eq!(scenario.pending_actions(), 2);
    }

    #[test]
    fn missing_include_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_scenario(
            dir.path(),
            "base.scenario",
            "include, location=never-existed;\n",
        );
        let (sink, reporter, registry) = loader_fixture();
        let err = load(
            base.to_str().unwrap(),
            registry,
            reporter,
            EngineSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ScenarioError::IncludeNotFound { .. }));
        assert_eq!(sink.count(IssueId::IncludeNotFound), 1);
    }

    #[test]
    fn string_playback_time_defers_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(
            dir.path(),
            "deferred.scenario",
            "set-vars, base=2.0, as-config=true;\nseek, playback-time=\"base*3\", start=0.0;\n",
        );
        let (_sink, reporter, registry) = loader_fixture();
        let scenario = load(
            path.to_str().unwrap(),
            registry,
            reporter,
            EngineSettings::default(),
        )
        .unwrap();
        let id = *scenario.actions.front().unwrap();
        let action = scenario.arena.get(id).unwrap();
        assert!(action.needs_playback_parsing);
        assert_eq!(action.playback_time, None);
    }

    #[test]
    fn config_injected_actions_run_before_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(
            dir.path(),
            "uses-var.scenario",
            "seek, playback-time=0.0, start=\"base\";\n",
        );
        let mut settings = EngineSettings::default();
        settings.config_actions = parse_structures("core, action=set-vars, base=4.0;").unwrap();
        let (_sink, reporter, registry) = loader_fixture();
        let scenario = load(path.to_str().unwrap(), registry, reporter, settings).unwrap();
        assert_eq!(scenario.vars().lookup_double("base"), Some(4.0));
    }
}
