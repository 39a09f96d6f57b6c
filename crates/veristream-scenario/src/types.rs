//! Action-type records and the rank-overriding registry.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::debug;

use crate::action::{Action, ActionReturn};
use crate::error::ScenarioError;
use crate::scenario::Scenario;

/// Scheduling flags carried by an action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionTypeFlags(u32);

impl ActionTypeFlags {
    pub const NONE: ActionTypeFlags = ActionTypeFlags(0);
    /// Executed at load time, never queued.
    pub const CONFIG: ActionTypeFlags = ActionTypeFlags(1 << 0);
    /// Needs clock synchronization to run meaningfully.
    pub const NEEDS_CLOCK: ActionTypeFlags = ActionTypeFlags(1 << 1);
    /// May complete asynchronously.
    pub const ASYNC: ActionTypeFlags = ActionTypeFlags(1 << 2);
    /// May run when a matching element appears, before playback starts.
    pub const CAN_EXECUTE_ON_ADDITION: ActionTypeFlags = ActionTypeFlags(1 << 3);
    /// Accepts `optional=true` on its actions.
    pub const CAN_BE_OPTIONAL: ActionTypeFlags = ActionTypeFlags(1 << 4);
    pub const DOESNT_NEED_PIPELINE: ActionTypeFlags = ActionTypeFlags(1 << 5);
    /// Leaving the action unexecuted at EOS is not a failure.
    pub const NO_EXECUTION_NOT_FATAL: ActionTypeFlags = ActionTypeFlags(1 << 6);
    /// Runs in parallel with subsequent actions.
    pub const INTERLACED: ActionTypeFlags = ActionTypeFlags(1 << 7);
    /// Consumed by the configuration layer, invisible to scenarios.
    pub const HANDLED_IN_CONFIG: ActionTypeFlags = ActionTypeFlags(1 << 8);

    pub fn contains(self, other: ActionTypeFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn is_config(self) -> bool {
        self.contains(ActionTypeFlags::CONFIG)
    }
}

impl std::ops::BitOr for ActionTypeFlags {
    type Output = ActionTypeFlags;

    fn bitor(self, rhs: ActionTypeFlags) -> ActionTypeFlags {
        ActionTypeFlags(self.0 | rhs.0)
    }
}

/// Registration ranks; higher wins on name collision.
pub mod rank {
    pub const NONE: u32 = 0;
    pub const MARGINAL: u32 = 64;
    pub const SECONDARY: u32 = 128;
    pub const PRIMARY: u32 = 256;
}

/// Schema entry for one action parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionParameter {
    pub name: String,
    pub description: String,
    pub mandatory: bool,
    /// Textual type hint, e.g. `double or string (time)`.
    pub types: String,
    pub default: Option<String>,
    pub possible_variables: Option<String>,
}

impl ActionParameter {
    pub fn required(name: &str, types: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            mandatory: true,
            types: types.to_string(),
            default: None,
            possible_variables: None,
        }
    }

    pub fn optional(name: &str, types: &str, description: &str) -> Self {
        Self {
            mandatory: false,
            ..Self::required(name, types, description)
        }
    }

    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    pub fn with_variables(mut self, vars: &str) -> Self {
        self.possible_variables = Some(vars.to_string());
        self
    }

    /// Whether the schema declares this parameter as stream time.
    pub fn is_time(&self) -> bool {
        self.types.ends_with("(time)")
    }
}

pub type ExecuteFn = Arc<dyn Fn(&mut Scenario, &mut Action) -> ActionReturn + Send + Sync>;
pub type PrepareFn = Arc<dyn Fn(&mut Scenario, &mut Action) -> Result<(), ScenarioError> + Send + Sync>;

/// A registered action kind.
pub struct ActionType {
    pub name: String,
    pub implementer_namespace: String,
    pub rank: u32,
    pub flags: ActionTypeFlags,
    pub description: String,
    pub parameters: Vec<ActionParameter>,
    /// Extra hook run after the default prepare step.
    pub prepare: Option<PrepareFn>,
    pub execute: ExecuteFn,
    /// Lower-ranked registration this one replaced, if any.
    pub overriden_type: Option<Arc<ActionType>>,
}

impl ActionType {
    pub fn builder(name: &str, namespace: &str) -> ActionTypeBuilder {
        ActionTypeBuilder {
            name: name.to_string(),
            implementer_namespace: namespace.to_string(),
            rank: rank::NONE,
            flags: ActionTypeFlags::NONE,
            description: String::new(),
            parameters: Vec::new(),
            prepare: None,
            execute: None,
        }
    }

    pub fn mandatory_parameters(&self) -> impl Iterator<Item = &ActionParameter> {
        self.parameters.iter().filter(|p| p.mandatory)
    }

    pub fn parameter(&self, name: &str) -> Option<&ActionParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl fmt::Debug for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionType")
            .field("name", &self.name)
            .field("namespace", &self.implementer_namespace)
            .field("rank", &self.rank)
            .finish_non_exhaustive()
    }
}

pub struct ActionTypeBuilder {
    name: String,
    implementer_namespace: String,
    rank: u32,
    flags: ActionTypeFlags,
    description: String,
    parameters: Vec<ActionParameter>,
    prepare: Option<PrepareFn>,
    execute: Option<ExecuteFn>,
}

impl ActionTypeBuilder {
    pub fn rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    pub fn flags(mut self, flags: ActionTypeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn parameter(mut self, parameter: ActionParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn prepare(mut self, prepare: PrepareFn) -> Self {
        self.prepare = Some(prepare);
        self
    }

    pub fn execute(
        mut self,
        execute: impl Fn(&mut Scenario, &mut Action) -> ActionReturn + Send + Sync + 'static,
    ) -> Self {
        self.execute = Some(Arc::new(execute));
        self
    }

    pub fn build(self) -> ActionType {
        ActionType {
            name: self.name,
            implementer_namespace: self.implementer_namespace,
            rank: self.rank,
            flags: self.flags,
            description: self.description,
            parameters: self.parameters,
            prepare: self.prepare,
            execute: self.execute.expect("action type without execute handler"),
            overriden_type: None,
        }
    }
}

/// Name-keyed action types with rank-based override and an append-only
/// per-name history for debugging.
#[derive(Default)]
pub struct ActionTypeRegistry {
    current: HashMap<String, Arc<ActionType>>,
    history: HashMap<String, Vec<Arc<ActionType>>>,
}

impl ActionTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in types pre-installed.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::handlers::register_builtins(&mut registry);
        registry
    }

    /// Register `action_type`, returning the registration that now wins
    /// for its name. A strictly lower rank than the incumbent loses; an
    /// equal or higher rank replaces it and keeps the incumbent linked as
    /// `overriden_type`.
    pub fn register(&mut self, mut action_type: ActionType) -> Arc<ActionType> {
        let name = action_type.name.clone();
        if let Some(existing) = self.current.get(&name) {
            if existing.rank > action_type.rank {
                debug!(
                    name,
                    existing_rank = existing.rank,
                    new_rank = action_type.rank,
                    "discarding lower-ranked action type registration"
                );
                let discarded = Arc::new(action_type);
                self.history.entry(name).or_default().push(discarded);
                return Arc::clone(existing);
            }
            action_type.overriden_type = Some(Arc::clone(existing));
        }
        let action_type = Arc::new(action_type);
        self.history
            .entry(name.clone())
            .or_default()
            .push(Arc::clone(&action_type));
        self.current.insert(name, Arc::clone(&action_type));
        action_type
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ActionType>> {
        self.current.get(name).cloned()
    }

    pub fn list(&self) -> Vec<Arc<ActionType>> {
        let mut types: Vec<_> = self.current.values().cloned().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        types
    }

    /// All registrations ever seen for `name`, oldest first.
    pub fn history(&self, name: &str) -> &[Arc<ActionType>] {
        self.history.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Human-readable rendering of registered types, optionally filtered
    /// to a comma-separated selection.
    pub fn print_types(&self, selection: Option<&str>) -> String {
        let wanted: Option<Vec<&str>> =
            selection.map(|s| s.split(',').map(str::trim).collect());
        let mut out = String::new();
        for action_type in self.list() {
            if let Some(wanted) = &wanted {
                if !wanted.contains(&action_type.name.as_str()) {
                    continue;
                }
            }
            let _ = writeln!(
                out,
                "{} -- {}",
                action_type.name, action_type.description
            );
            for parameter in &action_type.parameters {
                let mandatory = if parameter.mandatory {
                    "mandatory"
                } else {
                    "optional"
                };
                let _ = writeln!(
                    out,
                    "    {} ({}, {}): {}",
                    parameter.name, parameter.types, mandatory, parameter.description
                );
                if let Some(default) = &parameter.default {
                    let _ = writeln!(out, "        default: {default}");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionReturn;

    fn noop_type(name: &str, rank: u32) -> ActionType {
        ActionType::builder(name, "test")
            .rank(rank)
            .description("noop")
            .execute(|_, _| ActionReturn::Ok)
            .build()
    }

    #[test]
    fn higher_rank_wins() {
        let mut registry = ActionTypeRegistry::new();
        registry.register(noop_type("seek", rank::MARGINAL));
        registry.register(noop_type("seek", rank::PRIMARY));
        assert_eq!(registry.lookup("seek").unwrap().rank, rank::PRIMARY);
    }

    #[test]
    fn lower_rank_is_discarded() {
        let mut registry = ActionTypeRegistry::new();
        registry.register(noop_type("seek", rank::PRIMARY));
        let winner = registry.register(noop_type("seek", rank::MARGINAL));
        assert_eq!(winner.rank, rank::PRIMARY);
        assert_eq!(registry.lookup("seek").unwrap().rank, rank::PRIMARY);
    }

    #[test]
    fn equal_rank_replaces_and_links() {
        let mut registry = ActionTypeRegistry::new();
        registry.register(noop_type("seek", rank::SECONDARY));
        registry.register(noop_type("seek", rank::SECONDARY));
        let current = registry.lookup("seek").unwrap();
        assert!(current.overriden_type.is_some());
        assert_eq!(registry.history("seek").len(), 2);
    }

    #[test]
    fn listing_is_sorted() {
        let mut registry = ActionTypeRegistry::new();
        registry.register(noop_type("wait", rank::NONE));
        registry.register(noop_type("eos", rank::NONE));
        let names: Vec<_> = registry.list().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["eos", "wait"]);
    }

    #[test]
    fn print_types_filters_by_selection() {
        let mut registry = ActionTypeRegistry::new();
        registry.register(noop_type("wait", rank::NONE));
        registry.register(noop_type("eos", rank::NONE));
        let out = registry.print_types(Some("wait"));
        assert!(out.contains("wait"));
        assert!(!out.contains("eos"));
    }
}
