//! Action records, their lifecycle states and the generational arena
//! that owns them.

use std::time::{Duration, Instant};

use veristream_core::Structure;

/// Handle to an action slot. The generation guards against a completion
/// callback outliving the action it targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionId {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

/// What a handler reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionReturn {
    Ok,
    Error,
    /// Failed, and the handler already reported it.
    ErrorReported,
    /// Completion arrives later through `set_done`.
    Async,
    /// Runs in parallel with subsequent actions.
    Interlaced,
}

/// Lifecycle state of a queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionState {
    #[default]
    None,
    InProgress,
    Ok,
    Error,
    ErrorReported,
    Async,
    Interlaced,
}

impl From<ActionReturn> for ActionState {
    fn from(value: ActionReturn) -> Self {
        match value {
            ActionReturn::Ok => ActionState::Ok,
            ActionReturn::Error => ActionState::Error,
            ActionReturn::ErrorReported => ActionState::ErrorReported,
            ActionReturn::Async => ActionState::Async,
            ActionReturn::Interlaced => ActionState::Interlaced,
        }
    }
}

impl ActionState {
    /// A state a finished action may legally rest in.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionState::Ok | ActionState::Error | ActionState::ErrorReported
        )
    }
}

/// One declarative operation of a scenario.
#[derive(Debug)]
pub struct Action {
    pub type_name: String,
    /// Optional `name=` field, used in messages.
    pub name: String,
    /// Mutable working copy; handlers and variable substitution write here.
    pub structure: Structure,
    /// Immutable copy of the originally loaded record.
    pub main_structure: Structure,
    pub playback_time: Option<Duration>,
    /// Playback time was a string expression; parse it once `duration` is
    /// known.
    pub needs_playback_parsing: bool,
    pub timeout: Option<Duration>,
    /// −1 means "not set"; positive counts remaining iterations.
    pub repeat: i32,
    pub action_number: u32,
    pub state: ActionState,
    pub printed: bool,
    pub optional: bool,
    /// The restored structure still carries a `sub-action` field, but the
    /// chain already ran; do not retrigger on async completion.
    pub executing_last_subaction: bool,
    /// Currently executing a sub-action frame (repeat does not tick).
    pub in_subaction: bool,
    pub execution_time: Option<Instant>,
    /// Timeout was already reported for the current run.
    pub timeout_reported: bool,
    /// Stream ids a pending switch-track expects to see selected.
    pub expected_streams: Vec<String>,
    /// Arena slot, set when the action is queued. Synthesized actions
    /// (the EOS-generated `stop`) never get one.
    pub(crate) slot: Option<ActionId>,
}

impl Action {
    pub fn new(type_name: impl Into<String>, structure: Structure) -> Self {
        let name = structure.get_str("name").unwrap_or_default().to_string();
        Self {
            type_name: type_name.into(),
            name,
            main_structure: structure.clone(),
            structure,
            playback_time: None,
            needs_playback_parsing: false,
            timeout: None,
            repeat: -1,
            action_number: 0,
            state: ActionState::None,
            printed: false,
            optional: false,
            executing_last_subaction: false,
            in_subaction: false,
            execution_time: None,
            timeout_reported: false,
            expected_streams: Vec::new(),
            slot: None,
        }
    }

    /// Restore the working structure from the original record.
    pub fn restore_structure(&mut self) {
        self.structure = self.main_structure.clone();
        self.name = self
            .structure
            .get_str("name")
            .unwrap_or_default()
            .to_string();
        self.printed = false;
        self.in_subaction = false;
    }

    /// Short rendering for reports.
    pub fn describe(&self) -> String {
        self.structure.to_string()
    }
}

/// Slot arena with generation checks; indices stay stable for the
/// lifetime of the scenario.
#[derive(Debug, Default)]
pub struct ActionArena {
    slots: Vec<Slot>,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    action: Option<Action>,
}

impl ActionArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut action: Action) -> ActionId {
        let index = self.slots.len();
        let id = ActionId {
            index,
            generation: 1,
        };
        action.slot = Some(id);
        self.slots.push(Slot {
            generation: 1,
            action: Some(action),
        });
        id
    }

    pub fn contains(&self, id: ActionId) -> bool {
        self.slots
            .get(id.index)
            .is_some_and(|s| s.generation == id.generation && s.action.is_some())
    }

    pub fn get(&self, id: ActionId) -> Option<&Action> {
        let slot = self.slots.get(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.action.as_ref()
    }

    pub fn get_mut(&mut self, id: ActionId) -> Option<&mut Action> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.action.as_mut()
    }

    /// Temporarily move the action out for handler execution; pair with
    /// [`ActionArena::restore`].
    pub fn take(&mut self, id: ActionId) -> Option<Action> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.action.take()
    }

    pub fn restore(&mut self, id: ActionId, action: Action) {
        let slot = &mut self.slots[id.index];
        debug_assert_eq!(slot.generation, id.generation);
        debug_assert!(slot.action.is_none());
        slot.action = Some(action);
    }

    /// Drop the action and bump the generation so stale ids miss.
    pub fn remove(&mut self, id: ActionId) -> Option<Action> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        let action = slot.action.take();
        if action.is_some() {
            slot.generation += 1;
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(name: &str) -> Action {
        Action::new(name, Structure::new(name))
    }

    #[test]
    fn stale_ids_miss_after_removal() {
        let mut arena = ActionArena::new();
        let id = arena.insert(action("seek"));
        assert!(arena.contains(id));
        arena.remove(id).unwrap();
        assert!(!arena.contains(id));
        assert!(arena.get(id).is_none());
        assert!(arena.remove(id).is_none());
    }

    #[test]
    fn take_and_restore_round_trip() {
        let mut arena = ActionArena::new();
        let id = arena.insert(action("wait"));
        let taken = arena.take(id).unwrap();
        assert!(arena.get(id).is_none());
        arena.restore(id, taken);
        assert_eq!(arena.get(id).unwrap().type_name, "wait");
    }

    #[test]
    fn restore_structure_resets_working_copy() {
        let mut structure = Structure::new("pause");
        structure.set("name", veristream_core::Value::Str("p1".into()));
        let mut act = Action::new("pause", structure);
        act.structure.set("state", veristream_core::Value::Str("paused".into()));
        act.in_subaction = true;
        act.restore_structure();
        assert!(!act.structure.has_field("state"));
        assert!(!act.in_subaction);
        assert_eq!(act.name, "p1");
    }
}
