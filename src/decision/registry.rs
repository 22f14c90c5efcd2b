use std::collections::{BTreeMap, BTreeSet};

use crate::protocol::Action;

/// Actions the game currently allows, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Action>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces each action by name. Returns how many were replaced.
    pub fn register(&mut self, actions: impl IntoIterator<Item = Action>) -> usize {
        let mut replaced = 0;
        for action in actions {
            if self.actions.insert(action.name.clone(), action).is_some() {
                replaced += 1;
            }
        }
        replaced
    }

    /// Removes each named action; unknown names are ignored. Returns how many were removed.
    pub fn unregister<S: AsRef<str>>(&mut self, names: impl IntoIterator<Item = S>) -> usize {
        names
            .into_iter()
            .filter(|name| self.actions.remove(name.as_ref()).is_some())
            .count()
    }

    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    pub fn snapshot_names(&self) -> BTreeSet<String> {
        self.actions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
