//! Pending toggle store
//!
//! Holds state changes that could not be applied because the host had the
//! file open. One entry per module key (case-insensitive); a later request
//! replaces an earlier one. Entries live in memory only.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::plugin::types::{DesiredState, PendingToggle};

#[derive(Debug, Default)]
pub struct PendingToggleStore {
    entries: Mutex<BTreeMap<String, PendingToggle>>,
}

impl PendingToggleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, PendingToggle>> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a desired state, replacing any earlier request for the module
    pub fn record(&self, module_key: &str, desired_state: DesiredState) {
        self.entries().insert(
            module_key.to_lowercase(),
            PendingToggle {
                module_key: module_key.to_string(),
                desired_state,
            },
        );
    }

    pub fn get(&self, module_key: &str) -> Option<PendingToggle> {
        self.entries().get(&module_key.to_lowercase()).cloned()
    }

    pub fn remove(&self, module_key: &str) -> Option<PendingToggle> {
        self.entries().remove(&module_key.to_lowercase())
    }

    /// Copy of every pending entry, ordered by key
    pub fn snapshot(&self) -> Vec<PendingToggle> {
        self.entries().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
