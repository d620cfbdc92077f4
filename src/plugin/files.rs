//! On-disk module files
//!
//! Resolves a module key to its backing file in either naming convention and
//! renames files between conventions. Renames never overwrite an existing file.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use walkdir::WalkDir;

use crate::core::error::{is_lock_error, Result, SwitchError};
use crate::plugin::types::{DesiredState, ModuleLayout};

/// Where a module's file currently lives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleLocation {
    pub active: Option<PathBuf>,
    pub inactive: Option<PathBuf>,
}

impl ModuleLocation {
    /// Path that must be renamed to reach `state`
    pub fn source_for(&self, state: DesiredState) -> Option<&Path> {
        match state {
            DesiredState::Disabled => self.active.as_deref(),
            DesiredState::Enabled => self.inactive.as_deref(),
        }
    }

    /// Path present once `state` has been reached
    pub fn target_for(&self, state: DesiredState) -> Option<&Path> {
        match state {
            DesiredState::Disabled => self.inactive.as_deref(),
            DesiredState::Enabled => self.active.as_deref(),
        }
    }
}

/// Module file operations shared by the toggler and the retry scheduler
pub struct ModuleFiles {
    layout: ModuleLayout,
    /// Serializes renames and pending-toggle decisions
    gate: Mutex<()>,
}

impl ModuleFiles {
    pub fn new(layout: ModuleLayout) -> Self {
        Self {
            layout,
            gate: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &ModuleLayout {
        &self.layout
    }

    /// Acquire the rename gate
    pub fn gate(&self) -> MutexGuard<'_, ()> {
        match self.gate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Find the files backing `key`, searching the modules directory recursively
    pub fn locate(&self, key: &str) -> ModuleLocation {
        let mut location = ModuleLocation::default();
        let modules_dir = self.layout.modules_dir();
        if !modules_dir.is_dir() {
            return location;
        }

        let active_name = self.layout.active_file_name(key).to_lowercase();
        let inactive_name = self.layout.inactive_file_name(key).to_lowercase();

        for entry in WalkDir::new(modules_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if location.active.is_none() && name == active_name {
                location.active = Some(entry.path().to_path_buf());
            } else if location.inactive.is_none() && name == inactive_name {
                location.inactive = Some(entry.path().to_path_buf());
            }
            if location.active.is_some() && location.inactive.is_some() {
                break;
            }
        }

        location
    }

    /// Rename `source` to the sibling name for `state`
    ///
    /// Callers hold the gate. Fails with `Conflict` if the destination exists.
    pub fn rename_to(&self, source: &Path, state: DesiredState) -> Result<PathBuf> {
        let target = self.layout.path_for_state(source, state).ok_or_else(|| {
            SwitchError::InvalidModule(format!(
                "{} does not follow the module naming convention",
                source.display()
            ))
        })?;

        if target.exists() {
            return Err(SwitchError::Conflict(format!(
                "{} already exists",
                target.display()
            )));
        }

        std::fs::rename(source, &target).map_err(|e| {
            if is_lock_error(&e) {
                SwitchError::Locked(format!("{}: {}", source.display(), e))
            } else {
                SwitchError::IoError(e)
            }
        })?;
        tracing::debug!(from = ?source, to = ?target, "Module file renamed");
        Ok(target)
    }
}
