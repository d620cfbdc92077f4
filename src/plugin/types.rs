//! Module type definitions
//!
//! This module defines the data structures shared by discovery, toggling and
//! retry scheduling, and the file naming convention that encodes whether a
//! module is enabled.

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Module key: the file name without the module extension and inactive suffix
pub type ModuleKey = String;

/// Inventory entry for one module found on disk
///
/// Produced fresh on every discovery pass and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    name: String,
    active: bool,
    loaded: bool,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_link: Option<String>,
    internal_name: ModuleKey,
}

impl ModuleRecord {
    pub fn new(
        name: impl Into<String>,
        active: bool,
        loaded: bool,
        version: impl Into<String>,
        download_link: Option<String>,
        internal_name: impl Into<ModuleKey>,
    ) -> Self {
        Self {
            name: name.into(),
            active,
            loaded,
            version: version.into(),
            download_link,
            internal_name: internal_name.into(),
        }
    }

    /// Declared display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the file carries no inactive suffix
    pub fn active(&self) -> bool {
        self.active
    }

    /// True when the hosting runtime has this exact file open
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn download_link(&self) -> Option<&str> {
        self.download_link.as_deref()
    }

    /// Module key accepted by `toggle`
    pub fn internal_name(&self) -> &str {
        &self.internal_name
    }

    /// Same record with the `loaded` flag resolved against the host
    pub(crate) fn with_loaded(mut self, loaded: bool) -> Self {
        self.loaded = loaded;
        self
    }
}

/// A file found during a discovery scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// Found under the inactive naming convention
    pub inactive: bool,
}

/// State a module should end up in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    Enabled,
    Disabled,
}

impl std::fmt::Display for DesiredState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DesiredState::Enabled => write!(f, "enabled"),
            DesiredState::Disabled => write!(f, "disabled"),
        }
    }
}

/// A state change that could not be applied yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingToggle {
    pub module_key: ModuleKey,
    pub desired_state: DesiredState,
}

/// File naming convention for modules
///
/// Active modules are `<key>.<extension>`, inactive ones
/// `<key>.<extension>.<disabled_suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLayout {
    modules_dir: PathBuf,
    extension: String,
    disabled_suffix: String,
}

impl ModuleLayout {
    pub fn new(
        modules_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        disabled_suffix: impl Into<String>,
    ) -> Self {
        Self {
            modules_dir: modules_dir.into(),
            extension: extension.into(),
            disabled_suffix: disabled_suffix.into(),
        }
    }

    /// Layout with the default `wasm` / `disabled` convention
    pub fn wasm(modules_dir: impl Into<PathBuf>) -> Self {
        Self::new(modules_dir, "wasm", "disabled")
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    fn active_ending(&self) -> String {
        format!(".{}", self.extension.to_ascii_lowercase())
    }

    fn inactive_ending(&self) -> String {
        format!(
            ".{}.{}",
            self.extension.to_ascii_lowercase(),
            self.disabled_suffix.to_ascii_lowercase()
        )
    }

    /// `<key>.wasm`
    pub fn active_file_name(&self, key: &str) -> String {
        format!("{}.{}", key, self.extension)
    }

    /// `<key>.wasm.disabled`
    pub fn inactive_file_name(&self, key: &str) -> String {
        format!("{}.{}.{}", key, self.extension, self.disabled_suffix)
    }

    /// Split a file name into its module key and convention
    ///
    /// Returns `None` for files following neither convention. Matching is
    /// case-insensitive.
    pub fn parse_file_name(&self, file_name: &OsStr) -> Option<(ModuleKey, bool)> {
        let name = file_name.to_str()?;
        let lower = name.to_ascii_lowercase();

        for (ending, inactive) in [(self.inactive_ending(), true), (self.active_ending(), false)] {
            if lower.ends_with(&ending) && lower.len() > ending.len() {
                return Some((name[..name.len() - ending.len()].to_string(), inactive));
            }
        }

        None
    }

    /// Classify a path as a discovery candidate
    pub fn candidate(&self, path: &Path) -> Option<CandidateFile> {
        let (_, inactive) = self.parse_file_name(path.file_name()?)?;
        Some(CandidateFile {
            path: path.to_path_buf(),
            inactive,
        })
    }

    /// Module key for a path in either convention
    pub fn module_key(&self, path: &Path) -> Option<ModuleKey> {
        path.file_name()
            .and_then(|name| self.parse_file_name(name))
            .map(|(key, _)| key)
    }

    /// Sibling path of `path` under the given state's convention
    ///
    /// Only the disabled suffix is added or removed; the key and extension
    /// keep the spelling they have on disk.
    pub fn path_for_state(&self, path: &Path, state: DesiredState) -> Option<PathBuf> {
        let name = path.file_name()?.to_str()?;
        let (key, inactive) = self.parse_file_name(OsStr::new(name))?;
        // Ascii lowercasing keeps byte offsets, so the stem is `<key>.<ext>` as written
        let stem = name.get(..key.len() + 1 + self.extension.len())?;

        let file_name = match (state, inactive) {
            (DesiredState::Enabled, _) => stem.to_string(),
            (DesiredState::Disabled, true) => name.to_string(),
            (DesiredState::Disabled, false) => format!("{}.{}", stem, self.disabled_suffix),
        };
        Some(path.with_file_name(file_name))
    }
}
