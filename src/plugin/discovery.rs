//! Module discovery
//!
//! Scans the modules directory and assembles the inventory. Active modules are
//! reported before inactive ones; within each group the order is whatever the
//! directory walk yields.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::plugin::metadata::MetadataExtractor;
use crate::plugin::runtime::ModuleHost;
use crate::plugin::types::{CandidateFile, ModuleRecord};

/// Module discovery scanner
pub struct DiscoveryEngine {
    extractor: MetadataExtractor,
    host: Arc<dyn ModuleHost>,
}

impl DiscoveryEngine {
    pub fn new(extractor: MetadataExtractor, host: Arc<dyn ModuleHost>) -> Self {
        Self { extractor, host }
    }

    /// Discover all modules in the modules directory
    ///
    /// A missing directory yields an empty inventory. Files that are not
    /// modules are left out; nothing here fails the whole scan.
    pub fn discover_all(&self) -> Vec<ModuleRecord> {
        let modules_dir = self.extractor.layout().modules_dir();
        if !modules_dir.is_dir() {
            debug!(dir = ?modules_dir, "Modules directory does not exist");
            return Vec::new();
        }

        let (active, inactive): (Vec<_>, Vec<_>) = self
            .candidates(modules_dir)
            .into_iter()
            .partition(|candidate| !candidate.inactive);

        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for candidate in active.iter().chain(inactive.iter()) {
            let Some(record) = self.extractor.classify(candidate) else {
                continue;
            };

            if !seen.insert(record.internal_name().to_lowercase()) {
                debug!(
                    module = %record.internal_name(),
                    path = ?candidate.path,
                    "Skipping duplicate module file"
                );
                continue;
            }

            let loaded = !candidate.inactive && self.host.is_loaded(&candidate.path);
            records.push(record.with_loaded(loaded));
        }

        info!(
            dir = ?modules_dir,
            count = records.len(),
            "Module discovery complete"
        );
        records
    }

    fn candidates(&self, modules_dir: &Path) -> Vec<CandidateFile> {
        let layout = self.extractor.layout();
        let mut candidates = Vec::new();

        for entry in WalkDir::new(modules_dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(candidate) = layout.candidate(entry.path()) {
                candidates.push(candidate);
            }
        }

        candidates
    }
}
