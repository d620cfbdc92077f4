//! Module manager
//!
//! Wires discovery, toggling and the retry scheduler around one shared
//! pending store and rename gate, and owns the lifecycle hooks. Pending
//! toggles are flushed exactly once, on whichever comes first:
//! `shutdown()` or the manager being dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::event_bus::Notifier;
use crate::plugin::discovery::DiscoveryEngine;
use crate::plugin::files::ModuleFiles;
use crate::plugin::metadata::MetadataExtractor;
use crate::plugin::pending::PendingToggleStore;
use crate::plugin::runtime::ModuleHost;
use crate::plugin::scheduler::{RetryPolicy, RetryReport, RetryScheduler};
use crate::plugin::toggle::{ModuleToggler, ToggleOutcome};
use crate::plugin::types::{ModuleLayout, ModuleRecord, PendingToggle};

/// A flush in progress: the immediate pass is done, the delayed one may run
pub struct PendingFlush {
    pub immediate: RetryReport,
    delayed: Option<JoinHandle<RetryReport>>,
}

impl PendingFlush {
    /// Wait for the delayed pass and return the final report
    ///
    /// Without a delayed pass the immediate report is final.
    pub async fn wait(self) -> RetryReport {
        match self.delayed {
            Some(handle) => match handle.await {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, "Delayed retry pass did not complete");
                    RetryReport {
                        attempted: 0,
                        resolved: Vec::new(),
                        unresolved: self.immediate.unresolved,
                    }
                }
            },
            None => self.immediate,
        }
    }
}

/// Manager for module discovery and toggling
pub struct ModuleManager {
    layout: ModuleLayout,
    discovery: DiscoveryEngine,
    toggler: ModuleToggler,
    scheduler: Arc<RetryScheduler>,
    pending: Arc<PendingToggleStore>,
    host: Arc<dyn ModuleHost>,
    flushed: AtomicBool,
}

impl ModuleManager {
    pub fn new(
        layout: ModuleLayout,
        deny_list: &[String],
        policy: RetryPolicy,
        host: Arc<dyn ModuleHost>,
        notifier: Notifier,
    ) -> Self {
        let files = Arc::new(ModuleFiles::new(layout.clone()));
        let pending = Arc::new(PendingToggleStore::new());

        let extractor = MetadataExtractor::with_files(files.clone(), deny_list);
        let discovery = DiscoveryEngine::new(extractor, host.clone());
        let toggler = ModuleToggler::new(
            files.clone(),
            host.clone(),
            pending.clone(),
            notifier.clone(),
        );
        let scheduler = Arc::new(RetryScheduler::new(
            files,
            host.clone(),
            pending.clone(),
            policy,
            notifier,
        ));

        Self {
            layout,
            discovery,
            toggler,
            scheduler,
            pending,
            host,
            flushed: AtomicBool::new(false),
        }
    }

    /// Build a manager from loaded configuration
    pub fn from_config(config: &Config, host: Arc<dyn ModuleHost>, notifier: Notifier) -> Self {
        Self::new(
            config.modules.layout(),
            &config.modules.deny_list,
            config.retry.policy(),
            host,
            notifier,
        )
    }

    pub fn layout(&self) -> &ModuleLayout {
        &self.layout
    }

    pub fn host(&self) -> &Arc<dyn ModuleHost> {
        &self.host
    }

    /// Current module inventory
    pub fn discover_all(&self) -> Vec<ModuleRecord> {
        self.discovery.discover_all()
    }

    /// Flip a module's state, deferring it if the host holds the file
    pub fn toggle(&self, module_key: &str) -> Result<ToggleOutcome> {
        self.toggler.toggle(module_key)
    }

    /// Toggles waiting for the host to release their files
    pub fn pending(&self) -> Vec<PendingToggle> {
        self.pending.snapshot()
    }

    /// Start flushing pending toggles
    ///
    /// Returns `None` if this manager has already been flushed.
    pub fn flush(&self) -> Option<PendingFlush> {
        if self.flushed.swap(true, Ordering::SeqCst) {
            return None;
        }

        if !self.pending.is_empty() {
            info!(count = self.pending.len(), "Flushing pending toggles");
        }
        let (immediate, delayed) = self.scheduler.flush();
        Some(PendingFlush { immediate, delayed })
    }

    /// Application shutdown hook: flush and wait for the delayed pass
    pub async fn shutdown(&self) -> Option<RetryReport> {
        match self.flush() {
            Some(flush) => Some(flush.wait().await),
            None => None,
        }
    }
}

impl Drop for ModuleManager {
    fn drop(&mut self) {
        // The delayed pass keeps running detached if a runtime is alive
        if let Some(flush) = self.flush() {
            if !flush.immediate.is_clean() {
                warn!(
                    unresolved = flush.immediate.unresolved.len(),
                    "Module manager dropped with unresolved toggles"
                );
            }
        }
    }
}
