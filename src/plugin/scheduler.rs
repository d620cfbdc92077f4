//! Deferred retry scheduler
//!
//! Applies pending toggles when the host shuts down. Two passes share the
//! pending store:
//! - an immediate pass, one attempt per entry, on the caller's thread
//! - a delayed pass after a grace period, running as a background task with
//!   a bounded number of attempts per entry
//!
//! Entries that still fail after the delayed pass stay in the store and are
//! lost when the process exits.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::event_bus::Notifier;
use crate::plugin::files::ModuleFiles;
use crate::plugin::pending::PendingToggleStore;
use crate::plugin::runtime::ModuleHost;
use crate::plugin::types::{DesiredState, PendingToggle};

/// Timing of the delayed pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the delayed pass starts, so the host can release its files
    pub grace_period: Duration,
    /// Attempts per entry in the delayed pass
    pub max_attempts: u32,
    /// Pause between two attempts on the same entry
    pub attempt_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(1000),
            max_attempts: 3,
            attempt_interval: Duration::from_millis(250),
        }
    }
}

/// Result of one pass over the pending store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    /// Entries the pass looked at
    pub attempted: usize,
    pub resolved: Vec<String>,
    pub unresolved: Vec<String>,
}

impl RetryReport {
    pub fn is_clean(&self) -> bool {
        self.unresolved.is_empty()
    }
}

enum Attempt {
    Resolved,
    Failed(String),
}

pub struct RetryScheduler {
    files: Arc<ModuleFiles>,
    host: Arc<dyn ModuleHost>,
    pending: Arc<PendingToggleStore>,
    policy: RetryPolicy,
    notifier: Notifier,
}

impl RetryScheduler {
    pub fn new(
        files: Arc<ModuleFiles>,
        host: Arc<dyn ModuleHost>,
        pending: Arc<PendingToggleStore>,
        policy: RetryPolicy,
        notifier: Notifier,
    ) -> Self {
        Self {
            files,
            host,
            pending,
            policy,
            notifier,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Try every pending entry once, right now
    pub fn immediate_pass(&self) -> RetryReport {
        let mut report = RetryReport::default();

        for entry in self.pending.snapshot() {
            report.attempted += 1;
            match self.attempt(&entry) {
                Attempt::Resolved => report.resolved.push(entry.module_key),
                Attempt::Failed(reason) => {
                    debug!(module = %entry.module_key, reason = %reason, "Immediate retry failed");
                    report.unresolved.push(entry.module_key);
                }
            }
        }

        info!(
            attempted = report.attempted,
            resolved = report.resolved.len(),
            unresolved = report.unresolved.len(),
            "Immediate retry pass complete"
        );
        report
    }

    /// Wait for the grace period, then retry what is left
    pub async fn delayed_pass(&self) -> RetryReport {
        tokio::time::sleep(self.policy.grace_period).await;

        let mut report = RetryReport::default();
        for entry in self.pending.snapshot() {
            report.attempted += 1;

            let mut last_failure = String::new();
            let mut resolved = false;
            for attempt in 1..=self.policy.max_attempts {
                match self.attempt(&entry) {
                    Attempt::Resolved => {
                        resolved = true;
                        break;
                    }
                    Attempt::Failed(reason) => {
                        debug!(module = %entry.module_key, attempt, reason = %reason, "Delayed retry failed");
                        last_failure = reason;
                        if attempt < self.policy.max_attempts {
                            tokio::time::sleep(self.policy.attempt_interval).await;
                        }
                    }
                }
            }

            if resolved {
                report.resolved.push(entry.module_key);
            } else {
                warn!(
                    module = %entry.module_key,
                    attempts = self.policy.max_attempts,
                    reason = %last_failure,
                    "Giving up on pending toggle"
                );
                report.unresolved.push(entry.module_key);
            }
        }

        info!(
            attempted = report.attempted,
            resolved = report.resolved.len(),
            unresolved = report.unresolved.len(),
            "Delayed retry pass complete"
        );
        report
    }

    /// Run the immediate pass and schedule the delayed one in the background
    ///
    /// The delayed pass is only spawned when a tokio runtime is available.
    pub fn flush(self: &Arc<Self>) -> (RetryReport, Option<JoinHandle<RetryReport>>) {
        let immediate = self.immediate_pass();

        let delayed = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let scheduler = Arc::clone(self);
                Some(handle.spawn(async move { scheduler.delayed_pass().await }))
            }
            Err(_) => {
                warn!(
                    remaining = self.pending.len(),
                    "No async runtime, delayed retry pass skipped"
                );
                None
            }
        };

        (immediate, delayed)
    }

    fn attempt(&self, entry: &PendingToggle) -> Attempt {
        let _gate = self.files.gate();
        let desired = entry.desired_state;

        // Replaced or applied since the pass started
        match self.pending.get(&entry.module_key) {
            Some(current) if current.desired_state == desired => {}
            _ => return Attempt::Resolved,
        }

        let location = self.files.locate(&entry.module_key);
        let Some(source) = location.source_for(desired) else {
            if location.target_for(desired).is_none() {
                warn!(module = %entry.module_key, "Module file vanished, dropping pending toggle");
            }
            self.pending.remove(&entry.module_key);
            return Attempt::Resolved;
        };

        if desired == DesiredState::Disabled && self.host.is_loaded(source) {
            return Attempt::Failed("still loaded by the host".to_string());
        }

        match self.files.rename_to(source, desired) {
            Ok(target) => {
                self.pending.remove(&entry.module_key);
                info!(module = %entry.module_key, path = ?target, state = %desired, "Pending toggle applied");
                self.notifier.toggled(
                    &entry.module_key,
                    format!("Module {} {}", entry.module_key, desired),
                );
                Attempt::Resolved
            }
            Err(e) => Attempt::Failed(e.to_string()),
        }
    }
}
