//! Inbound command surface
//!
//! Commands are JSON objects tagged by `type`:
//! `{"type":"toggle","module":"Alpha"}`, `{"type":"list"}`, `{"type":"pending"}`.
//! Every answer goes out as notifications; nothing is returned to the caller.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::error::SwitchError;
use crate::core::event_bus::{Notification, NotificationKind, Notifier};
use crate::plugin::manager::ModuleManager;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    Toggle { module: String },
    List,
    Pending,
}

impl Command {
    /// Parse one command line
    pub fn parse(line: &str) -> Result<Self, SwitchError> {
        serde_json::from_str(line).map_err(|e| SwitchError::InvalidCommand(e.to_string()))
    }
}

/// Routes commands to the module manager
pub struct CommandDispatcher {
    manager: Arc<ModuleManager>,
    notifier: Notifier,
}

impl CommandDispatcher {
    pub fn new(manager: Arc<ModuleManager>, notifier: Notifier) -> Self {
        Self { manager, notifier }
    }

    /// Parse and run one line of input; blank lines are ignored
    pub fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match Command::parse(line) {
            Ok(command) => self.dispatch(command),
            Err(e) => {
                warn!(error = %e, "Rejected command");
                self.notifier.error("", &e);
            }
        }
    }

    pub fn dispatch(&self, command: Command) {
        debug!(command = ?command, "Dispatching command");

        match command {
            Command::Toggle { module } => {
                // The toggler already reported the failure
                if let Err(e) = self.manager.toggle(&module) {
                    debug!(module = %module, error = %e, "Toggle command failed");
                }
            }
            Command::List => {
                for record in self.manager.discover_all() {
                    let data = match serde_json::to_value(&record) {
                        Ok(data) => data,
                        Err(e) => {
                            warn!(module = %record.internal_name(), error = %e, "Failed to serialize module record");
                            continue;
                        }
                    };
                    self.notifier.info(
                        record.internal_name(),
                        format!("{} {}", record.name(), record.version()),
                        data,
                    );
                }
            }
            Command::Pending => {
                for entry in self.manager.pending() {
                    let mut notification = Notification::new(
                        NotificationKind::ModuleScheduled,
                        entry.module_key.as_str(),
                        format!("Module {} will be {}", entry.module_key, entry.desired_state),
                    );
                    if let Ok(data) = serde_json::to_value(&entry) {
                        notification = notification.with_data(data);
                    }
                    self.notifier.notify(notification);
                }
            }
        }
    }
}
