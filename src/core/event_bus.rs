//! Notification bus for module state changes
//!
//! The core reports what happened to a module through a fire-and-forget sink.
//! Delivery is best-effort:
//! - A missing sink is a no-op
//! - Publishing without subscribers is not an error
//! - Recent notifications are kept in a bounded history
//! - Streaming subscribers never lose notifications; broadcast ones may lag

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::core::error::{ErrorReport, SwitchError};

/// Kinds of notifications emitted by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    ModuleInfo,
    ModuleToggled,
    ModuleScheduled,
    Error,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::ModuleInfo => write!(f, "module-info"),
            NotificationKind::ModuleToggled => write!(f, "module-toggled"),
            NotificationKind::ModuleScheduled => write!(f, "module-scheduled"),
            NotificationKind::Error => write!(f, "error"),
        }
    }
}

/// A structured message about one module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub module: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, module: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            module: module.into(),
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Broadcast sink accepting notifications
pub trait NotificationSink: Send + Sync {
    fn broadcast(&self, notification: Notification);
}

/// Handle used by the core to emit notifications
///
/// Wraps an optional sink; without one every call is a no-op.
#[derive(Clone, Default)]
pub struct Notifier {
    sink: Option<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn notify(&self, notification: Notification) {
        if let Some(sink) = &self.sink {
            sink.broadcast(notification);
        }
    }

    pub fn info(&self, module: &str, message: impl Into<String>, data: Value) {
        self.notify(Notification::new(NotificationKind::ModuleInfo, module, message).with_data(data));
    }

    pub fn toggled(&self, module: &str, message: impl Into<String>) {
        self.notify(Notification::new(NotificationKind::ModuleToggled, module, message));
    }

    pub fn scheduled(&self, module: &str, message: impl Into<String>) {
        self.notify(Notification::new(NotificationKind::ModuleScheduled, module, message));
    }

    /// Report a failure; the error type and message travel in `data`
    pub fn error(&self, module: &str, error: &SwitchError) {
        let mut notification = Notification::new(NotificationKind::Error, module, error.to_string());
        if let Ok(data) = serde_json::to_value(ErrorReport::from_error(error)) {
            notification = notification.with_data(data);
        }
        self.notify(notification);
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("attached", &self.sink.is_some())
            .finish()
    }
}

/// Notification bus backed by a tokio broadcast channel
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
    streams: Mutex<Vec<mpsc::UnboundedSender<Notification>>>,
    history: Mutex<VecDeque<Notification>>,
    max_history: usize,
}

impl NotificationBus {
    /// Create a new bus with default capacity and history size
    pub fn new() -> Self {
        Self::with_capacity(256, 100)
    }

    pub fn with_capacity(capacity: usize, max_history: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            streams: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            max_history,
        }
    }

    /// Subscribe to every notification published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Subscribe without a capacity bound
    ///
    /// Every notification published from now on is queued until the receiver
    /// reads it or is dropped.
    pub fn subscribe_stream(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.streams.lock() {
            Ok(mut streams) => streams.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }

    /// Most recent notifications, oldest first
    pub fn history(&self) -> Vec<Notification> {
        match self.history.lock() {
            Ok(history) => history.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for NotificationBus {
    fn broadcast(&self, notification: Notification) {
        tracing::debug!(
            kind = %notification.kind,
            module = %notification.module,
            "{}",
            notification.message
        );

        if self.max_history > 0 {
            let mut history = match self.history.lock() {
                Ok(history) => history,
                Err(poisoned) => poisoned.into_inner(),
            };
            history.push_back(notification.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        {
            let mut streams = match self.streams.lock() {
                Ok(streams) => streams,
                Err(poisoned) => poisoned.into_inner(),
            };
            streams.retain(|stream| stream.send(notification.clone()).is_ok());
        }

        // No receivers is fine
        let _ = self.sender.send(notification);
    }
}
