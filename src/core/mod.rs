//! Core application layer
//!
//! This module provides the ambient services shared by the module system:
//! - Notification bus for module state changes
//! - Configuration management
//! - Structured logging system
//! - Error handling and type system

pub mod config;
pub mod error;
pub mod event_bus;
pub mod logging;

pub use config::Config;
pub use error::{ErrorContext, Result, SwitchError};
pub use event_bus::{Notification, NotificationBus, NotificationKind, NotificationSink, Notifier};
pub use logging::Logger;
