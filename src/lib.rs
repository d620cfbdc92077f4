//! modswitch library
//!
//! This library discovers WebAssembly extension modules in a modules
//! directory, reports their metadata, and switches them between enabled and
//! disabled by renaming their files. Toggles blocked by a host that holds a
//! file open are deferred and retried when the host shuts down.

pub mod api;
pub mod core;
pub mod plugin;

// Re-export commonly used types
pub use api::ControlServer;
pub use crate::core::{Config, NotificationBus, Notifier, SwitchError};
pub use plugin::{ModuleHost, ModuleManager, ModuleRecord, ToggleOutcome, WasmHost};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
