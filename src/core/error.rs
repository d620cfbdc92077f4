//! Error type system for modswitch
//!
//! This module provides the crate-wide error type with:
//! - Classification of module and filesystem failures
//! - Detection of transient lock conditions during renames
//! - Error context and chaining support

use serde::{Deserialize, Serialize};
use std::io;

/// Main error type for the modswitch system
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Module-related errors
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Invalid module: {0}")]
    InvalidModule(String),

    #[error("Rename conflict: {0}")]
    Conflict(String),

    #[error("Module file is locked: {0}")]
    Locked(String),

    #[error("Host error: {0}")]
    HostError(String),

    // Command surface errors
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    // I/O errors
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl SwitchError {
    /// Get the error type name used in notifications
    pub fn error_type(&self) -> &'static str {
        match self {
            SwitchError::ConfigError(_) => "ConfigError",
            SwitchError::ModuleNotFound(_) => "ModuleNotFound",
            SwitchError::InvalidModule(_) => "InvalidModule",
            SwitchError::Conflict(_) => "Conflict",
            SwitchError::Locked(_) => "Locked",
            SwitchError::HostError(_) => "HostError",
            SwitchError::InvalidCommand(_) => "InvalidCommand",
            SwitchError::SerializationError(_) => "SerializationError",
            SwitchError::IoError(_) => "IoError",
        }
    }

    /// Check if this error means the file is held by someone else and the
    /// operation may succeed later
    pub fn is_transient_lock(&self) -> bool {
        match self {
            SwitchError::Locked(_) => true,
            SwitchError::IoError(e) => is_lock_error(e),
            _ => false,
        }
    }
}

impl From<crate::core::config::ConfigError> for SwitchError {
    fn from(err: crate::core::config::ConfigError) -> Self {
        SwitchError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for SwitchError {
    fn from(err: serde_json::Error) -> Self {
        SwitchError::SerializationError(err.to_string())
    }
}

/// Classify an I/O error as "access denied" or "file in use by another process"
pub fn is_lock_error(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }

    match err.raw_os_error() {
        Some(code) => is_lock_os_code(code),
        None => false,
    }
}

#[cfg(windows)]
fn is_lock_os_code(code: i32) -> bool {
    // ERROR_ACCESS_DENIED, ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(code, 5 | 32 | 33)
}

#[cfg(unix)]
fn is_lock_os_code(code: i32) -> bool {
    code == libc::EBUSY || code == libc::ETXTBSY || code == libc::EACCES || code == libc::EPERM
}

#[cfg(not(any(unix, windows)))]
fn is_lock_os_code(_code: i32) -> bool {
    false
}

/// Error payload attached to `error` notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorReport {
    pub fn from_error(error: &SwitchError) -> Self {
        Self {
            error: error.error_type().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias for operations that can fail with SwitchError
pub type Result<T> = std::result::Result<T, SwitchError>;

/// Context extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| SwitchError::InvalidModule(format!("{}: {}", context.into(), e)))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| SwitchError::InvalidModule(format!("{}: {}", f(), e)))
    }
}
