//! Module system
//!
//! This module provides the module switching implementation including:
//! - Binary metadata reading for WebAssembly modules
//! - Classification of candidate files into module records
//! - Discovery of active and inactive modules
//! - Toggling with deferred retries for files the host keeps open
//! - A wasmtime host that keeps active modules resident

pub mod discovery;
pub mod files;
pub mod image;
pub mod manager;
pub mod metadata;
pub mod pending;
pub mod runtime;
pub mod scheduler;
pub mod toggle;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use discovery::DiscoveryEngine;
pub use files::{ModuleFiles, ModuleLocation};
pub use image::{ComponentDecl, HeaderReader, Introspector, ModuleIdentity, ModuleImage, WasmReader};
pub use manager::{ModuleManager, PendingFlush};
pub use metadata::{MetadataExtractor, StagedCopy};
pub use pending::PendingToggleStore;
pub use runtime::{ModuleHost, NoHost, WasmHost};
pub use scheduler::{RetryPolicy, RetryReport, RetryScheduler};
pub use toggle::{ModuleToggler, ToggleOutcome};
pub use types::{CandidateFile, DesiredState, ModuleKey, ModuleLayout, ModuleRecord, PendingToggle};
