//! Hosting runtime collaborator
//!
//! The host is the component that has modules loaded in memory. The core only
//! asks it which backing files are currently open. `WasmHost` is a wasmtime
//! based host that compiles active modules and keeps their files open while
//! they are resident, the same way a native loader pins a library.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use wasmtime::{Config, Engine, Module};

use crate::core::error::{Result, SwitchError};
use crate::plugin::types::ModuleRecord;

/// Read-only view of the modules a host has loaded
pub trait ModuleHost: Send + Sync {
    /// Backing paths of every loaded module
    fn loaded_paths(&self) -> Vec<PathBuf>;

    /// Whether any loaded module is backed by `path`, ignoring case
    fn is_loaded(&self, path: &Path) -> bool {
        let wanted = normalize(path);
        self.loaded_paths().iter().any(|loaded| normalize(loaded) == wanted)
    }

    /// Release every loaded module; the host's own shutdown sequence
    fn release_all(&self) {}
}

/// Case-folded, canonical form of a path for comparisons
pub(crate) fn normalize(path: &Path) -> String {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    resolved.to_string_lossy().to_lowercase()
}

/// Host with nothing loaded
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHost;

impl ModuleHost for NoHost {
    fn loaded_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// A module resident in the host
struct ResidentModule {
    name: String,
    _module: Module,
    /// Held open for as long as the module is resident
    _handle: File,
}

/// wasmtime-backed module host
pub struct WasmHost {
    engine: Engine,
    modules: RwLock<HashMap<PathBuf, ResidentModule>>,
}

impl WasmHost {
    /// Create a new host with default engine configuration
    pub fn new() -> Result<Self> {
        let mut config = Config::new();
        config.wasm_backtrace_details(wasmtime::WasmBacktraceDetails::Enable);

        let engine = Engine::new(&config)
            .map_err(|e| SwitchError::HostError(format!("Failed to create WASM engine: {}", e)))?;

        Ok(Self {
            engine,
            modules: RwLock::new(HashMap::new()),
        })
    }

    /// Compile the module at `path` and keep it resident
    pub fn load(&self, name: &str, path: &Path) -> Result<()> {
        let handle = File::open(path)?;
        let module = Module::from_file(&self.engine, path).map_err(|e| {
            SwitchError::HostError(format!("Failed to load module {}: {}", path.display(), e))
        })?;

        let mut modules = self
            .modules
            .write()
            .map_err(|e| SwitchError::HostError(format!("Failed to acquire write lock: {}", e)))?;
        modules.insert(
            path.to_path_buf(),
            ResidentModule {
                name: name.to_string(),
                _module: module,
                _handle: handle,
            },
        );

        tracing::info!(module = %name, path = ?path, "Module loaded into host");
        Ok(())
    }

    /// Load every active record found under `modules_dir`
    ///
    /// Failures are logged per module; returns how many were loaded.
    pub fn load_all(&self, modules_dir: &Path, records: &[ModuleRecord], extension: &str) -> usize {
        let mut loaded = 0;
        for record in records.iter().filter(|r| r.active()) {
            let file_name = format!("{}.{}", record.internal_name(), extension);
            let path = walkdir::WalkDir::new(modules_dir)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .find(|entry| {
                    entry.file_type().is_file()
                        && entry.file_name().to_string_lossy().eq_ignore_ascii_case(&file_name)
                })
                .map(|entry| entry.into_path());

            match path {
                Some(path) => match self.load(record.name(), &path) {
                    Ok(()) => loaded += 1,
                    Err(e) => tracing::warn!(module = %record.name(), error = %e, "Failed to load module"),
                },
                None => tracing::warn!(module = %record.name(), "Module file disappeared before loading"),
            }
        }
        loaded
    }

    /// Release one module and its file handle
    pub fn unload(&self, path: &Path) -> Result<()> {
        let wanted = normalize(path);
        let mut modules = self
            .modules
            .write()
            .map_err(|e| SwitchError::HostError(format!("Failed to acquire write lock: {}", e)))?;

        let key = modules
            .keys()
            .find(|loaded| normalize(loaded) == wanted)
            .cloned()
            .ok_or_else(|| SwitchError::ModuleNotFound(path.display().to_string()))?;

        if let Some(resident) = modules.remove(&key) {
            tracing::info!(module = %resident.name, path = ?key, "Module unloaded from host");
        }
        Ok(())
    }

    /// Release every module and its file handle
    pub fn unload_all(&self) {
        let mut modules = match self.modules.write() {
            Ok(modules) => modules,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = modules.len();
        modules.clear();
        tracing::info!(count, "All modules released by host");
    }
}

impl ModuleHost for WasmHost {
    fn loaded_paths(&self) -> Vec<PathBuf> {
        match self.modules.read() {
            Ok(modules) => modules.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        }
    }

    fn release_all(&self) {
        self.unload_all();
    }
}
