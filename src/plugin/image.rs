//! WebAssembly module image reader
//!
//! Module metadata is carried in custom sections of the binary:
//! - `name`: standard name section, its module name is the identity header
//! - `ext.components`: JSON array of component declarations
//! - `ext.version`: file-level version string
//! - `ext.description`: free-text description
//! - `ext.meta`: JSON array of `[key, value]` pairs, may repeat
//!
//! Reading is split in two: a cheap header read that only looks for the
//! module name, and a full introspection that validates the module and
//! gathers every metadata section.

use serde::{Deserialize, Serialize};
use std::path::Path;
use wasmparser::{Name, NameSectionReader, Parser, Payload, Validator};

use crate::core::error::{ErrorContext, Result, SwitchError};

pub const COMPONENTS_SECTION: &str = "ext.components";
pub const VERSION_SECTION: &str = "ext.version";
pub const DESCRIPTION_SECTION: &str = "ext.description";
pub const META_SECTION: &str = "ext.meta";

/// Capability a component declares to be recognized as a module implementation
pub const MODULE_MARKER: &str = "modswitch:module";

const WASM_MAGIC: &[u8] = b"\0asm";

/// Lightweight identity read from a module without loading it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleIdentity {
    /// Module name from the `name` section, if declared
    pub module_name: Option<String>,
}

/// Identity attribute attached to a component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAttribute {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// One entry of the `ext.components` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDecl {
    pub name: String,
    #[serde(rename = "abstract", default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub identity: Option<IdentityAttribute>,
}

impl ComponentDecl {
    /// Concrete and carrying the module marker
    pub fn is_module(&self) -> bool {
        !self.is_abstract && self.capabilities.iter().any(|c| c == MODULE_MARKER)
    }
}

/// Everything the full introspection learned about a module
#[derive(Debug, Clone, Default)]
pub struct ModuleImage {
    pub module_name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub metadata: Vec<(String, String)>,
    /// Raw `ext.components` payload, decoded on demand
    pub(crate) components: Option<Vec<u8>>,
}

impl ModuleImage {
    /// Decode the component table
    pub fn components(&self) -> Result<Vec<ComponentDecl>> {
        let raw = self.components.as_deref().ok_or_else(|| {
            SwitchError::InvalidModule(format!("missing {} section", COMPONENTS_SECTION))
        })?;
        serde_json::from_slice(raw).context("Malformed component table")
    }

    /// First concrete component carrying the module marker, in declaration order
    pub fn first_module_component(&self) -> Result<Option<ComponentDecl>> {
        Ok(self.components()?.into_iter().find(ComponentDecl::is_module))
    }
}

/// Cheap identity-header read
pub trait HeaderReader: Send + Sync {
    fn read_identity(&self, path: &Path) -> Result<ModuleIdentity>;
}

/// Full load of a module's metadata tables
pub trait Introspector: Send + Sync {
    fn introspect(&self, path: &Path) -> Result<ModuleImage>;
}

/// Reader for WebAssembly module files
#[derive(Debug, Clone)]
pub struct WasmReader {
    extension: String,
}

impl WasmReader {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    fn read_module_bytes(path: &Path) -> Result<Vec<u8>> {
        let bytes = std::fs::read(path)?;
        if !bytes.starts_with(WASM_MAGIC) {
            return Err(SwitchError::InvalidModule(format!(
                "{} is not a WebAssembly module",
                path.display()
            )));
        }
        Ok(bytes)
    }
}

impl Default for WasmReader {
    fn default() -> Self {
        Self::new("wasm")
    }
}

impl HeaderReader for WasmReader {
    fn read_identity(&self, path: &Path) -> Result<ModuleIdentity> {
        let bytes = Self::read_module_bytes(path)?;

        for payload in Parser::new(0).parse_all(&bytes) {
            let payload = payload.context("Failed to read module header")?;
            if let Payload::CustomSection(reader) = payload {
                if reader.name() == "name" {
                    return Ok(ModuleIdentity {
                        module_name: module_name(reader.data(), reader.data_offset())?,
                    });
                }
            }
        }

        Ok(ModuleIdentity::default())
    }
}

impl Introspector for WasmReader {
    fn introspect(&self, path: &Path) -> Result<ModuleImage> {
        let has_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false);
        if !has_extension {
            return Err(SwitchError::InvalidModule(format!(
                "{} does not carry the .{} extension",
                path.display(),
                self.extension
            )));
        }

        let bytes = Self::read_module_bytes(path)?;
        Validator::new()
            .validate_all(&bytes)
            .with_context(|| format!("Module {} failed validation", path.display()))?;

        let mut image = ModuleImage::default();
        for payload in Parser::new(0).parse_all(&bytes) {
            let Payload::CustomSection(reader) = payload.context("Failed to parse module")? else {
                continue;
            };

            match reader.name() {
                "name" => image.module_name = module_name(reader.data(), reader.data_offset())?,
                COMPONENTS_SECTION => image.components = Some(reader.data().to_vec()),
                VERSION_SECTION => image.version = text_section(reader.data()),
                DESCRIPTION_SECTION => image.description = text_section(reader.data()),
                META_SECTION => match serde_json::from_slice::<Vec<(String, String)>>(reader.data()) {
                    Ok(pairs) => image.metadata.extend(pairs),
                    Err(e) => {
                        tracing::warn!(path = ?path, error = %e, "Ignoring malformed metadata section")
                    }
                },
                _ => {}
            }
        }

        Ok(image)
    }
}

fn module_name(data: &[u8], offset: usize) -> Result<Option<String>> {
    for name in NameSectionReader::new(data, offset) {
        if let Name::Module { name, .. } = name.context("Malformed name section")? {
            return Ok(Some(name.to_string()));
        }
    }
    Ok(None)
}

fn text_section(data: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(data).ok()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}
