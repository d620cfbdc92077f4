//! Test fixtures for building module binaries

use serde_json::Value;
use std::path::{Path, PathBuf};

use super::image::{
    COMPONENTS_SECTION, DESCRIPTION_SECTION, META_SECTION, MODULE_MARKER, VERSION_SECTION,
};

/// Builds a small WebAssembly module with metadata sections appended
#[derive(Debug, Clone, Default)]
pub struct ModuleFixture {
    base: Option<String>,
    module_name: Option<String>,
    components: Option<Value>,
    file_version: Option<String>,
    description: Option<String>,
    meta: Vec<(String, String)>,
}

impl ModuleFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A genuine module: one concrete component with the marker capability
    pub fn module(name: &str, version: Option<&str>) -> Self {
        Self::new().components(serde_json::json!([{
            "name": format!("{}Module", name),
            "capabilities": [MODULE_MARKER],
            "identity": { "name": name, "version": version }
        }]))
    }

    /// Replace the base module text; it is encoded but never validated
    pub fn base(mut self, wat: &str) -> Self {
        self.base = Some(wat.to_string());
        self
    }

    pub fn module_name(mut self, name: &str) -> Self {
        self.module_name = Some(name.to_string());
        self
    }

    pub fn components(mut self, components: Value) -> Self {
        self.components = Some(components);
        self
    }

    pub fn file_version(mut self, version: &str) -> Self {
        self.file_version = Some(version.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn meta(mut self, key: &str, value: &str) -> Self {
        self.meta.push((key.to_string(), value.to_string()));
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        let base = self
            .base
            .as_deref()
            .unwrap_or(r#"(module (func (export "run")))"#);
        let mut bytes = wat::parse_str(base).unwrap();

        if let Some(name) = &self.module_name {
            let mut payload = Vec::new();
            let mut subsection = Vec::new();
            push_name(&mut subsection, name.as_bytes());
            payload.push(0u8);
            push_leb(&mut payload, subsection.len() as u32);
            payload.extend(subsection);
            push_custom_section(&mut bytes, "name", &payload);
        }
        if let Some(components) = &self.components {
            push_custom_section(&mut bytes, COMPONENTS_SECTION, components.to_string().as_bytes());
        }
        if let Some(version) = &self.file_version {
            push_custom_section(&mut bytes, VERSION_SECTION, version.as_bytes());
        }
        if let Some(description) = &self.description {
            push_custom_section(&mut bytes, DESCRIPTION_SECTION, description.as_bytes());
        }
        if !self.meta.is_empty() {
            let meta = serde_json::to_vec(&self.meta).unwrap();
            push_custom_section(&mut bytes, META_SECTION, &meta);
        }

        bytes
    }

    /// Write the module as `dir/file_name`, creating `dir` if needed
    pub fn write(&self, dir: &Path, file_name: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(file_name);
        std::fs::write(&path, self.bytes()).unwrap();
        path
    }
}

fn push_leb(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn push_name(out: &mut Vec<u8>, name: &[u8]) {
    push_leb(out, name.len() as u32);
    out.extend_from_slice(name);
}

fn push_custom_section(out: &mut Vec<u8>, name: &str, data: &[u8]) {
    let mut body = Vec::new();
    push_name(&mut body, name.as_bytes());
    body.extend_from_slice(data);
    out.push(0u8);
    push_leb(out, body.len() as u32);
    out.extend(body);
}
