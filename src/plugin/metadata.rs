//! Module metadata extraction
//!
//! Decides whether a candidate file is a genuine module and builds its
//! inventory record. Classification runs in stages:
//! 1. Cheap header read, rejecting deny-listed system libraries (active files only)
//! 2. Full introspection of the module image
//! 3. Search for a concrete component carrying the module marker
//! 4. Name, version and download link extraction
//!
//! Non-modules are excluded silently. Once a file has passed the header
//! filter, load failures degrade to a minimal record instead of dropping it.

use regex::Regex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use super::files::ModuleFiles;
use super::image::{HeaderReader, Introspector, ModuleImage, WasmReader};
use super::types::{CandidateFile, DesiredState, ModuleLayout, ModuleRecord};

pub const UNKNOWN_VERSION: &str = "Unknown";

/// Metadata keys that hold a download or project link
const LINK_KEY_FRAGMENTS: &[&str] = &["url", "link", "homepage", "repository"];

/// Classifies candidate files into module records
pub struct MetadataExtractor {
    /// Staging creates active-named files, so it runs under the rename gate
    files: Arc<ModuleFiles>,
    deny_list: Vec<String>,
    header: Arc<dyn HeaderReader>,
    introspector: Arc<dyn Introspector>,
}

impl MetadataExtractor {
    /// Create an extractor reading WebAssembly modules
    pub fn new(layout: ModuleLayout, deny_list: &[String]) -> Self {
        Self::with_files(Arc::new(ModuleFiles::new(layout)), deny_list)
    }

    /// Create an extractor sharing the rename gate of `files`
    pub fn with_files(files: Arc<ModuleFiles>, deny_list: &[String]) -> Self {
        let reader = Arc::new(WasmReader::new(files.layout().extension()));
        Self::build(files, deny_list, reader.clone(), reader)
    }

    pub fn with_readers(
        layout: ModuleLayout,
        deny_list: &[String],
        header: Arc<dyn HeaderReader>,
        introspector: Arc<dyn Introspector>,
    ) -> Self {
        Self::build(Arc::new(ModuleFiles::new(layout)), deny_list, header, introspector)
    }

    fn build(
        files: Arc<ModuleFiles>,
        deny_list: &[String],
        header: Arc<dyn HeaderReader>,
        introspector: Arc<dyn Introspector>,
    ) -> Self {
        Self {
            files,
            deny_list: deny_list.iter().map(|f| f.to_lowercase()).collect(),
            header,
            introspector,
        }
    }

    pub fn layout(&self) -> &ModuleLayout {
        self.files.layout()
    }

    /// True if `name` contains any deny-listed fragment, ignoring case
    pub fn is_denied(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.deny_list.iter().any(|fragment| name.contains(fragment.as_str()))
    }

    /// Classify a candidate file
    ///
    /// Returns `None` when the file is not a module.
    pub fn classify(&self, candidate: &CandidateFile) -> Option<ModuleRecord> {
        let path = &candidate.path;
        let key = self.layout().module_key(path)?;
        let active = !candidate.inactive;

        // Disabled files were accepted before they were disabled
        let declared_name = if active {
            match self.header.read_identity(path) {
                Ok(identity) => {
                    let lookup = identity.module_name.as_deref().unwrap_or(&key);
                    if self.is_denied(lookup) {
                        debug!(path = ?path, name = %lookup, "Skipping system library");
                        return None;
                    }
                    identity.module_name
                }
                Err(e) => {
                    debug!(path = ?path, error = %e, "Not a module binary");
                    return None;
                }
            }
        } else {
            None
        };

        // A toggle must not rename onto the staged copy before it is removed
        let _gate = (!active).then(|| self.files.gate());
        let staged = if active {
            None
        } else {
            match StagedCopy::acquire(path, self.layout()) {
                Ok(staged) => Some(staged),
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to stage disabled module, using file name");
                    return Some(degraded_record(&key, active));
                }
            }
        };
        let target = staged.as_ref().map(StagedCopy::path).unwrap_or(path.as_path());

        let image = match self.introspector.introspect(target) {
            Ok(image) => image,
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read module metadata, using file name");
                return Some(degraded_record(&key, active));
            }
        };

        let component = match image.first_module_component() {
            Ok(Some(component)) => component,
            Ok(None) => {
                debug!(path = ?path, "No module component declared");
                return None;
            }
            Err(e) => {
                debug!(path = ?path, error = %e, "Unreadable component table");
                return None;
            }
        };

        let identity = component.identity.unwrap_or_default();
        let name = non_empty(identity.name)
            .or(declared_name)
            .or_else(|| image.module_name.clone())
            .unwrap_or_else(|| key.clone());
        let version = non_empty(identity.version)
            .or_else(|| image.version.clone())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());

        Some(ModuleRecord::new(
            name,
            active,
            false,
            version,
            download_link(&image),
            key,
        ))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn degraded_record(key: &str, active: bool) -> ModuleRecord {
    ModuleRecord::new(key, active, false, UNKNOWN_VERSION, None, key)
}

fn url_pattern() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r"https?://\S+").expect("valid URL pattern"))
}

/// Pick a download link from the module's metadata
///
/// Looks at link-like metadata keys first, then the first URL in the description.
pub fn download_link(image: &ModuleImage) -> Option<String> {
    image
        .metadata
        .iter()
        .find(|(key, _)| {
            let key = key.to_lowercase();
            LINK_KEY_FRAGMENTS.iter().any(|fragment| key.contains(fragment))
        })
        .map(|(_, value)| value.clone())
        .or_else(|| {
            image
                .description
                .as_deref()
                .and_then(|text| url_pattern().find(text))
                .map(|m| m.as_str().to_string())
        })
}

/// Copy of a disabled module under its active file name
///
/// The copy is removed when the guard drops. When a file already sits at the
/// active name the guard points at it and leaves it alone.
#[derive(Debug)]
pub struct StagedCopy {
    path: PathBuf,
    owned: bool,
}

impl StagedCopy {
    pub fn acquire(source: &Path, layout: &ModuleLayout) -> io::Result<Self> {
        let target = layout
            .path_for_state(source, DesiredState::Enabled)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} does not follow the module naming convention", source.display()),
                )
            })?;

        let mut dest = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Ok(Self {
                    path: target,
                    owned: false,
                });
            }
            Err(e) => return Err(e),
        };
        let guard = Self {
            path: target,
            owned: true,
        };

        let copied = File::open(source)
            .and_then(|mut src| io::copy(&mut src, &mut dest))
            .and_then(|_| dest.flush());
        // Close before the guard may delete it
        drop(dest);
        copied?;

        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the guard created the file and will remove it
    pub fn is_owned(&self) -> bool {
        self.owned
    }
}

impl Drop for StagedCopy {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = ?self.path, error = %e, "Failed to remove staged module copy");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Result;
    use crate::plugin::image::{ModuleIdentity, MODULE_MARKER};
    use crate::plugin::testing::ModuleFixture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts full introspections
    #[derive(Default)]
    struct SpyIntrospector {
        calls: AtomicUsize,
        inner: WasmReader,
    }

    impl Introspector for SpyIntrospector {
        fn introspect(&self, path: &Path) -> Result<ModuleImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.introspect(path)
        }
    }

    fn extractor(dir: &Path) -> MetadataExtractor {
        MetadataExtractor::new(
            ModuleLayout::wasm(dir),
            &["wasi_snapshot".to_string(), "compiler_builtins".to_string()],
        )
    }

    fn candidate(path: PathBuf, inactive: bool) -> CandidateFile {
        CandidateFile { path, inactive }
    }

    #[test]
    fn test_classify_active_module() {
        let temp_dir = TempDir::new().unwrap();
        let path = ModuleFixture::module("Alpha", Some("1.2.0"))
            .meta("Project-Url", "https://example.org/alpha")
            .write(temp_dir.path(), "Alpha.wasm");

        let record = extractor(temp_dir.path()).classify(&candidate(path, false)).unwrap();
        assert_eq!(record.name(), "Alpha");
        assert_eq!(record.version(), "1.2.0");
        assert!(record.active());
        assert_eq!(record.internal_name(), "Alpha");
        assert_eq!(record.download_link(), Some("https://example.org/alpha"));
    }

    #[test]
    fn test_non_module_is_excluded_not_degraded() {
        let temp_dir = TempDir::new().unwrap();
        let path = ModuleFixture::new()
            .components(serde_json::json!([{ "name": "Util", "capabilities": ["helper"] }]))
            .write(temp_dir.path(), "Util.wasm");
        let bare = ModuleFixture::new().write(temp_dir.path(), "Bare.wasm");

        let extractor = extractor(temp_dir.path());
        assert!(extractor.classify(&candidate(path, false)).is_none());
        assert!(extractor.classify(&candidate(bare, false)).is_none());
    }

    #[test]
    fn test_abstract_only_module_is_excluded() {
        let temp_dir = TempDir::new().unwrap();
        let path = ModuleFixture::new()
            .components(serde_json::json!([
                { "name": "Base", "abstract": true, "capabilities": [MODULE_MARKER] }
            ]))
            .write(temp_dir.path(), "Base.wasm");

        assert!(extractor(temp_dir.path()).classify(&candidate(path, false)).is_none());
    }

    #[test]
    fn test_deny_listed_name_short_circuits() {
        let temp_dir = TempDir::new().unwrap();
        let path = ModuleFixture::module("Shim", None)
            .module_name("WASI_Snapshot_Preview1")
            .write(temp_dir.path(), "shim.wasm");

        let spy = Arc::new(SpyIntrospector::default());
        let extractor = MetadataExtractor::with_readers(
            ModuleLayout::wasm(temp_dir.path()),
            &["wasi_snapshot".to_string()],
            Arc::new(WasmReader::default()),
            spy.clone(),
        );

        assert!(extractor.classify(&candidate(path, false)).is_none());
        assert_eq!(spy.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_deny_list_applies_to_file_stem_without_name_section() {
        let temp_dir = TempDir::new().unwrap();
        let path = ModuleFixture::module("Builtins", None)
            .write(temp_dir.path(), "compiler_builtins-3f2a.wasm");

        assert!(extractor(temp_dir.path()).classify(&candidate(path, false)).is_none());
    }

    #[test]
    fn test_header_read_failure_excludes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Broken.wasm");
        std::fs::write(&path, b"not a module at all").unwrap();

        assert!(extractor(temp_dir.path()).classify(&candidate(path, false)).is_none());
    }

    #[test]
    fn test_version_falls_back_to_file_version_then_unknown() {
        let temp_dir = TempDir::new().unwrap();
        let with_file_version = ModuleFixture::module("Gamma", None)
            .file_version("0.3.0")
            .write(temp_dir.path(), "Gamma.wasm");
        let without = ModuleFixture::module("Delta", None).write(temp_dir.path(), "Delta.wasm");

        let extractor = extractor(temp_dir.path());
        let gamma = extractor.classify(&candidate(with_file_version, false)).unwrap();
        let delta = extractor.classify(&candidate(without, false)).unwrap();
        assert_eq!(gamma.version(), "0.3.0");
        assert_eq!(delta.version(), UNKNOWN_VERSION);
    }

    #[test]
    fn test_name_falls_back_to_declared_module_name() {
        let temp_dir = TempDir::new().unwrap();
        let path = ModuleFixture::new()
            .module_name("epsilon_tools")
            .components(serde_json::json!([{ "name": "E", "capabilities": [MODULE_MARKER] }]))
            .write(temp_dir.path(), "Epsilon.wasm");

        let record = extractor(temp_dir.path()).classify(&candidate(path, false)).unwrap();
        assert_eq!(record.name(), "epsilon_tools");
        assert_eq!(record.internal_name(), "Epsilon");
    }

    #[test]
    fn test_inactive_module_staged_copy_is_removed() {
        let temp_dir = TempDir::new().unwrap();
        let path = ModuleFixture::module("Beta", Some("0.9.0"))
            .write(temp_dir.path(), "Beta.wasm.disabled");

        let record = extractor(temp_dir.path()).classify(&candidate(path.clone(), true)).unwrap();
        assert_eq!(record.name(), "Beta");
        assert!(!record.active());
        assert!(path.exists());
        assert!(!temp_dir.path().join("Beta.wasm").exists());
    }

    #[test]
    fn test_inactive_module_skips_deny_list() {
        let temp_dir = TempDir::new().unwrap();
        let path = ModuleFixture::module("Wasi", None)
            .module_name("wasi_snapshot_shim")
            .write(temp_dir.path(), "Shim.wasm.disabled");

        assert!(extractor(temp_dir.path()).classify(&candidate(path, true)).is_some());
    }

    #[test]
    fn test_existing_active_copy_is_not_deleted() {
        let temp_dir = TempDir::new().unwrap();
        let disabled = ModuleFixture::module("Zeta", Some("1.0.0"))
            .write(temp_dir.path(), "Zeta.wasm.disabled");
        let existing = ModuleFixture::module("Zeta", Some("2.0.0")).write(temp_dir.path(), "Zeta.wasm");

        let record = extractor(temp_dir.path()).classify(&candidate(disabled, true)).unwrap();
        assert_eq!(record.version(), "2.0.0");
        assert!(existing.exists());
    }

    #[test]
    fn test_inactive_garbage_degrades_to_file_name() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Omega.wasm.disabled");
        std::fs::write(&path, b"corrupted").unwrap();

        let record = extractor(temp_dir.path()).classify(&candidate(path.clone(), true)).unwrap();
        assert_eq!(record.name(), "Omega");
        assert_eq!(record.internal_name(), "Omega");
        assert_eq!(record.version(), UNKNOWN_VERSION);
        assert_eq!(record.download_link(), None);
        assert!(!record.active());
        assert!(!temp_dir.path().join("Omega.wasm").exists());
    }

    #[test]
    fn test_active_module_failing_validation_degrades() {
        let temp_dir = TempDir::new().unwrap();
        // Encodes fine but the body does not produce the declared result
        let path = ModuleFixture::module("Kappa", Some("3.0.0"))
            .base("(module (func (result i32)))")
            .write(temp_dir.path(), "Kappa.wasm");

        let record = extractor(temp_dir.path()).classify(&candidate(path, false)).unwrap();
        assert_eq!(record.name(), "Kappa");
        assert_eq!(record.internal_name(), "Kappa");
        assert_eq!(record.version(), UNKNOWN_VERSION);
        assert_eq!(record.download_link(), None);
        assert!(record.active());
    }

    #[cfg(unix)]
    #[test]
    fn test_staging_failure_degrades() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let locked_dir = temp_dir.path().join("locked");
        let path = ModuleFixture::module("Lambda", Some("1.0.0"))
            .write(&locked_dir, "Lambda.wasm.disabled");
        std::fs::set_permissions(&locked_dir, std::fs::Permissions::from_mode(0o555)).unwrap();

        // Root ignores directory permissions
        let writable = std::fs::write(locked_dir.join(".scratch"), b"").is_ok();
        let record = if writable {
            None
        } else {
            extractor(temp_dir.path()).classify(&candidate(path, true))
        };
        std::fs::set_permissions(&locked_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
        if writable {
            return;
        }

        let record = record.unwrap();
        assert_eq!(record.name(), "Lambda");
        assert_eq!(record.version(), UNKNOWN_VERSION);
        assert!(!record.active());
        assert!(!locked_dir.join("Lambda.wasm").exists());
    }

    #[test]
    fn test_staging_waits_for_rename_gate() {
        let temp_dir = TempDir::new().unwrap();
        let modules = temp_dir.path().to_path_buf();
        let disabled = ModuleFixture::module("Beta", Some("0.9.0"))
            .write(&modules, "Beta.wasm.disabled");
        let enabled = modules.join("Beta.wasm");

        let files = Arc::new(ModuleFiles::new(ModuleLayout::wasm(&modules)));
        let extractor = Arc::new(MetadataExtractor::with_files(files.clone(), &[]));

        // A toggle holds the gate while it enables Beta
        let gate = files.gate();
        let worker = {
            let extractor = extractor.clone();
            let disabled = disabled.clone();
            std::thread::spawn(move || extractor.classify(&candidate(disabled, true)))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!enabled.exists());
        assert!(!worker.is_finished());

        files.rename_to(&disabled, DesiredState::Enabled).unwrap();
        drop(gate);

        // The scan sees the renamed module and must leave it in place
        let _ = worker.join().unwrap();
        assert!(enabled.exists());
        assert!(!disabled.exists());
    }

    #[test]
    fn test_download_link_prefers_metadata_keys() {
        let image = ModuleImage {
            description: Some("See https://docs.example.org/x for docs".to_string()),
            metadata: vec![
                ("Author".to_string(), "someone".to_string()),
                ("RepositoryRoot".to_string(), "https://git.example.org/x".to_string()),
                ("homepage".to_string(), "https://example.org".to_string()),
            ],
            ..ModuleImage::default()
        };
        assert_eq!(download_link(&image).as_deref(), Some("https://git.example.org/x"));
    }

    #[test]
    fn test_download_link_from_description() {
        let image = ModuleImage {
            description: Some("Get it at http://mods.example.org/beta?v=2 today".to_string()),
            ..ModuleImage::default()
        };
        assert_eq!(
            download_link(&image).as_deref(),
            Some("http://mods.example.org/beta?v=2")
        );
        assert_eq!(download_link(&ModuleImage::default()), None);
    }

    #[test]
    fn test_staged_copy_guard_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let layout = ModuleLayout::wasm(temp_dir.path());
        let source = ModuleFixture::module("Eta", None).write(temp_dir.path(), "Eta.wasm.disabled");

        let staged = StagedCopy::acquire(&source, &layout).unwrap();
        assert!(staged.is_owned());
        assert_eq!(std::fs::read(staged.path()).unwrap(), std::fs::read(&source).unwrap());
        let staged_path = staged.path().to_path_buf();
        drop(staged);
        assert!(!staged_path.exists());
        assert!(source.exists());
    }

    #[test]
    fn test_header_identity_unused_for_inactive() {
        struct FailingHeader;
        impl HeaderReader for FailingHeader {
            fn read_identity(&self, _path: &Path) -> Result<ModuleIdentity> {
                panic!("header must not be read for disabled modules");
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let path = ModuleFixture::module("Theta", None).write(temp_dir.path(), "Theta.wasm.disabled");
        let extractor = MetadataExtractor::with_readers(
            ModuleLayout::wasm(temp_dir.path()),
            &[],
            Arc::new(FailingHeader),
            Arc::new(WasmReader::default()),
        );

        assert!(extractor.classify(&candidate(path, true)).is_some());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn deny_list_ignores_case(prefix in "[a-z0-9_]{0,8}", suffix in "[a-z0-9_]{0,8}", upper in any::<bool>()) {
                let extractor = MetadataExtractor::new(
                    ModuleLayout::wasm("/m"),
                    &["Compiler_Builtins".to_string()],
                );
                let fragment = if upper { "COMPILER_BUILTINS" } else { "compiler_builtins" };
                let name = format!("{}{}{}", prefix, fragment, suffix);
                prop_assert!(extractor.is_denied(&name));
            }
        }
    }
}
