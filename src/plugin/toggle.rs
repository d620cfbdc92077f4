//! Module toggle state machine
//!
//! A module is Enabled (`<key>.wasm`), Disabled (`<key>.wasm.disabled`) or
//! locked with a pending disable: still enabled on disk, held open by the
//! host, waiting for the retry scheduler. Enabling is always attempted
//! directly since a disabled file is never held by the host.

use std::sync::Arc;
use tracing::{info, warn};

use crate::core::error::{Result, SwitchError};
use crate::core::event_bus::Notifier;
use crate::plugin::files::ModuleFiles;
use crate::plugin::pending::PendingToggleStore;
use crate::plugin::runtime::ModuleHost;
use crate::plugin::types::DesiredState;

/// What a toggle request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Enabled,
    Disabled,
    /// Deferred until the host releases the file
    Scheduled(DesiredState),
}

pub struct ModuleToggler {
    files: Arc<ModuleFiles>,
    host: Arc<dyn ModuleHost>,
    pending: Arc<PendingToggleStore>,
    notifier: Notifier,
}

impl ModuleToggler {
    pub fn new(
        files: Arc<ModuleFiles>,
        host: Arc<dyn ModuleHost>,
        pending: Arc<PendingToggleStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            files,
            host,
            pending,
            notifier,
        }
    }

    /// Flip a module between enabled and disabled
    ///
    /// Lock conditions never surface as errors: they leave a pending toggle
    /// behind and report `Scheduled`.
    pub fn toggle(&self, module_key: &str) -> Result<ToggleOutcome> {
        let _gate = self.files.gate();
        let location = self.files.locate(module_key);

        let (source, desired) = if let Some(active) = location.active {
            if self.host.is_loaded(&active) {
                return Ok(self.schedule(
                    module_key,
                    DesiredState::Disabled,
                    "is loaded by the host",
                ));
            }
            (active, DesiredState::Disabled)
        } else if let Some(inactive) = location.inactive {
            (inactive, DesiredState::Enabled)
        } else {
            let err = SwitchError::ModuleNotFound(module_key.to_string());
            self.notifier.error(module_key, &err);
            return Err(err);
        };

        match self.files.rename_to(&source, desired) {
            Ok(target) => {
                // A direct change supersedes anything still queued
                self.pending.remove(module_key);
                info!(module = %module_key, path = ?target, state = %desired, "Module toggled");
                self.notifier
                    .toggled(module_key, format!("Module {} {}", module_key, desired));
                Ok(match desired {
                    DesiredState::Enabled => ToggleOutcome::Enabled,
                    DesiredState::Disabled => ToggleOutcome::Disabled,
                })
            }
            Err(e) if e.is_transient_lock() => {
                Ok(self.schedule(module_key, desired, &format!("is locked ({})", e)))
            }
            Err(e) => {
                warn!(module = %module_key, error = %e, "Failed to toggle module");
                self.notifier.error(module_key, &e);
                Err(e)
            }
        }
    }

    fn schedule(&self, module_key: &str, desired: DesiredState, reason: &str) -> ToggleOutcome {
        self.pending.record(module_key, desired);
        info!(module = %module_key, state = %desired, "Module {}, toggle scheduled", reason);
        self.notifier.scheduled(
            module_key,
            format!(
                "Module {} {}; it will be {} when the host releases it",
                module_key, reason, desired
            ),
        );
        ToggleOutcome::Scheduled(desired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::{NotificationBus, NotificationKind};
    use crate::plugin::discovery::DiscoveryEngine;
    use crate::plugin::metadata::MetadataExtractor;
    use crate::plugin::runtime::tests::FakeHost;
    use crate::plugin::testing::ModuleFixture;
    use crate::plugin::types::ModuleLayout;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        modules: std::path::PathBuf,
        host: Arc<FakeHost>,
        pending: Arc<PendingToggleStore>,
        bus: Arc<NotificationBus>,
        toggler: ModuleToggler,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let modules = temp_dir.path().join("modules");
        std::fs::create_dir_all(&modules).unwrap();

        let host = Arc::new(FakeHost::default());
        let pending = Arc::new(PendingToggleStore::new());
        let bus = Arc::new(NotificationBus::new());
        let toggler = ModuleToggler::new(
            Arc::new(ModuleFiles::new(ModuleLayout::wasm(&modules))),
            host.clone(),
            pending.clone(),
            Notifier::new(bus.clone()),
        );

        Fixture {
            _temp_dir: temp_dir,
            modules,
            host,
            pending,
            bus,
            toggler,
        }
    }

    fn last_kind(bus: &NotificationBus) -> NotificationKind {
        bus.history().last().unwrap().kind
    }

    #[test]
    fn test_round_trip_keeps_content() {
        let f = fixture();
        let alpha = ModuleFixture::module("Alpha", None).write(&f.modules, "Alpha.wasm");
        let original = std::fs::read(&alpha).unwrap();

        assert_eq!(f.toggler.toggle("Alpha").unwrap(), ToggleOutcome::Disabled);
        assert!(!alpha.exists());
        let disabled = f.modules.join("Alpha.wasm.disabled");
        assert_eq!(std::fs::read(&disabled).unwrap(), original);
        assert_eq!(last_kind(&f.bus), NotificationKind::ModuleToggled);

        assert_eq!(f.toggler.toggle("Alpha").unwrap(), ToggleOutcome::Enabled);
        assert!(!disabled.exists());
        assert_eq!(std::fs::read(&alpha).unwrap(), original);
    }

    #[test]
    fn test_round_trip_keeps_extension_spelling() {
        let f = fixture();
        ModuleFixture::module("Alpha", None).write(&f.modules, "Alpha.WASM");
        let file_names = || -> Vec<String> {
            std::fs::read_dir(&f.modules)
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        };

        assert_eq!(f.toggler.toggle("alpha").unwrap(), ToggleOutcome::Disabled);
        assert_eq!(file_names(), vec!["Alpha.WASM.disabled".to_string()]);

        assert_eq!(f.toggler.toggle("alpha").unwrap(), ToggleOutcome::Enabled);
        assert_eq!(file_names(), vec!["Alpha.WASM".to_string()]);
    }

    #[test]
    fn test_loaded_module_is_scheduled_not_moved() {
        let f = fixture();
        let alpha = ModuleFixture::module("Alpha", None).write(&f.modules, "Alpha.wasm");
        f.host.hold(&alpha);

        let outcome = f.toggler.toggle("Alpha").unwrap();
        assert_eq!(outcome, ToggleOutcome::Scheduled(DesiredState::Disabled));
        assert!(alpha.exists());
        assert_eq!(
            f.pending.get("Alpha").unwrap().desired_state,
            DesiredState::Disabled
        );
        assert_eq!(last_kind(&f.bus), NotificationKind::ModuleScheduled);

        let extractor = MetadataExtractor::new(ModuleLayout::wasm(&f.modules), &[]);
        let records = DiscoveryEngine::new(extractor, f.host.clone()).discover_all();
        assert_eq!(records.len(), 1);
        assert!(records[0].active());
        assert!(records[0].loaded());
    }

    #[test]
    fn test_enable_ignores_host() {
        let f = fixture();
        let disabled = ModuleFixture::module("Beta", None).write(&f.modules, "Beta.wasm.disabled");
        f.host.hold(&disabled);

        assert_eq!(f.toggler.toggle("Beta").unwrap(), ToggleOutcome::Enabled);
        assert!(f.modules.join("Beta.wasm").exists());
    }

    #[test]
    fn test_missing_module_reports_error() {
        let f = fixture();

        let result = f.toggler.toggle("Ghost");
        assert!(matches!(result, Err(SwitchError::ModuleNotFound(_))));
        assert_eq!(last_kind(&f.bus), NotificationKind::Error);
        assert!(f.pending.is_empty());
    }

    #[test]
    fn test_successful_toggle_clears_stale_pending() {
        let f = fixture();
        ModuleFixture::module("Gamma", None).write(&f.modules, "Gamma.wasm");
        f.pending.record("Gamma", DesiredState::Disabled);

        f.toggler.toggle("Gamma").unwrap();
        assert!(f.pending.get("Gamma").is_none());
    }

    #[test]
    fn test_conflicting_files_are_an_error() {
        let f = fixture();
        ModuleFixture::module("Delta", None).write(&f.modules, "Delta.wasm");
        ModuleFixture::module("Delta", None).write(&f.modules, "Delta.wasm.disabled");

        let result = f.toggler.toggle("Delta");
        assert!(matches!(result, Err(SwitchError::Conflict(_))));
        assert!(Path::new(&f.modules.join("Delta.wasm")).exists());
        assert_eq!(last_kind(&f.bus), NotificationKind::Error);
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_denied_rename_is_scheduled() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture();
        let locked_dir = f.modules.join("locked");
        ModuleFixture::module("Eta", None).write(&locked_dir, "Eta.wasm");
        std::fs::set_permissions(&locked_dir, std::fs::Permissions::from_mode(0o555)).unwrap();

        // Root ignores directory permissions
        let scratch = locked_dir.join(".scratch");
        if std::fs::write(&scratch, b"").is_ok() {
            let _ = std::fs::remove_file(&scratch);
            std::fs::set_permissions(&locked_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let outcome = f.toggler.toggle("Eta").unwrap();
        std::fs::set_permissions(&locked_dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(outcome, ToggleOutcome::Scheduled(DesiredState::Disabled));
        assert!(locked_dir.join("Eta.wasm").exists());
        assert!(f.pending.get("Eta").is_some());
    }
}
