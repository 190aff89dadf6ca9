//! Settings store
//!
//! Owns the live [`SettingsDocument`] together with its location on disk. Every
//! mutation goes through [`SettingsStore::update`] and is written through immediately;
//! the last writer wins.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::migration::MigrationRegistry;
use crate::config::prefix::PrefixConfiguration;
use crate::config::settings::{SettingsDocument, strip_dunder_keys};
use crate::constants::{paths, settings::CURRENT_VERSION, settings::HARDWARE_PROFILE_VERSION};
use crate::errors::{PresentableError, ResolveError, SettingsError};
use crate::hardware::{HardwareProber, HardwareProfile};

pub struct SettingsStore {
    path: PathBuf,
    document: SettingsDocument,
    migrations: MigrationRegistry,
}

impl SettingsStore {
    /// Default location of the settings file
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(paths::APP_DIR);
        path.push(paths::SETTINGS_FILENAME);
        path
    }

    /// Loads the settings file with the built-in migrations
    pub fn load(path: impl Into<PathBuf>, prober: &dyn HardwareProber) -> Result<Self> {
        Self::load_with(path, MigrationRegistry::builtin(), prober)
    }

    /// Loads the settings file, migrating and re-profiling as needed
    ///
    /// A missing or blank file yields the defaults. Malformed JSON or a document that does
    /// not fit the schema is reported as a [`PresentableError`], never replaced by defaults.
    pub fn load_with(
        path: impl Into<PathBuf>,
        migrations: MigrationRegistry,
        prober: &dyn HardwareProber,
    ) -> Result<Self> {
        let path = path.into();
        let mut dirty = false;

        let document = if path.exists() {
            debug!(path = %path.display(), "Loading settings");
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {:?}", path))?;

            if contents.trim().is_empty() {
                warn!(path = %path.display(), "Found empty settings file, using default settings");
                dirty = true;
                SettingsDocument::default()
            } else {
                let (document, renamed) = parse_document(&contents)?;
                dirty |= renamed;
                document
            }
        } else {
            info!(path = %path.display(), "No settings file present, going to save one");
            dirty = true;
            SettingsDocument::default()
        };

        let mut store = Self::from_document(path, document, migrations);

        if store.document.version != CURRENT_VERSION {
            dirty = true;
            store.perform_migrations(CURRENT_VERSION)?;
        }

        dirty |= store.profile_hardware(prober);

        if dirty {
            info!("Saving settings after load, because something was wrong or needs updating");
            store.save()?;
        }

        Ok(store)
    }

    /// Store around an in-memory document; nothing is read from disk
    pub fn from_document(path: impl Into<PathBuf>, document: SettingsDocument, migrations: MigrationRegistry) -> Self {
        Self {
            path: path.into(),
            document,
            migrations,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-only view of the live document
    pub fn document(&self) -> &SettingsDocument {
        &self.document
    }

    pub fn version(&self) -> u32 {
        self.document.version
    }

    pub fn find_prefix(&self, id: &str) -> Option<&PrefixConfiguration> {
        self.document.find_prefix(id)
    }

    /// Sorts prefixes, stamps the current schema version and writes the file
    pub fn save(&mut self) -> Result<()> {
        self.document.version = CURRENT_VERSION;
        self.write()
    }

    /// Applies a transform to the live document and persists it
    pub fn update<T, F>(&mut self, transform: F) -> Result<T>
    where
        F: FnOnce(&mut SettingsDocument) -> T,
    {
        let result = transform(&mut self.document);
        self.save()?;
        Ok(result)
    }

    /// Field-level update of one prefix
    pub fn set_prefix_setting(&mut self, id: &str, key: &str, value: Value) -> Result<()> {
        let prefix = self
            .document
            .find_prefix_mut(id)
            .ok_or_else(|| SettingsError::NoSuchPrefix(id.to_string()))?;
        prefix.apply_setting(key, value)?;

        info!(prefix = %id, key = %key, "Updated prefix setting");
        self.save()
    }

    /// Inserts or replaces a prefix configuration by id
    pub fn save_prefix(&mut self, prefix: PrefixConfiguration) -> Result<()> {
        self.update(|doc| doc.upsert_prefix(prefix))
    }

    /// Walks the registered edges one version at a time towards `target`
    ///
    /// A missing edge is logged and skipped: the recorded version stays where it was and
    /// the walk continues with the next step. Every applied edge persists the document
    /// at that edge's version.
    pub fn perform_migrations(&mut self, target: u32) -> Result<()> {
        if self.document.version == target {
            debug!(version = target, "Settings file is up to date");
            return Ok(());
        }

        let mut a = self.document.version;
        info!(from = a, to = target, "Performing settings migration");

        let steps: Vec<u32> = if target > a {
            (a + 1..=target).collect()
        } else {
            (target..a).rev().collect()
        };

        for x in steps {
            let edge = (a, x);
            match self.migrations.get(edge) {
                Some(transform) => {
                    info!(edge = ?edge, "Applying migration");
                    if let Some(replacement) = transform(&mut self.document) {
                        self.document = replacement;
                    }
                    self.document.version = x;
                    self.write()
                        .with_context(|| format!("Failed to persist settings after migration {:?}", edge))?;
                }
                None => warn!(edge = ?edge, "Migration is not registered, skipping"),
            }
            a = x;
        }

        Ok(())
    }

    /// Stored hardware profile, re-profiling first when needed
    pub fn hardware_profile(&mut self, prober: &dyn HardwareProber) -> Result<HardwareProfile> {
        if self.profile_hardware(prober) {
            self.save()?;
        }

        self.document
            .hardware_profile
            .clone()
            .ok_or_else(|| ResolveError::NoHardwareProfile.into())
    }

    /// Returns whether the document changed and should be saved
    fn profile_hardware(&mut self, prober: &dyn HardwareProber) -> bool {
        if !self.document.try_profiling_hardware {
            return false;
        }

        let should_profile = match &self.document.hardware_profile {
            Some(saved) => match prober.graphics_id() {
                Ok(graphics_id) => graphics_id != saved.graphics_id || saved.version != HARDWARE_PROFILE_VERSION,
                Err(e) => {
                    info!(error = %e, "Failed to get graphics identity");
                    return false;
                }
            },
            None => true,
        };

        if !should_profile {
            return false;
        }

        info!("Going to profile hardware");
        match prober.profile() {
            Ok(profile) => self.document.hardware_profile = Some(profile),
            Err(e) => {
                error!(error = %e, "Failed to profile hardware");
                info!("No longer trying to profile hardware due to errors");
                self.document.try_profiling_hardware = false;
            }
        }
        true
    }

    /// Writes the document without touching its version
    fn write(&mut self) -> Result<()> {
        debug!(path = %self.path.display(), "Saving settings");
        self.document.sort_prefixes();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(&self.document).context("Failed to serialize settings")?;
        fs::write(&self.path, json.as_bytes())
            .with_context(|| format!("Failed to write settings to {:?}", self.path))?;
        Ok(())
    }
}

/// Decodes the file contents; the flag tells whether legacy keys were renamed
fn parse_document(contents: &str) -> Result<(SettingsDocument, bool)> {
    let mut raw: Value = serde_json::from_str(contents).map_err(PresentableError::invalid_settings)?;

    let renamed = match raw.as_object_mut() {
        Some(object) => strip_dunder_keys(object),
        None => false,
    };

    let document: SettingsDocument = serde_json::from_value(raw).map_err(PresentableError::invalid_settings)?;
    document.validate().map_err(PresentableError::invalid_settings)?;
    Ok((document, renamed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{HardwareProfilingError, find_presentable};
    use crate::hardware::GpuVendor;
    use crate::products::PrefixHint;
    use serde_json::json;
    use std::cell::Cell;
    use tempfile::TempDir;

    struct FakeProber {
        graphics_id: String,
        fail: bool,
        profiles: Cell<u32>,
    }

    impl FakeProber {
        fn new(graphics_id: &str) -> Self {
            Self {
                graphics_id: graphics_id.to_string(),
                fail: false,
                profiles: Cell::new(0),
            }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::new("gpu") }
        }
    }

    impl HardwareProber for FakeProber {
        fn graphics_id(&self) -> Result<String, HardwareProfilingError> {
            Ok(self.graphics_id.clone())
        }

        fn profile(&self) -> Result<HardwareProfile, HardwareProfilingError> {
            self.profiles.set(self.profiles.get() + 1);
            if self.fail {
                return Err(HardwareProfilingError("no lspci".into()));
            }
            Ok(HardwareProfile::new(GpuVendor::Amd, self.graphics_id.clone()))
        }
    }

    fn settings_path(dir: &TempDir) -> PathBuf {
        dir.path().join("nested").join("user_settings.json")
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_missing_file_creates_defaults() {
        let dir = TempDir::new().unwrap();
        let path = settings_path(&dir);
        let prober = FakeProber::new("gpu");

        let store = SettingsStore::load(&path, &prober).unwrap();

        assert!(path.exists());
        assert_eq!(store.version(), CURRENT_VERSION);
        assert_eq!(store.document().hardware_profile.as_ref().map(|p| p.gpu_vendor), Some(GpuVendor::Amd));
        assert_eq!(read_json(&path)["version"], json!(CURRENT_VERSION));
    }

    #[test]
    fn test_blank_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user_settings.json");
        fs::write(&path, "  \n").unwrap();

        let store = SettingsStore::load(&path, &FakeProber::new("gpu")).unwrap();
        assert!(store.document().wineprefixes.is_empty());
        assert_eq!(read_json(&path)["release_channel"], json!("master"));
    }

    #[test]
    fn test_malformed_file_is_presentable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user_settings.json");
        fs::write(&path, "{ \"version\": ").unwrap();

        let err = SettingsStore::load(&path, &FakeProber::new("gpu")).err().unwrap();
        let presentable = find_presentable(&err).expect("presentable error");
        assert_eq!(presentable.title, "Invalid settings file");
    }

    #[test]
    fn test_schema_violation_is_presentable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user_settings.json");
        fs::write(&path, r#"{"version": 4, "wineprefixes": "not a list"}"#).unwrap();

        let err = SettingsStore::load(&path, &FakeProber::new("gpu")).err().unwrap();
        assert!(find_presentable(&err).is_some());
    }

    #[test]
    fn test_duplicate_prefix_ids_are_presentable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user_settings.json");
        let prefix = json!({"id": "same", "name_on_disk": "player", "display_name": "Player"});
        let doc = json!({"version": 4, "wineprefixes": [prefix.clone(), prefix]});
        fs::write(&path, doc.to_string()).unwrap();

        let err = SettingsStore::load(&path, &FakeProber::new("gpu")).err().unwrap();
        let presentable = find_presentable(&err).expect("presentable error");
        assert_eq!(presentable.title, "Invalid settings file");
        assert!(err.chain().any(|cause| matches!(
            cause.downcast_ref::<SettingsError>(),
            Some(SettingsError::DuplicateId(id)) if id == "same"
        )));
    }

    #[test]
    fn test_dunder_keys_are_renamed_and_saved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user_settings.json");
        fs::write(&path, r#"{"__version__": 4, "try_profiling_hardware": false}"#).unwrap();

        let store = SettingsStore::load(&path, &FakeProber::new("gpu")).unwrap();
        assert_eq!(store.version(), 4);

        let saved = read_json(&path);
        assert!(saved.get("__version__").is_none());
        assert_eq!(saved["version"], json!(4));
    }

    #[test]
    fn test_priority_order_survives_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = settings_path(&dir);
        let prober = FakeProber::new("gpu");

        let mut store = SettingsStore::load(&path, &prober).unwrap();
        let five = PrefixConfiguration::new("Five", 5, vec![PrefixHint::Studio]);
        let one = PrefixConfiguration::new("One", 1, vec![PrefixHint::Player]);
        store
            .update(|doc| {
                doc.wineprefixes.push(five);
                doc.wineprefixes.push(one);
            })
            .unwrap();

        let reloaded = SettingsStore::load(&path, &prober).unwrap();
        let priorities: Vec<_> = reloaded.document().wineprefixes.iter().map(|p| p.priority).collect();
        assert_eq!(priorities, vec![Some(1), Some(5)]);
    }

    #[test]
    fn test_migrate_zero_to_two_applies_edges_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user_settings.json");

        let mut registry = MigrationRegistry::empty();
        registry.register(0, 1, |doc| {
            doc.unsupported_settings.insert("trail".into(), json!(["0->1"]));
            None
        });
        registry.register(1, 2, |doc| {
            if let Some(Value::Array(trail)) = doc.unsupported_settings.get_mut("trail") {
                trail.push(json!("1->2"));
            }
            None
        });

        let doc = SettingsDocument { version: 0, ..Default::default() };
        let mut store = SettingsStore::from_document(&path, doc, registry);
        store.perform_migrations(2).unwrap();

        assert_eq!(store.version(), 2);
        assert_eq!(store.document().unsupported_settings.get("trail"), Some(&json!(["0->1", "1->2"])));
        // Each step persists the document at the step's version
        assert_eq!(read_json(&path)["version"], json!(2));
    }

    #[test]
    fn test_migration_replacement_document_is_adopted() {
        let dir = TempDir::new().unwrap();
        let mut registry = MigrationRegistry::empty();
        registry.register(0, 1, |_| {
            Some(SettingsDocument { default_wine_home: "/opt/replaced".into(), ..Default::default() })
        });

        let doc = SettingsDocument { version: 0, ..Default::default() };
        let mut store = SettingsStore::from_document(dir.path().join("s.json"), doc, registry);
        store.perform_migrations(1).unwrap();

        assert_eq!(store.version(), 1);
        assert_eq!(store.document().default_wine_home, "/opt/replaced");
    }

    #[test]
    fn test_missing_edge_keeps_version_and_continues() {
        let dir = TempDir::new().unwrap();
        let mut registry = MigrationRegistry::empty();
        registry.register(0, 1, |_| None);
        registry.register(2, 3, |_| None);

        // (1, 2) is missing: the version stays at 1 for that step, then (2, 3) still runs
        let doc = SettingsDocument { version: 0, ..Default::default() };
        let mut store = SettingsStore::from_document(dir.path().join("s.json"), doc, registry);
        store.perform_migrations(3).unwrap();
        assert_eq!(store.version(), 3);

        // With nothing after the gap the document is left at the last applied edge
        let mut registry = MigrationRegistry::empty();
        registry.register(0, 1, |_| None);
        let doc = SettingsDocument { version: 0, ..Default::default() };
        let mut store = SettingsStore::from_document(dir.path().join("t.json"), doc, registry);
        store.perform_migrations(2).unwrap();
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_downgrade_walks_backwards() {
        let dir = TempDir::new().unwrap();
        let doc = SettingsDocument { version: 3, ..Default::default() };
        let mut store = SettingsStore::from_document(dir.path().join("s.json"), doc, MigrationRegistry::builtin());

        store.perform_migrations(0).unwrap();
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_same_version_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.json");
        let mut store =
            SettingsStore::from_document(&path, SettingsDocument::default(), MigrationRegistry::builtin());

        store.perform_migrations(CURRENT_VERSION).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_load_migrates_legacy_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user_settings.json");
        fs::write(
            &path,
            r#"{"__version__": 1, "try_profiling_hardware": false,
                "unsupported_settings": {"env": {"WINEDEBUG": "+d3d"}}}"#,
        )
        .unwrap();

        let store = SettingsStore::load(&path, &FakeProber::new("gpu")).unwrap();
        assert_eq!(store.version(), CURRENT_VERSION);
        assert_eq!(store.document().wineprefixes.len(), 2);
        assert!(store.document().wineprefixes.iter().all(|p| p.enable_winedebug));
    }

    #[test]
    fn test_profiling_failure_latches() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user_settings.json");
        let prober = FakeProber::failing();

        let store = SettingsStore::load(&path, &prober).unwrap();
        assert!(!store.document().try_profiling_hardware);
        assert_eq!(prober.profiles.get(), 1);

        let store = SettingsStore::load(&path, &prober).unwrap();
        assert!(store.document().hardware_profile.is_none());
        assert_eq!(prober.profiles.get(), 1);
    }

    #[test]
    fn test_reprofile_only_when_graphics_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user_settings.json");

        let first = FakeProber::new("gpu-a");
        SettingsStore::load(&path, &first).unwrap();
        assert_eq!(first.profiles.get(), 1);

        let same = FakeProber::new("gpu-a");
        SettingsStore::load(&path, &same).unwrap();
        assert_eq!(same.profiles.get(), 0);

        let changed = FakeProber::new("gpu-b");
        let mut store = SettingsStore::load(&path, &changed).unwrap();
        assert_eq!(changed.profiles.get(), 1);
        assert_eq!(store.hardware_profile(&changed).unwrap().graphics_id, "gpu-b");
    }

    #[test]
    fn test_set_prefix_setting_persists_and_rejects_unknown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user_settings.json");
        let prober = FakeProber::new("gpu");

        let mut store = SettingsStore::load(&path, &prober).unwrap();
        let prefix = PrefixConfiguration::new("Player", 0, vec![PrefixHint::Player]);
        let id = prefix.id.clone();
        store.save_prefix(prefix).unwrap();

        store.set_prefix_setting(&id, "use_mesa_gl_override", json!(true)).unwrap();
        assert!(store.set_prefix_setting(&id, "bogus", json!(1)).is_err());
        assert!(store.set_prefix_setting("nope", "env", json!({})).is_err());

        let reloaded = SettingsStore::load(&path, &prober).unwrap();
        assert!(reloaded.find_prefix(&id).unwrap().use_mesa_gl_override);
    }
}
