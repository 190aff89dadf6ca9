//! Settings schema migrations
//!
//! Migrations form a directed graph of `(from, to)` edges. Only registered edges exist;
//! nothing is synthesized from neighbouring edges. A transform mutates the document in
//! place or returns a replacement for it.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::prefix::{player_prefix_model, studio_prefix_model};
use crate::config::settings::SettingsDocument;
use crate::constants::{dxvk, wine};

/// Transform applied along one edge
pub type MigrationFn = Box<dyn Fn(&mut SettingsDocument) -> Option<SettingsDocument> + Send + Sync>;

/// `(version_from, version_to)`
pub type MigrationEdge = (u32, u32);

// Legacy keys found in `unsupported_settings`
const K_WINE_BINARY: &str = "wine_binary";
const K_DLL_OVERRIDES: &str = "dll_overrides";
const K_ENV: &str = "env";
const MESA_OVERRIDE_VAR: &str = "MESA_GL_VERSION_OVERRIDE";
const WINEDEBUG_VAR: &str = "WINEDEBUG";

#[derive(Default)]
pub struct MigrationRegistry {
    edges: HashMap<MigrationEdge, MigrationFn>,
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut edges: Vec<_> = self.edges.keys().collect();
        edges.sort();
        f.debug_struct("MigrationRegistry").field("edges", &edges).finish()
    }
}

impl MigrationRegistry {
    /// Registry without any edges
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding every edge the application ships with
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        // Edges between 0 and 1 only log; running them shows the machinery works
        registry.register(0, 1, |_| {
            info!("Migration one application");
            None
        });
        registry.register(1, 0, |_| {
            info!("Migration one undo");
            None
        });
        registry.register(1, 2, upgrade_to_prefixes);
        registry.register(2, 1, downgrade_from_prefixes);
        registry.register(2, 3, |_| None);
        registry.register(3, 2, |_| None);
        registry
    }

    pub fn register<F>(&mut self, from: u32, to: u32, transform: F)
    where
        F: Fn(&mut SettingsDocument) -> Option<SettingsDocument> + Send + Sync + 'static,
    {
        self.edges.insert((from, to), Box::new(transform));
    }

    pub fn get(&self, edge: MigrationEdge) -> Option<&MigrationFn> {
        self.edges.get(&edge)
    }

    pub fn contains(&self, edge: MigrationEdge) -> bool {
        self.edges.contains_key(&edge)
    }
}

/// Version 1 had a single implicit prefix configured through root-level settings.
/// Build the player and studio prefixes from whatever of that survived.
fn upgrade_to_prefixes(doc: &mut SettingsDocument) -> Option<SettingsDocument> {
    if !doc.wineprefixes.is_empty() {
        return None;
    }

    let legacy = &doc.unsupported_settings;
    let mut created = Vec::with_capacity(2);

    for mut prefix in [player_prefix_model(), studio_prefix_model()] {
        if let Some(home) = legacy
            .get(K_WINE_BINARY)
            .and_then(Value::as_str)
            .and_then(wine_home_from_binary)
        {
            prefix.wine_home = home;
        }

        if let Some(overrides) = legacy.get(K_DLL_OVERRIDES).and_then(Value::as_str) {
            prefix.dll_overrides = overrides.to_string();
        }

        let mut env: std::collections::BTreeMap<String, String> = legacy
            .get(K_ENV)
            .and_then(Value::as_object)
            .map(|object| {
                object
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        if env.get(MESA_OVERRIDE_VAR).map(String::as_str) == Some(wine::MESA_GL_VERSION) {
            prefix.use_mesa_gl_override = true;
            env.remove(MESA_OVERRIDE_VAR);
        }

        if let Some(debug) = env.remove(WINEDEBUG_VAR) {
            prefix.enable_winedebug = true;
            prefix.winedebug_string = debug;
        }

        prefix.env = env;
        prefix.third_party.clear();
        prefix.set_third_party(dxvk::THIRD_PARTY_KEY, false);

        info!(prefix = %prefix.display_name, "Created prefix from legacy settings");
        created.push(prefix);
    }

    doc.wineprefixes.extend(created);
    None
}

/// Copies the first prefix's environment back to where version 1 kept it
fn downgrade_from_prefixes(doc: &mut SettingsDocument) -> Option<SettingsDocument> {
    let first = doc.wineprefixes.first()?;
    let env: serde_json::Map<String, Value> = first
        .env
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    doc.unsupported_settings.insert(K_ENV.to_string(), Value::Object(env));
    None
}

/// Runtime home for a legacy `wine_binary` path: `<home>/bin/wine`
fn wine_home_from_binary(binary: &str) -> Option<String> {
    if binary.is_empty() {
        return None;
    }

    let path = Path::new(binary);
    if path.file_name().and_then(|n| n.to_str()) != Some("wine") {
        warn!(binary = %binary, "Could not migrate Wine binary because its name is not 'wine'");
        return None;
    }

    let bin_dir = path.parent()?;
    if bin_dir.file_name().and_then(|n| n.to_str()) != Some("bin") {
        warn!(binary = %binary, "Could not migrate Wine binary because it's not in a folder named 'bin'");
        return None;
    }

    bin_dir.parent().map(|home| home.display().to_string())
}
