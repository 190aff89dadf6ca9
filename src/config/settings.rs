//! Root settings document
//!
//! A single versioned JSON document holding global toggles, the hardware profile and
//! the ordered list of prefix configurations. Fields the document does not know about
//! are ignored on load so hand-edited files from other versions stay readable.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::prefix::PrefixConfiguration;
use crate::constants::settings::CURRENT_VERSION;
use crate::errors::SettingsError;
use crate::hardware::HardwareProfile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsDocument {
    /// Schema version of the document
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub hardware_profile: Option<HardwareProfile>,
    #[serde(default = "default_true")]
    pub show_fast_flag_warning: bool,
    /// Update channel of the manager itself
    #[serde(default = "default_release_channel")]
    pub release_channel: String,
    #[serde(default)]
    pub disable_updates: bool,
    /// One-way latch: cleared after a profiling failure
    #[serde(default = "default_true")]
    pub try_profiling_hardware: bool,
    #[serde(default)]
    pub default_wine_home: String,
    #[serde(default)]
    pub wineprefixes: Vec<PrefixConfiguration>,
    /// Settings of older schemas kept around for migrations
    #[serde(default)]
    pub unsupported_settings: Map<String, Value>,
    #[serde(default)]
    pub performed_first_time_setup: bool,
}

fn default_true() -> bool {
    true
}

fn default_release_channel() -> String {
    "master".to_string()
}

impl Default for SettingsDocument {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            hardware_profile: None,
            show_fast_flag_warning: true,
            release_channel: default_release_channel(),
            disable_updates: false,
            try_profiling_hardware: true,
            default_wine_home: String::new(),
            wineprefixes: Vec::new(),
            unsupported_settings: Map::new(),
            performed_first_time_setup: false,
        }
    }
}

impl SettingsDocument {
    /// Orders prefixes by ascending priority; missing priorities sort last
    ///
    /// The sort is stable so prefixes sharing a priority keep their relative order.
    pub fn sort_prefixes(&mut self) {
        self.wineprefixes.sort_by_key(PrefixConfiguration::sort_priority);
    }

    pub fn find_prefix(&self, id: &str) -> Option<&PrefixConfiguration> {
        self.wineprefixes.iter().find(|p| p.id == id)
    }

    pub fn find_prefix_mut(&mut self, id: &str) -> Option<&mut PrefixConfiguration> {
        self.wineprefixes.iter_mut().find(|p| p.id == id)
    }

    /// Adds a prefix; ids are unique across the document
    pub fn add_prefix(&mut self, prefix: PrefixConfiguration) -> Result<(), SettingsError> {
        if self.find_prefix(&prefix.id).is_some() {
            return Err(SettingsError::DuplicateId(prefix.id));
        }
        self.wineprefixes.push(prefix);
        Ok(())
    }

    /// Replaces the prefix with the same id, or appends it
    pub fn upsert_prefix(&mut self, prefix: PrefixConfiguration) {
        match self.find_prefix_mut(&prefix.id) {
            Some(existing) => *existing = prefix,
            None => self.wineprefixes.push(prefix),
        }
    }

    /// Checks invariants serde cannot express: prefix ids must be unique
    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut seen = HashSet::new();
        match self.wineprefixes.iter().find(|p| !seen.insert(p.id.as_str())) {
            Some(duplicate) => Err(SettingsError::DuplicateId(duplicate.id.clone())),
            None => Ok(()),
        }
    }
}

/// Renames legacy `__key__` entries to `key` in place
///
/// Returns whether any key was renamed.
pub(crate) fn strip_dunder_keys(object: &mut Map<String, Value>) -> bool {
    let dunder_keys: Vec<String> = object
        .keys()
        .filter(|k| k.len() > 4 && k.starts_with("__") && k.ends_with("__"))
        .cloned()
        .collect();

    for old_key in &dunder_keys {
        if let Some(value) = object.remove(old_key) {
            object.insert(old_key.trim_matches('_').to_string(), value);
        }
    }

    !dunder_keys.is_empty()
}
