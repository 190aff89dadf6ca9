//! Per-prefix configuration
//!
//! A prefix configuration carries identity, environment overrides and runtime toggles
//! for one Wine prefix. The `id` never changes once created; every other field is
//! changed through [`PrefixConfiguration::apply_setting`], which accepts an enumerated
//! set of keys and rejects everything else.

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::dxvk;
use crate::errors::SettingsError;
use crate::products::{PrefixHint, ReleaseChannel, Renderer};

/// Host variables re-admitted into a sanitized environment
pub const DEFAULT_ENV_PASSTHROUGH: [&str; 13] = [
    "HOME",             // Required for MangoHud
    "DISPLAY",          // Xorg display
    "XAUTHORITY",       // Xorg session cookie, required for XWayland
    "WAYLAND_DISPLAY",
    "LANG",
    "TZ",
    "XDG_RUNTIME_DIR",  // Required for the Wine filesystem layer
    "XDG_SESSION_TYPE",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "LD_LIBRARY_PATH",
    "LD_PRELOAD",
    "MANGOHUD",
];

/// Fast flag values are plain JSON scalars
pub type FastFlags = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixConfiguration {
    pub id: String,
    /// Lower sorts first; missing priorities sort last
    #[serde(default)]
    pub priority: Option<i64>,
    pub name_on_disk: String,
    pub display_name: String,
    #[serde(default)]
    pub wine_home: String,
    /// User DLL overrides, `;`-separated
    #[serde(default)]
    pub dll_overrides: String,
    #[serde(default = "default_true")]
    pub disable_edge_update: bool,
    /// PRIME offload sink; negative disables offloading
    #[serde(default = "default_offload_sink")]
    pub prime_offload_sink: i32,
    #[serde(default)]
    pub use_mesa_gl_override: bool,
    #[serde(default)]
    pub enable_winedebug: bool,
    #[serde(default)]
    pub winedebug_string: String,
    #[serde(default)]
    pub roblox_release_channel: ReleaseChannel,
    #[serde(default)]
    pub roblox_renderer: Renderer,
    #[serde(default)]
    pub roblox_set_target_fps: bool,
    #[serde(default = "default_target_fps")]
    pub roblox_scheduler_target_fps: u32,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub sanitize_environment: bool,
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,
    #[serde(default)]
    pub hints: Vec<PrefixHint>,
    /// Product name -> flags written before launch
    #[serde(default)]
    pub fast_flags: HashMap<String, FastFlags>,
    /// Third-party feature toggles keyed by name (e.g. `dxvk`)
    #[serde(default)]
    pub third_party: BTreeMap<String, bool>,
    #[serde(default = "default_dxvk_overrides")]
    pub dxvk_overrides: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_offload_sink() -> i32 {
    -1
}

fn default_target_fps() -> u32 {
    144
}

fn default_env_passthrough() -> Vec<String> {
    DEFAULT_ENV_PASSTHROUGH.iter().map(|s| s.to_string()).collect()
}

pub(crate) fn default_dxvk_overrides() -> Vec<String> {
    dxvk::DEFAULT_OVERRIDES.iter().map(|s| s.to_string()).collect()
}

impl PrefixConfiguration {
    /// New configuration with a fresh id and a disk name derived from the display name
    pub fn new(display_name: impl Into<String>, priority: i64, hints: Vec<PrefixHint>) -> Self {
        let display_name = display_name.into();
        Self {
            id: Uuid::new_v4().to_string(),
            priority: Some(priority),
            name_on_disk: name_on_disk_from_display_name(&display_name),
            display_name,
            wine_home: String::new(),
            dll_overrides: String::new(),
            disable_edge_update: true,
            prime_offload_sink: default_offload_sink(),
            use_mesa_gl_override: false,
            enable_winedebug: false,
            winedebug_string: String::new(),
            roblox_release_channel: ReleaseChannel::default(),
            roblox_renderer: Renderer::default(),
            roblox_set_target_fps: false,
            roblox_scheduler_target_fps: default_target_fps(),
            env: BTreeMap::new(),
            sanitize_environment: false,
            env_passthrough: default_env_passthrough(),
            hints,
            fast_flags: HashMap::new(),
            third_party: BTreeMap::new(),
            dxvk_overrides: default_dxvk_overrides(),
        }
    }

    pub fn has_hint(&self, hint: PrefixHint) -> bool {
        self.hints.contains(&hint)
    }

    /// Whether a named third-party feature is switched on
    pub fn third_party_enabled(&self, key: &str) -> bool {
        self.third_party.get(key).copied().unwrap_or(false)
    }

    pub fn dxvk_enabled(&self) -> bool {
        self.third_party_enabled(dxvk::THIRD_PARTY_KEY)
    }

    /// Sort key used when ordering prefixes
    pub fn sort_priority(&self) -> i64 {
        self.priority.unwrap_or(crate::constants::settings::MISSING_PRIORITY)
    }

    /// Applies one field-level update from a JSON value
    ///
    /// Keys are the serialized field names. `id` is immutable and unknown keys are rejected.
    pub fn apply_setting(&mut self, key: &str, value: Value) -> Result<(), SettingsError> {
        match key {
            "id" => return Err(SettingsError::Immutable("id")),
            "priority" => self.priority = parse_value(key, value)?,
            "name_on_disk" => self.name_on_disk = parse_value(key, value)?,
            "display_name" => self.display_name = parse_value(key, value)?,
            "wine_home" => self.wine_home = parse_value(key, value)?,
            "dll_overrides" => self.dll_overrides = parse_value(key, value)?,
            "disable_edge_update" => self.disable_edge_update = parse_value(key, value)?,
            "prime_offload_sink" => self.prime_offload_sink = parse_value(key, value)?,
            "use_mesa_gl_override" => self.use_mesa_gl_override = parse_value(key, value)?,
            "enable_winedebug" => self.enable_winedebug = parse_value(key, value)?,
            "winedebug_string" => self.winedebug_string = parse_value(key, value)?,
            "roblox_release_channel" => self.roblox_release_channel = parse_value(key, value)?,
            "roblox_renderer" => self.roblox_renderer = parse_value(key, value)?,
            "roblox_set_target_fps" => self.roblox_set_target_fps = parse_value(key, value)?,
            "roblox_scheduler_target_fps" => self.roblox_scheduler_target_fps = parse_value(key, value)?,
            "env" => self.env = parse_value(key, value)?,
            "sanitize_environment" => self.sanitize_environment = parse_value(key, value)?,
            "env_passthrough" => self.env_passthrough = parse_value(key, value)?,
            "hints" => self.hints = parse_value(key, value)?,
            "fast_flags" => self.fast_flags = parse_value(key, value)?,
            "third_party" => self.third_party = parse_value(key, value)?,
            "dxvk_overrides" => self.dxvk_overrides = parse_value(key, value)?,
            unknown => return Err(SettingsError::UnknownKey(unknown.to_string())),
        }
        Ok(())
    }

    /// Toggles a single third-party feature
    pub fn set_third_party(&mut self, key: &str, enabled: bool) {
        self.third_party.insert(key.to_string(), enabled);
    }
}

/// Default configuration for the prefix running the player and the desktop app
pub fn player_prefix_model() -> PrefixConfiguration {
    PrefixConfiguration::new("Player", 0, vec![PrefixHint::Player, PrefixHint::App])
}

/// Default configuration for the prefix running Studio
pub fn studio_prefix_model() -> PrefixConfiguration {
    PrefixConfiguration::new("Studio", 1, vec![PrefixHint::Studio])
}

fn parse_value<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, SettingsError> {
    serde_json::from_value(value).map_err(|e| SettingsError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Lower-case, underscore-separated directory name for a display name
pub fn name_on_disk_from_display_name(display_name: &str) -> String {
    let ascii: String = display_name.chars().filter(char::is_ascii).collect();
    let trimmed = ascii.trim();

    let slash_ptn = Regex::new(r"\s+/\s+").expect("valid regex");
    let non_word_ptn = Regex::new(r"[/ \W]+").expect("valid regex");

    let s = slash_ptn.replace_all(trimmed, "_");
    let s = non_word_ptn.replace_all(&s, "_");
    s.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prefix() -> PrefixConfiguration {
        PrefixConfiguration::new("Player", 0, vec![PrefixHint::Player])
    }

    #[test]
    fn test_name_on_disk_from_display_name() {
        assert_eq!(name_on_disk_from_display_name("Player"), "player");
        assert_eq!(name_on_disk_from_display_name("  My Studio / Beta  "), "my_studio_beta");
        assert_eq!(name_on_disk_from_display_name("Caf\u{e9} Prefix!"), "caf_prefix_");
    }

    #[test]
    fn test_apply_setting_updates_typed_field() {
        let mut p = prefix();
        p.apply_setting("roblox_release_channel", json!("zcanary")).unwrap();
        p.apply_setting("sanitize_environment", json!(true)).unwrap();
        p.apply_setting("env", json!({"FOO": "bar"})).unwrap();

        assert_eq!(p.roblox_release_channel, ReleaseChannel::Canary);
        assert!(p.sanitize_environment);
        assert_eq!(p.env.get("FOO").map(String::as_str), Some("bar"));
    }

    #[test]
    fn test_apply_setting_rejects_unknown_key() {
        let mut p = prefix();
        let err = p.apply_setting("make_it_fast", json!(true)).unwrap_err();
        assert!(matches!(err, SettingsError::UnknownKey(k) if k == "make_it_fast"));
    }

    #[test]
    fn test_apply_setting_rejects_id_change() {
        let mut p = prefix();
        let id = p.id.clone();
        assert!(matches!(p.apply_setting("id", json!("other")), Err(SettingsError::Immutable("id"))));
        assert_eq!(p.id, id);
    }

    #[test]
    fn test_apply_setting_rejects_wrong_type() {
        let mut p = prefix();
        let err = p.apply_setting("prime_offload_sink", json!("one")).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { .. }));
    }

    #[test]
    fn test_minimal_json_fills_defaults() {
        let json = r#"{"id":"a","priority":3,"name_on_disk":"a","display_name":"A"}"#;
        let p: PrefixConfiguration = serde_json::from_str(json).unwrap();
        assert!(p.disable_edge_update);
        assert_eq!(p.prime_offload_sink, -1);
        assert_eq!(p.dxvk_overrides, default_dxvk_overrides());
        assert!(p.env_passthrough.iter().any(|v| v == "DISPLAY"));
        assert!(!p.dxvk_enabled());
    }
}
