//! Text registry hives
//!
//! Wine stores its registry as text: a section header `[Key\\Path] <timestamp>` followed
//! by `"name"=value` lines. Only key lookup and attribute reads are needed here; writes go
//! through `regedit` with `.reg` patch files.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::{Captures, Regex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryKey {
    pub path: String,
    attributes: HashMap<String, String>,
}

impl RegistryKey {
    /// Raw value text of a named attribute, quotes included for strings
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryHive {
    keys: Vec<RegistryKey>,
}

impl RegistryHive {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read registry hive {:?}", path))?;
        Ok(Self::parse(&contents))
    }

    /// Loads the hive, treating a missing file as an empty hive
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(contents: &str) -> Self {
        let mut keys: Vec<RegistryKey> = Vec::new();

        for line in contents.lines() {
            let line = line.trim();

            if let Some(rest) = line.strip_prefix('[') {
                if let Some(end) = rest.find(']') {
                    keys.push(RegistryKey {
                        path: normalize_key_path(&rest[..end]),
                        attributes: HashMap::new(),
                    });
                }
                continue;
            }

            let Some(current) = keys.last_mut() else { continue };
            if let Some((name, value)) = parse_attribute(line) {
                current.attributes.insert(name, value.to_string());
            }
        }

        Self { keys }
    }

    /// Looks up a key ignoring case; both `\` and escaped `\\` separators are accepted
    pub fn find_key(&self, path: &str) -> Option<&RegistryKey> {
        let wanted = normalize_key_path(path).to_lowercase();
        self.keys.iter().find(|key| key.path.to_lowercase() == wanted)
    }

    pub fn has_key(&self, path: &str) -> bool {
        self.find_key(path).is_some()
    }
}

fn normalize_key_path(path: &str) -> String {
    path.replace("\\\\", "\\")
}

/// `"name"=value` or `@=value` (the default value)
fn parse_attribute(line: &str) -> Option<(String, &str)> {
    if let Some(value) = line.strip_prefix("@=") {
        return Some(("@".to_string(), value));
    }

    let rest = line.strip_prefix('"')?;
    let end = rest.find("\"=")?;
    Some((rest[..end].to_string(), &rest[end + 2..]))
}

/// Substitutes `$name` and `${name}` placeholders, leaving unknown ones untouched
///
/// `$$` renders a literal `$`.
pub fn safe_substitute(template: &str, patches: &HashMap<String, String>) -> String {
    let placeholder = Regex::new(r"\$(?:(\$)|([_a-zA-Z][_a-zA-Z0-9]*)|\{([_a-zA-Z][_a-zA-Z0-9]*)\})")
        .expect("valid regex");

    placeholder
        .replace_all(template, |caps: &Captures| {
            if caps.get(1).is_some() {
                return "$".to_string();
            }

            caps.get(2)
                .or_else(|| caps.get(3))
                .and_then(|name| patches.get(name.as_str()))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
