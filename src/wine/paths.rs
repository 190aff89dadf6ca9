//! Well-known locations inside a Wine prefix

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::ResolveError;

const VENDOR_ROOT: &str = "Vinepress";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixPaths {
    base: PathBuf,
}

impl PrefixPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_directory(&self) -> &Path {
        &self.base
    }

    pub fn present_on_disk(&self) -> bool {
        self.base.exists()
    }

    pub fn drive_c(&self) -> PathBuf {
        self.base.join("drive_c")
    }

    pub fn user_registry_hive(&self) -> PathBuf {
        self.base.join("user.reg")
    }

    pub fn system_registry_hive(&self) -> PathBuf {
        self.base.join("system.reg")
    }

    pub fn temp_directory(&self) -> PathBuf {
        self.drive_c().join("windows").join("temp")
    }

    pub fn user_directory(&self) -> PathBuf {
        self.drive_c().join("users").join(current_user_name())
    }

    pub fn program_files_x86(&self) -> PathBuf {
        self.drive_c().join("Program Files (x86)")
    }

    pub fn product_program_files(&self) -> PathBuf {
        self.program_files_x86().join("Roblox")
    }

    pub fn program_files_x86_microsoft(&self) -> PathBuf {
        self.program_files_x86().join("Microsoft")
    }

    /// Candidate application-data directories, newest Wine layout first
    pub fn possible_product_appdata(&self) -> [PathBuf; 2] {
        let user = self.user_directory();
        [
            user.join("AppData").join("Local").join("Roblox"),
            user.join("Local Settings").join("Application Data").join("Roblox"),
        ]
    }

    /// The first candidate that exists, else the preferred one
    pub fn product_appdata(&self) -> PathBuf {
        let [preferred, legacy] = self.possible_product_appdata();
        if !preferred.exists() && legacy.exists() {
            legacy
        } else {
            preferred
        }
    }

    pub fn vendor_directory(&self) -> PathBuf {
        self.drive_c().join(VENDOR_ROOT).join("Vendor")
    }

    pub fn dxvk_directory(&self) -> PathBuf {
        self.vendor_directory().join("DXVK")
    }

    pub fn edge_webview_directory(&self) -> PathBuf {
        self.vendor_directory().join("microsoft-edge-webview2")
    }

    pub fn windows(&self) -> Result<PathBuf, ResolveError> {
        find_dir_case_insensitive(&self.drive_c(), "windows")
    }

    pub fn system32(&self) -> Result<PathBuf, ResolveError> {
        find_dir_case_insensitive(&self.windows()?, "system32")
    }

    pub fn syswow64(&self) -> Result<PathBuf, ResolveError> {
        find_dir_case_insensitive(&self.windows()?, "syswow64")
    }
}

/// Directory entry of `parent` whose name matches `name` ignoring ASCII case
fn find_dir_case_insensitive(parent: &Path, name: &str) -> Result<PathBuf, ResolveError> {
    let not_found = || ResolveError::DirectoryNotFound {
        name: name.to_string(),
        parent: parent.to_path_buf(),
    };

    fs::read_dir(parent)
        .map_err(|_| not_found())?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .ok_or_else(not_found)
}

/// Login name Wine uses for the prefix's user directory
#[cfg(unix)]
pub fn current_user_name() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "user".to_string())
}

#[cfg(not(unix))]
pub fn current_user_name() -> String {
    std::env::var("USERNAME").unwrap_or_else(|_| "user".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_system_dirs_are_found_ignoring_case() {
        let dir = TempDir::new().unwrap();
        let paths = PrefixPaths::new(dir.path());
        fs::create_dir_all(paths.drive_c().join("Windows").join("System32")).unwrap();
        fs::create_dir_all(paths.drive_c().join("Windows").join("syswow64")).unwrap();

        assert!(paths.system32().unwrap().ends_with("Windows/System32"));
        assert!(paths.syswow64().unwrap().ends_with("Windows/syswow64"));
    }

    #[test]
    fn test_missing_windows_dir_is_resolve_error() {
        let dir = TempDir::new().unwrap();
        let paths = PrefixPaths::new(dir.path());
        assert!(matches!(paths.system32(), Err(ResolveError::DirectoryNotFound { .. })));
    }

    #[test]
    fn test_appdata_prefers_existing_legacy_location() {
        let dir = TempDir::new().unwrap();
        let paths = PrefixPaths::new(dir.path());
        let [preferred, legacy] = paths.possible_product_appdata();
        assert_eq!(paths.product_appdata(), preferred);

        fs::create_dir_all(&legacy).unwrap();
        assert_eq!(paths.product_appdata(), legacy);
    }

    #[test]
    fn test_vendor_layout() {
        let paths = PrefixPaths::new("/p");
        assert_eq!(paths.dxvk_directory(), PathBuf::from("/p/drive_c/Vinepress/Vendor/DXVK"));
        assert_eq!(paths.temp_directory(), PathBuf::from("/p/drive_c/windows/temp"));
    }
}
