//! Runtime home selection
//!
//! A runtime home is a Wine installation root holding `bin/wine`. Prefixes may pin
//! their own, fall back to the global default, and finally to whatever is installed on
//! the system.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{error, info, warn};

use crate::constants::wine::STATIC_HOMES;
use crate::errors::{PresentableError, ResolveError};

/// Expands a leading `~/`; other paths are taken as-is
pub fn expand_home(home: &str) -> PathBuf {
    match (home.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(user_home)) => user_home.join(rest),
        _ => PathBuf::from(home),
    }
}

/// Checks that `home` looks like a runtime installation root
pub fn validate_runtime_home(home: &Path) -> Result<(), PresentableError> {
    if !home.is_absolute() {
        return Err(PresentableError::runtime_home_invalid(
            home,
            "The Wine home must be an absolute path which starts with '~' or '/'",
        ));
    }

    if !home.exists() {
        return Err(PresentableError::runtime_home_invalid(home, "The Wine home doesn't exist"));
    }

    if !home.is_dir() {
        let points_at_binary = home
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("wine"))
            && home.parent().and_then(Path::file_name).and_then(|n| n.to_str()) == Some("bin");

        if let (true, Some(root)) = (points_at_binary, home.parent().and_then(Path::parent)) {
            return Err(PresentableError::runtime_home_invalid(
                home,
                format!(
                    "The Wine home appears to be pointing at the Wine binary. However, the Wine home \
                     should be a directory with 'bin/wine'. Consider changing the Wine home to '{}'",
                    root.display()
                ),
            ));
        }

        return Err(PresentableError::runtime_home_invalid(home, "The Wine home must be a directory"));
    }

    let bin = home.join("bin");
    if !bin.exists() {
        return Err(PresentableError::runtime_home_invalid(
            home,
            format!("The Wine home must contain a 'bin' directory at '{}'", bin.display()),
        ));
    }

    if !bin.is_dir() {
        return Err(PresentableError::runtime_home_invalid(
            home,
            format!("'{}' must be a directory", bin.display()),
        ));
    }

    Ok(())
}

/// Finds an installed runtime on `PATH`, then in the well-known `/opt` locations
pub fn find_system_runtime_home(path_var: &str) -> Result<PathBuf, ResolveError> {
    let static_homes: Vec<&Path> = STATIC_HOMES.iter().map(Path::new).collect();
    find_runtime_home_in(path_var, &static_homes)
}

fn find_runtime_home_in(path_var: &str, static_homes: &[&Path]) -> Result<PathBuf, ResolveError> {
    for bin_dir in path_var.split(':').filter(|s| !s.is_empty()).map(Path::new) {
        let has_both = bin_dir.join("wine").is_file() && bin_dir.join("wine64").is_file();
        if let (true, Some(home)) = (has_both, bin_dir.parent()) {
            if home.is_dir() {
                return Ok(home.to_path_buf());
            }
        }
    }

    static_homes
        .iter()
        .find(|home| home.is_dir() && home.join("bin").join("wine").is_file())
        .map(|home| home.to_path_buf())
        .ok_or(ResolveError::SystemRuntimeNotFound)
}

/// Picks the runtime home for a prefix
///
/// The first non-empty of `prefix_home` and `default_home` wins; with neither set, the
/// system installation is used. An invalid configured home falls back to the system one;
/// an invalid system home is an error.
pub fn resolve_runtime_home(prefix_home: &str, default_home: &str, path_var: &str) -> Result<PathBuf> {
    resolve_with(prefix_home, default_home, || find_system_runtime_home(path_var))
}

fn resolve_with<F>(prefix_home: &str, default_home: &str, system_home: F) -> Result<PathBuf>
where
    F: Fn() -> Result<PathBuf, ResolveError>,
{
    let system = || {
        system_home()
            .map_err(|e| anyhow::Error::new(PresentableError::system_runtime_missing().with_cause(e)))
    };

    let configured = [prefix_home.trim(), default_home.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .map(expand_home);

    let home = match configured {
        Some(home) => home,
        None => system()?,
    };

    match validate_runtime_home(&home) {
        Ok(()) => {
            info!(home = %home.display(), "Using Wine home");
            Ok(home)
        }
        Err(invalid) => {
            error!(error = %invalid, "Wine home is invalid");
            warn!("Switching to system Wine home");

            let fallback = system()?;
            if fallback == home {
                error!("System Wine home is invalid");
                return Err(invalid.into());
            }

            validate_runtime_home(&fallback)?;
            info!(home = %fallback.display(), "Using Wine home");
            Ok(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::find_presentable;
    use std::fs;
    use tempfile::TempDir;

    fn fake_runtime(root: &Path, with_wine64: bool) -> PathBuf {
        let bin = root.join("bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("wine"), "").unwrap();
        if with_wine64 {
            fs::write(bin.join("wine64"), "").unwrap();
        }
        root.to_path_buf()
    }

    #[test]
    fn test_validate_rejects_relative_and_missing() {
        assert!(validate_runtime_home(Path::new("relative/wine")).is_err());
        assert!(validate_runtime_home(Path::new("/nonexistent/wine-home")).is_err());
    }

    #[test]
    fn test_validate_hints_at_grandparent_for_binary() {
        let dir = TempDir::new().unwrap();
        let home = fake_runtime(&dir.path().join("wine"), true);

        let err = validate_runtime_home(&home.join("bin").join("wine")).unwrap_err();
        assert!(err.description.contains(&home.display().to_string()));
        assert!(err.description.contains("pointing at the Wine binary"));
    }

    #[test]
    fn test_validate_requires_bin_directory() {
        let dir = TempDir::new().unwrap();
        assert!(validate_runtime_home(dir.path()).is_err());

        fake_runtime(dir.path(), false);
        assert!(validate_runtime_home(dir.path()).is_ok());
    }

    #[test]
    fn test_system_home_needs_both_loaders_on_path() {
        let dir = TempDir::new().unwrap();
        let only32 = fake_runtime(&dir.path().join("only32"), false);
        let both = fake_runtime(&dir.path().join("both"), true);

        let path_var = format!("{}:{}", only32.join("bin").display(), both.join("bin").display());
        assert_eq!(find_runtime_home_in(&path_var, &[]).unwrap(), both);
    }

    #[test]
    fn test_system_home_static_fallback() {
        let dir = TempDir::new().unwrap();
        let staging = fake_runtime(&dir.path().join("wine-staging"), false);
        let missing = dir.path().join("wine-stable");

        let found = find_runtime_home_in("", &[missing.as_path(), staging.as_path()]).unwrap();
        assert_eq!(found, staging);
        assert!(matches!(find_runtime_home_in("", &[]), Err(ResolveError::SystemRuntimeNotFound)));
    }

    #[test]
    fn test_prefix_home_wins_over_default() {
        let dir = TempDir::new().unwrap();
        let custom = fake_runtime(&dir.path().join("custom"), false);
        let default = fake_runtime(&dir.path().join("default"), false);

        let home = resolve_with(
            &custom.display().to_string(),
            &default.display().to_string(),
            || Err(ResolveError::SystemRuntimeNotFound),
        )
        .unwrap();
        assert_eq!(home, custom);

        let home = resolve_with("  ", &default.display().to_string(), || Err(ResolveError::SystemRuntimeNotFound))
            .unwrap();
        assert_eq!(home, default);
    }

    #[test]
    fn test_invalid_configured_home_falls_back_to_system() {
        let dir = TempDir::new().unwrap();
        let system = fake_runtime(&dir.path().join("system"), true);
        let system_clone = system.clone();

        let home = resolve_with("/nonexistent/wine", "", move || Ok(system_clone.clone())).unwrap();
        assert_eq!(home, system);
    }

    #[test]
    fn test_invalid_system_home_is_presentable() {
        let err = resolve_with("", "", || Ok(PathBuf::from("/nonexistent/system-wine"))).unwrap_err();
        let presentable = find_presentable(&err).unwrap();
        assert_eq!(presentable.title, "Wine home path is invalid");

        let err = resolve_with("", "", || Err(ResolveError::SystemRuntimeNotFound)).unwrap_err();
        assert_eq!(find_presentable(&err).unwrap().title, "Wine is not installed");
    }
}
