//! DXVK install and uninstall
//!
//! Installing replaces Wine's Direct3D DLLs in `system32` (64-bit) and `syswow64`
//! (32-bit) with DXVK's, keeping each original next to it with a `.old` suffix.
//! A metadata file in the prefix's DXVK directory records the installed version.
//! Older installations were made by DXVK's own setup script; those are recognised by
//! a `setup_script` entry in the metadata together with backup files.

use std::collections::BTreeSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::constants::dxvk::{BACKUP_SUFFIX, METADATA_FILENAME};
use crate::errors::{PresentableError, RecipeError};
use crate::net::{Fetch, current_dxvk_release};
use crate::wine::Prefix;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DxvkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub is_installed: bool,
    /// Set by setup-script installations only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_script: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub fn metadata_path(prefix: &Prefix) -> PathBuf {
    prefix.paths().dxvk_directory().join(METADATA_FILENAME)
}

/// Unreadable metadata counts as absent
pub fn read_metadata(prefix: &Prefix) -> Option<DxvkMetadata> {
    let path = metadata_path(prefix);
    let contents = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable DXVK metadata");
            None
        }
    }
}

fn write_metadata(prefix: &Prefix, metadata: &DxvkMetadata) -> Result<()> {
    let path = metadata_path(prefix);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(metadata).context("Failed to serialize DXVK metadata")?;
    fs::write(&path, json).with_context(|| format!("Failed to write DXVK metadata to {:?}", path))
}

fn dll_names(prefix: &Prefix) -> BTreeSet<String> {
    prefix
        .configuration()
        .dxvk_overrides
        .iter()
        .map(|name| format!("{name}.dll"))
        .collect()
}

/// Backup paths in both system directories, whether or not they exist
fn backup_files(prefix: &Prefix) -> Vec<PathBuf> {
    let dirs: Vec<PathBuf> = [prefix.paths().system32(), prefix.paths().syswow64()]
        .into_iter()
        .flatten()
        .collect();
    let names = dll_names(prefix);

    dirs.iter()
        .flat_map(|dir| names.iter().map(move |name| dir.join(format!("{name}{BACKUP_SUFFIX}"))))
        .collect()
}

fn backups_present(prefix: &Prefix) -> bool {
    backup_files(prefix).iter().any(|path| path.exists())
}

pub fn is_installed(prefix: &Prefix) -> bool {
    read_metadata(prefix).is_some_and(|m| m.is_installed)
}

pub fn legacy_is_installed(prefix: &Prefix) -> bool {
    let metadata = read_metadata(prefix);
    let setup_script = metadata.as_ref().and_then(|m| m.setup_script.clone());
    let setup_script_exists = setup_script.as_deref().is_some_and(|s| Path::new(s).exists());
    let old_files_present = backups_present(prefix);

    info!(
        metadata_exists = metadata.is_some(),
        setup_script = ?setup_script,
        setup_script_exists,
        old_files_present,
        "DXVK status"
    );

    metadata.is_some() && old_files_present && setup_script_exists
}

pub(super) fn any_installation_present(prefix: &Prefix) -> bool {
    is_installed(prefix) || legacy_is_installed(prefix)
}

pub(super) fn no_installation_present(prefix: &Prefix) -> bool {
    !any_installation_present(prefix)
}

pub(super) fn system_directories_present(prefix: &Prefix) -> bool {
    prefix.paths().system32().is_ok() && prefix.paths().syswow64().is_ok()
}

/// Moves every `.old` backup back over the DXVK DLL
fn restore_backups(prefix: &Prefix) -> Result<()> {
    for backup in backup_files(prefix).into_iter().filter(|p| p.exists()) {
        let target = backup.with_extension("");
        info!(backup = %backup.display(), target = %target.display(), "Restoring Wine DLL");

        if target.exists() {
            fs::remove_file(&target).with_context(|| format!("Failed to remove {:?}", target))?;
        }
        fs::rename(&backup, &target).with_context(|| format!("Failed to restore {:?}", backup))?;
    }
    Ok(())
}

fn uninstall_legacy(prefix: &Prefix) -> Result<()> {
    info!("Uninstalling setup-script DXVK installation");

    match read_metadata(prefix).and_then(|m| m.setup_script) {
        Some(script) => {
            let script = PathBuf::from(script);
            info!(script = %script.display(), "Using DXVK setup script");
            prefix.run_linux_command(&script, &["uninstall".to_string()], script.parent())?;
        }
        None => info!("No DXVK setup script in metadata"),
    }

    restore_backups(prefix)
}

pub(super) fn uninstall(prefix: &mut Prefix) -> Result<(), RecipeError> {
    if legacy_is_installed(prefix) && !is_installed(prefix) {
        return Ok(uninstall_legacy(prefix)?);
    }

    restore_backups(prefix)?;

    let mut metadata = read_metadata(prefix).unwrap_or_default();
    metadata.is_installed = false;
    write_metadata(prefix, &metadata)?;
    Ok(())
}

pub(super) fn install(prefix: &mut Prefix, fetcher: &dyn Fetch) -> Result<(), RecipeError> {
    let release = current_dxvk_release(fetcher);
    info!(version = %release.version, url = %release.download_url, "Installing DXVK");

    let archive = fetcher.fetch(&release.download_url)?;
    let dxvk_dir = prefix.paths().dxvk_directory();
    fs::create_dir_all(&dxvk_dir).with_context(|| format!("Failed to create {:?}", dxvk_dir))?;

    tar::Archive::new(GzDecoder::new(Cursor::new(archive)))
        .unpack(&dxvk_dir)
        .with_context(|| format!("Failed to extract DXVK into {:?}", dxvk_dir))?;

    let versioned = dxvk_dir.join(format!("dxvk-{}", release.version));
    if !versioned.is_dir() {
        return Err(anyhow!("Extracted DXVK directory {:?} not found", versioned).into());
    }

    let system32 = prefix.paths().system32().map_err(anyhow::Error::from)?;
    let syswow64 = prefix.paths().syswow64().map_err(anyhow::Error::from)?;
    let mapping = [(versioned.join("x32"), syswow64), (versioned.join("x64"), system32)];

    let mut plan = Vec::new();
    for (source_dir, target_dir) in &mapping {
        plan.extend(dll_files(source_dir)?.into_iter().map(|dll| (dll, target_dir.clone())));
    }
    check_no_backups(&plan)?;

    let mut overrides = BTreeSet::new();
    for (dll, target_dir) in &plan {
        overrides.insert(install_dll(dll, target_dir)?);
    }

    prefix.configuration_mut().dxvk_overrides = overrides.into_iter().collect();
    write_metadata(
        prefix,
        &DxvkMetadata {
            version: Some(release.version),
            is_installed: true,
            ..DxvkMetadata::default()
        },
    )?;
    Ok(())
}

fn dll_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))?;
    let mut dlls: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e.eq_ignore_ascii_case("dll")))
        .collect();
    dlls.sort();
    Ok(dlls)
}

fn backup_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// A leftover backup means an earlier install or uninstall went wrong
fn check_no_backups(plan: &[(PathBuf, PathBuf)]) -> Result<(), PresentableError> {
    for (dll, target_dir) in plan {
        let Some(name) = dll.file_name() else { continue };
        let target = target_dir.join(name);
        let backup = backup_path(&target);
        if backup.exists() {
            return Err(PresentableError::backup_exists(&target, &backup));
        }
    }
    Ok(())
}

/// Backs up the Wine DLL and copies DXVK's over it; returns the override name
fn install_dll(dll: &Path, target_dir: &Path) -> Result<String> {
    let name = dll
        .file_name()
        .ok_or_else(|| anyhow!("DXVK file {:?} has no name", dll))?;
    let target = target_dir.join(name);
    let backup = backup_path(&target);
    info!(source = %dll.display(), target = %target.display(), "Installing DXVK file");

    if target.exists() {
        fs::rename(&target, &backup).with_context(|| format!("Failed to back up {:?}", target))?;
    }
    fs::copy(dll, &target).with_context(|| format!("Failed to copy {:?} to {:?}", dll, target))?;

    Ok(dll
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default())
}
