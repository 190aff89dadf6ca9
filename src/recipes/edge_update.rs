//! Edge update service registry recipes

use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info, warn};

use crate::constants::registry::{DELETE_EDGE_UPDATE, EDGE_ASSETS_DIR, EDGE_UPDATE_KEYS, RESTORE_EDGE_UPDATE};
use crate::errors::RecipeError;
use crate::wine::{Prefix, RegistryHive, ServerKillError};

/// Presence of each service key; `None` when the system hive cannot be read
fn service_keys(prefix: &Prefix) -> Option<[bool; 2]> {
    let path = prefix.paths().system_registry_hive();
    let hive = match RegistryHive::load(&path) {
        Ok(hive) => hive,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Could not load system hive");
            return None;
        }
    };

    let keys = EDGE_UPDATE_KEYS.map(|key| hive.has_key(key));
    info!(edgeupdate = keys[0], edgeupdatem = keys[1], "Edge update service keys");
    Some(keys)
}

pub(super) fn service_absent(prefix: &Prefix) -> bool {
    service_keys(prefix).is_none_or(|keys| keys.iter().all(|present| !present))
}

pub(super) fn service_present(prefix: &Prefix) -> bool {
    service_keys(prefix).is_some_and(|keys| keys.iter().all(|present| *present))
}

fn asset_paths(prefix: &Prefix, names: [&str; 2]) -> [PathBuf; 2] {
    let dir = prefix.context().assets.join(EDGE_ASSETS_DIR);
    names.map(|name| dir.join(name))
}

/// Loads the delete templates, then restarts wineserver so the services go away
pub(super) fn delete_service(prefix: &mut Prefix) -> Result<(), RecipeError> {
    info!(prefix = %prefix.configuration().display_name, "Deleting edge update service");
    for file in asset_paths(prefix, DELETE_EDGE_UPDATE) {
        prefix.load_registry_file(&file)?;
    }

    match prefix.kill_runtime_server() {
        Ok(()) => Ok(()),
        Err(e) if e.downcast_ref::<ServerKillError>().is_some_and(|k| k.code == Some(1)) => {
            warn!("wineserver was not running");
            Ok(())
        }
        Err(e) => Err(e.context("Failed to restart wineserver").into()),
    }
}

pub(super) fn restore_service(prefix: &mut Prefix) -> Result<(), RecipeError> {
    info!(prefix = %prefix.configuration().display_name, "Restoring edge update service");
    // Unlike disabling, restoring leaves the running wineserver alone
    for file in asset_paths(prefix, RESTORE_EDGE_UPDATE) {
        prefix
            .load_registry_file(&file)
            .with_context(|| format!("Failed to restore service from {:?}", file))?;
    }
    Ok(())
}
