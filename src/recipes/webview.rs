//! WebView2 runtime installation

use std::fs;

use anyhow::Context;
use tracing::info;

use crate::constants::webview::{BOOTSTRAPPER_FILENAME, BOOTSTRAPPER_URL};
use crate::errors::RecipeError;
use crate::net::Fetch;
use crate::wine::{ExeOptions, Prefix};

/// There is no reliable marker for an installed runtime, so installing always runs
pub(super) fn never_installed(_prefix: &Prefix) -> bool {
    false
}

pub(super) fn install(prefix: &mut Prefix, fetcher: &dyn Fetch) -> Result<(), RecipeError> {
    prefix.unblock_webview_installation()?;

    let download_dir = prefix.paths().edge_webview_directory();
    fs::create_dir_all(&download_dir).with_context(|| format!("Failed to create {:?}", download_dir))?;

    let installer = download_dir.join(BOOTSTRAPPER_FILENAME);
    let bytes = fetcher.fetch(BOOTSTRAPPER_URL)?;
    fs::write(&installer, bytes).with_context(|| format!("Failed to write {:?}", installer))?;

    info!(installer = %installer.display(), "Running WebView2 installer");
    prefix.run_exe_sync(&installer, &[], ExeOptions::default())?;
    Ok(())
}
