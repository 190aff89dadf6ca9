//! Installing and launching the managed products inside a prefix
//!
//! Launches are asynchronous: the child is handed to the [`ProcessSupervisor`] and the
//! caller gets its handle back. Before every launch the fast-flag files are rewritten and
//! the edge update service is brought in line with the prefix configuration.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::prefix::FastFlags;
use crate::constants::product::{
    APP_EXPERIENCE_URI, PLAYER_LAUNCHER, STUDIO_EXECUTABLE, STUDIO_LAUNCHER, TARGET_FPS_FLAG,
};
use crate::errors::ResolveError;
use crate::launch_uri::LaunchUri;
use crate::net::Fetch;
use crate::process::{ExitCallback, ProcessHandle, ProcessSupervisor, RunMode};
use crate::products::Product;
use crate::recipes::{Recipe, RecipeContext};
use crate::wine::{ExeOptions, Prefix, RegistryHive};

pub const INSTALLER_URL: &str = "https://www.roblox.com/download/client";

const VERSIONS_DIR: &str = "Versions";
const STUDIO_LOGIN_KEY: &str = r"Software\Roblox\RobloxStudioBrowser\roblox.com";
const STUDIO_LOGIN_COOKIE: &str = ".ROBLOSECURITY";

/// `ClientSettings/ClientAppSettings.json` next to an executable
fn app_settings_path(executable: &Path) -> PathBuf {
    executable
        .parent()
        .unwrap_or(Path::new(""))
        .join("ClientSettings")
        .join("ClientAppSettings.json")
}

fn existing_file(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}

pub struct ProductLauncher<'p> {
    prefix: &'p mut Prefix,
}

impl<'p> ProductLauncher<'p> {
    pub fn new(prefix: &'p mut Prefix) -> Self {
        Self { prefix }
    }

    pub fn prefix(&self) -> &Prefix {
        &*self.prefix
    }

    /// Every copy of `executable_name`, program files first
    pub fn locate_all_executables(&self, executable_name: &str) -> Vec<PathBuf> {
        let paths = self.prefix.paths();
        let program_files = paths.product_program_files();

        let mut found: Vec<PathBuf> = existing_file(program_files.join(VERSIONS_DIR).join(executable_name))
            .into_iter()
            .collect();

        for location in [paths.product_appdata(), program_files] {
            let versions = location.join(VERSIONS_DIR);
            if !versions.is_dir() {
                continue;
            }

            found.extend(existing_file(versions.join(executable_name)));

            let Ok(entries) = fs::read_dir(&versions) else { continue };
            let mut version_dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect();
            version_dirs.sort();
            found.extend(version_dirs.into_iter().filter_map(|dir| existing_file(dir.join(executable_name))));
        }

        let mut seen = BTreeSet::new();
        found.retain(|path| seen.insert(path.clone()));
        found
    }

    pub fn locate_executable(&self, executable_name: &str) -> Result<PathBuf, ResolveError> {
        self.locate_all_executables(executable_name).into_iter().next().ok_or_else(|| {
            warn!(executable = executable_name, "Failed to locate executable");
            ResolveError::ExecutableNotFound(executable_name.to_string())
        })
    }

    pub fn is_installed(&self) -> bool {
        !self.locate_all_executables(PLAYER_LAUNCHER).is_empty()
    }

    /// Where installers are placed: the first existing `Versions` directory
    pub fn versions_directory(&self) -> PathBuf {
        let paths = self.prefix.paths();
        let program_files = paths.product_program_files().join(VERSIONS_DIR);

        paths
            .possible_product_appdata()
            .into_iter()
            .map(|p| p.join(VERSIONS_DIR))
            .chain(std::iter::once(program_files.clone()))
            .find(|p| p.exists())
            .unwrap_or(program_files)
    }

    /// Settings files next to every copy of `executable_name`
    pub fn app_settings_paths(&self, executable_name: &str) -> Vec<PathBuf> {
        let unique: BTreeSet<PathBuf> = self
            .locate_all_executables(executable_name)
            .iter()
            .map(|exe| app_settings_path(exe))
            .collect();
        unique.into_iter().collect()
    }

    /// Pins the URI to the prefix's release channel unless that is the main one
    pub fn rewrite_uri(&self, uri: &str) -> String {
        let channel = self.prefix.configuration().roblox_release_channel;
        let mut parsed = LaunchUri::parse(uri);

        if !channel.is_main() {
            info!(channel = %channel, "Updating launch URI to use release channel");
            parsed.set_channel(channel);
        }
        parsed.as_string()
    }

    /// Configured flags plus the renderer preference and frame-rate target
    pub fn product_flags(&self, product: Product) -> FastFlags {
        let config = self.prefix.configuration();
        let mut flags = config.fast_flags.get(product.as_str()).cloned().unwrap_or_default();

        if let Some(flag) = config.roblox_renderer.prefer_flag() {
            flags.insert(flag.to_string(), Value::Bool(true));
        }

        if config.roblox_set_target_fps {
            flags.insert(TARGET_FPS_FLAG.to_string(), Value::from(config.roblox_scheduler_target_fps));
        }

        flags
    }

    /// Writes the product's flags to every path; nothing is written without flags
    pub fn write_flags(&self, product: Product, settings_paths: &[PathBuf]) -> Result<()> {
        let flags = self.product_flags(product);
        if flags.is_empty() {
            debug!(product = %product, "No fast flags to write");
            return Ok(());
        }

        let json = serde_json::to_string_pretty(&flags).context("Failed to serialize fast flags")?;
        for path in settings_paths {
            info!(product = %product, path = %path.display(), "Writing fast flags");
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
            }
            fs::write(path, &json).with_context(|| format!("Failed to write fast flags to {:?}", path))?;
        }
        Ok(())
    }

    /// Brings the edge update service in line with the configuration; failures only log
    fn prepare_launch(&mut self, ctx: RecipeContext<'_>) {
        let recipe = Recipe::edge_update_for(self.prefix.configuration().disable_edge_update);
        if let Err(e) = recipe.ensure_in(self.prefix, ctx) {
            error!(recipe = %recipe, error = %e, "Could not apply edge update recipe before launch");
        }
    }

    fn launch(&self, supervisor: &mut ProcessSupervisor, exe: &Path, args: Vec<String>) -> Result<ProcessHandle> {
        self.prefix
            .run_exe(supervisor, exe, &args, ExeOptions::accelerated(), RunMode::Async, None)?
            .context("Asynchronous launch returned no handle")
    }

    pub fn run_studio(
        &mut self,
        supervisor: &mut ProcessSupervisor,
        ctx: RecipeContext<'_>,
        uri: Option<&str>,
        ide: bool,
    ) -> Result<ProcessHandle> {
        let launcher = self.locate_executable(STUDIO_LAUNCHER)?;
        let uri = uri.map(|u| self.rewrite_uri(u));

        self.prepare_launch(ctx);
        self.write_flags(Product::Studio, &self.app_settings_paths(STUDIO_EXECUTABLE))?;

        let mut args = Vec::new();
        if ide {
            args.push("-ide".to_string());
        }
        args.extend(uri);
        self.launch(supervisor, &launcher, args)
    }

    pub fn run_player(
        &mut self,
        supervisor: &mut ProcessSupervisor,
        ctx: RecipeContext<'_>,
        uri: &str,
    ) -> Result<ProcessHandle> {
        let launcher = self.locate_executable(PLAYER_LAUNCHER)?;
        let uri = self.rewrite_uri(uri);
        let product = if uri == APP_EXPERIENCE_URI {
            Product::App
        } else {
            Product::Player
        };

        self.prepare_launch(ctx);
        self.write_flags(product, &self.app_settings_paths(PLAYER_LAUNCHER))?;
        self.launch(supervisor, &launcher, vec![uri])
    }

    pub fn launch_app(&mut self, supervisor: &mut ProcessSupervisor, ctx: RecipeContext<'_>) -> Result<ProcessHandle> {
        let launcher = self.locate_executable(PLAYER_LAUNCHER)?;

        self.prepare_launch(ctx);
        self.write_flags(Product::App, &self.app_settings_paths(PLAYER_LAUNCHER))?;

        let channel = self.prefix.configuration().roblox_release_channel;
        let mut args = Vec::new();
        if !channel.is_main() {
            args.extend(["-channel".to_string(), channel.as_str().to_string()]);
        }
        args.push("-app".to_string());
        self.launch(supervisor, &launcher, args)
    }

    /// Downloads a fresh installer into the versions directory
    pub fn download_installer(&self, fetcher: &dyn Fetch) -> Result<PathBuf> {
        let path = self.versions_directory().join(PLAYER_LAUNCHER);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let bytes = fetcher.fetch(INSTALLER_URL)?;
        fs::write(&path, bytes).with_context(|| format!("Failed to write installer to {:?}", path))?;

        if !self.is_installed() {
            warn!(path = %path.display(), "Installer was downloaded but the product is not detected");
        }
        Ok(path)
    }

    /// Sets up the prefix and runs the installer asynchronously
    pub fn install(
        &mut self,
        supervisor: &mut ProcessSupervisor,
        fetcher: &dyn Fetch,
        on_exit: Option<ExitCallback>,
    ) -> Result<ProcessHandle> {
        self.prefix.create_prefix()?;
        self.prefix.block_webview_installation()?;

        let installer = self.download_installer(fetcher)?;
        self.prefix
            .run_exe(supervisor, &installer, &[], ExeOptions::default(), RunMode::Async, on_exit)?
            .context("Asynchronous launch returned no handle")
    }

    /// Studio stores its session cookie in the user hive
    pub fn is_logged_into_studio(&self) -> bool {
        RegistryHive::load(&self.prefix.paths().user_registry_hive())
            .ok()
            .and_then(|hive| {
                hive.find_key(STUDIO_LOGIN_KEY)
                    .map(|key| key.get_attribute(STUDIO_LOGIN_COOKIE).is_some())
            })
            .unwrap_or(false)
    }
}
