//! Running things inside a prefix
//!
//! [`Prefix`] ties a configuration to its directory, runtime home and the shared
//! [`PrefixContext`]. Everything that needs a Wine process (registry loads, installers,
//! `wineserver`, `winedbg`) goes through here.

use std::collections::HashMap;
use std::fs::{self, DirBuilder};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, error, info};

use super::home::resolve_runtime_home;
use super::paths::PrefixPaths;
use super::registry::safe_substitute;
use crate::config::PrefixConfiguration;
use crate::constants::{paths, registry};
use crate::environment::{BuildOptions, Environment, EnvironmentBuilder};
use crate::hardware::HardwareProfile;
use crate::process::{
    ExitCallback, ExitReport, LaunchRequest, ProcessHandle, ProcessRunner, ProcessSupervisor, RunMode,
};

static WINE_PROCESS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([a-f0-9]+)\s+(\d+).*'([\w.]+)'").expect("valid regex"));

/// Shared by every prefix of one session
#[derive(Debug, Clone)]
pub struct PrefixContext {
    /// Host environment snapshot the builder starts from
    pub host: Environment,
    pub hardware_profile: Option<HardwareProfile>,
    pub runner: ProcessRunner,
    /// Directory holding bundled `.reg` templates
    pub assets: PathBuf,
    /// Parent directory of every prefix
    pub prefixes_root: PathBuf,
    /// Global runtime home from the settings document
    pub default_wine_home: String,
}

impl PrefixContext {
    /// `$VINEPRESS_ASSETS`, else `<data dir>/vinepress/assets`
    pub fn default_assets_directory() -> PathBuf {
        if let Some(dir) = std::env::var_os(paths::ASSETS_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(dir);
        }
        data_directory().join(paths::ASSETS_DIR)
    }

    pub fn default_prefixes_directory() -> PathBuf {
        data_directory().join(paths::PREFIXES_DIR)
    }
}

fn data_directory() -> PathBuf {
    let mut dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push(paths::APP_DIR);
    dir
}

/// Knobs for [`Prefix::exe_request`]
#[derive(Debug, Clone, Default)]
pub struct ExeOptions {
    pub use_wine64: bool,
    pub accelerate_graphics: bool,
    /// Defaults to the executable's parent when it is given as a path
    pub working_directory: Option<PathBuf>,
}

impl ExeOptions {
    pub fn wine64() -> Self {
        Self {
            use_wine64: true,
            ..Self::default()
        }
    }

    pub fn accelerated() -> Self {
        Self {
            accelerate_graphics: true,
            ..Self::default()
        }
    }
}

/// One row of `winedbg --command "info proc"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WineProcess {
    pub pid: String,
    pub threads: u32,
    pub image: String,
}

/// `wineserver -k` did not exit cleanly
#[derive(Debug, Error)]
#[error("wineserver -k exited with code {code:?}")]
pub struct ServerKillError {
    pub code: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct Prefix {
    configuration: PrefixConfiguration,
    paths: PrefixPaths,
    runtime_home: PathBuf,
    context: PrefixContext,
}

impl Prefix {
    /// Resolves the runtime home and prefix directory for `configuration`
    pub fn open(configuration: PrefixConfiguration, context: &PrefixContext) -> Result<Self> {
        let path_var = context.host.get("PATH").map(String::as_str).unwrap_or_default();
        let runtime_home = resolve_runtime_home(&configuration.wine_home, &context.default_wine_home, path_var)?;
        let paths = PrefixPaths::new(context.prefixes_root.join(&configuration.name_on_disk));

        Ok(Self {
            configuration,
            paths,
            runtime_home,
            context: context.clone(),
        })
    }

    pub fn configuration(&self) -> &PrefixConfiguration {
        &self.configuration
    }

    /// Changes made here are not persisted until the caller saves the configuration
    pub fn configuration_mut(&mut self) -> &mut PrefixConfiguration {
        &mut self.configuration
    }

    pub fn paths(&self) -> &PrefixPaths {
        &self.paths
    }

    pub fn context(&self) -> &PrefixContext {
        &self.context
    }

    pub fn runtime_home(&self) -> &Path {
        &self.runtime_home
    }

    pub fn runtime_bin(&self) -> PathBuf {
        self.runtime_home.join("bin")
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.context.runner
    }

    fn runtime_tool(&self, name: &str) -> Result<PathBuf> {
        let path = self.runtime_bin().join(name);
        if !path.is_file() {
            bail!("Could not find {} at {:?}", name, path);
        }
        Ok(path)
    }

    pub fn wine_binary(&self, use_wine64: bool) -> Result<PathBuf> {
        self.runtime_tool(if use_wine64 { "wine64" } else { "wine" })
    }

    pub fn make_env(&self, accelerate_graphics: bool) -> Environment {
        let root = self.paths.base_directory();
        let bin = self.runtime_bin();
        EnvironmentBuilder::new(&self.configuration, root, &bin, &self.context.host)
            .with_hardware_profile(self.context.hardware_profile.as_ref())
            .build(BuildOptions::for_prefix(&self.configuration, accelerate_graphics))
    }

    /// Builds the request running `exe` through the Wine loader
    ///
    /// A bare name such as `regedit` is passed to Wine untouched; anything with a directory
    /// component is resolved and its parent becomes the default working directory.
    pub fn exe_request(&self, exe: &Path, args: &[String], options: ExeOptions) -> Result<LaunchRequest> {
        let parent = exe.parent().filter(|p| !p.as_os_str().is_empty());

        let exe_string = match parent {
            Some(_) => fs::canonicalize(exe).unwrap_or_else(|_| exe.to_path_buf()),
            None => exe.to_path_buf(),
        }
        .display()
        .to_string();
        debug!(exe = %exe_string, "Resolved exe path");

        let label = exe
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| exe_string.clone());

        let wine = self.wine_binary(options.use_wine64)?;
        let mut command = vec![wine.display().to_string(), exe_string];
        command.extend(args.iter().cloned());

        let mut request = LaunchRequest::new(command, label, self.make_env(options.accelerate_graphics));
        request.working_directory = options.working_directory.or_else(|| parent.map(Path::to_path_buf));
        Ok(request)
    }

    pub fn run_exe_sync(&self, exe: &Path, args: &[String], options: ExeOptions) -> Result<ExitReport> {
        let request = self.exe_request(exe, args, options)?;
        self.runner().run_sync(&request)
    }

    /// Launches through the supervisor; the handle is returned for async launches
    pub fn run_exe(
        &self,
        supervisor: &mut ProcessSupervisor,
        exe: &Path,
        args: &[String],
        options: ExeOptions,
        mode: RunMode,
        on_exit: Option<ExitCallback>,
    ) -> Result<Option<ProcessHandle>> {
        let request = self.exe_request(exe, args, options)?;
        supervisor.run(&request, mode, on_exit)
    }

    /// Runs a host program with the prefix environment
    pub fn run_linux_command(
        &self,
        command: &Path,
        args: &[String],
        working_directory: Option<&Path>,
    ) -> Result<ExitReport> {
        let label = command
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| command.display().to_string());

        let mut argv = vec![command.display().to_string()];
        argv.extend(args.iter().cloned());

        let mut request = LaunchRequest::new(argv, label, self.make_env(false));
        request.working_directory = working_directory.map(Path::to_path_buf);
        self.runner().run_sync(&request)
    }

    /// Imports a `.reg` file with both the 32- and 64-bit `regedit`
    pub fn load_registry_file(&self, registry_file: &Path) -> Result<()> {
        info!(file = %registry_file.display(), prefix = %self.configuration.display_name, "Loading registry file");
        let contents = fs::read_to_string(registry_file)
            .with_context(|| format!("Failed to read registry file {:?}", registry_file))?;
        self.import_registry(&contents)
    }

    /// Imports a `.reg` template after `$name` substitution
    pub fn load_patched_registry_file(&self, registry_file: &Path, patches: &HashMap<String, String>) -> Result<()> {
        info!(file = %registry_file.display(), patches = patches.len(), "Loading patched registry file");
        let template = fs::read_to_string(registry_file)
            .with_context(|| format!("Failed to read registry template {:?}", registry_file))?;
        self.import_registry(&safe_substitute(&template, patches))
    }

    fn import_registry(&self, contents: &str) -> Result<()> {
        let temp = self.paths.temp_directory();
        fs::create_dir_all(&temp).with_context(|| format!("Failed to create {:?}", temp))?;

        let filename = format!("{}.reg", Utc::now().timestamp());
        let target = temp.join(&filename);
        fs::write(&target, contents).with_context(|| format!("Failed to write {:?}", target))?;

        let args = vec!["/S".to_string(), format!(r"C:\windows\temp\{filename}")];
        let result = self
            .run_exe_sync(Path::new("regedit"), &args, ExeOptions::default())
            .and_then(|_| self.run_exe_sync(Path::new("regedit"), &args, ExeOptions::wine64()));

        fs::remove_file(&target).with_context(|| format!("Failed to remove {:?}", target))?;
        result.map(|_| ())
    }

    /// Makes the WebView2 install location read-only so installers skip it
    pub fn block_webview_installation(&self) -> Result<()> {
        let path = self.paths.program_files_x86_microsoft();
        if path.exists() {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let mut builder = DirBuilder::new();
        #[cfg(unix)]
        std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o400);
        builder
            .create(&path)
            .with_context(|| format!("Failed to create {:?}", path))?;

        info!(path = %path.display(), "Blocked WebView2 installation");
        Ok(())
    }

    pub fn unblock_webview_installation(&self) -> Result<()> {
        let path = self.paths.program_files_x86_microsoft();
        if !path.exists() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o777))
                .with_context(|| format!("Failed to unblock {:?}", path))?;
        }

        info!(path = %path.display(), "Unblocked WebView2 installation");
        Ok(())
    }

    pub fn disable_mime_associations(&self) -> Result<()> {
        self.load_registry_file(&self.context.assets.join(registry::DISABLE_MIME_ASSOC))
    }

    /// Replaces symlinks into the host home with plain directories
    pub fn sandbox(&self) -> Result<()> {
        let user_dir = self.paths.user_directory();
        if !user_dir.is_dir() {
            return Ok(());
        }

        let entries = fs::read_dir(&user_dir).with_context(|| format!("Failed to read {:?}", user_dir))?;
        for path in entries.flatten().map(|e| e.path()) {
            let is_symlink = fs::symlink_metadata(&path).map(|m| m.file_type().is_symlink()).unwrap_or(false);
            if !is_symlink {
                continue;
            }

            info!(path = %path.display(), "Sandboxing");
            fs::remove_file(&path).with_context(|| format!("Failed to remove symlink {:?}", path))?;
            fs::create_dir_all(&path).with_context(|| format!("Failed to create {:?}", path))?;
        }
        Ok(())
    }

    /// Applies the baseline configuration to a new prefix
    pub fn create_prefix(&self) -> Result<()> {
        info!(prefix = %self.configuration.display_name, path = %self.paths.base_directory().display(), "Creating prefix");
        self.disable_mime_associations()?;
        self.sandbox()
    }

    pub fn kill_runtime_server(&self) -> Result<()> {
        let server = self.runtime_tool("wineserver")?;
        info!(prefix = %self.configuration.display_name, "Killing wineserver");

        let status = Command::new(&server)
            .arg("-k")
            .env_clear()
            .envs(self.make_env(false))
            .status()
            .with_context(|| format!("Failed to run {:?}", server))?;

        if !status.success() {
            return Err(ServerKillError { code: status.code() }.into());
        }
        Ok(())
    }

    /// Processes running in the prefix; empty when `winedbg` fails
    pub fn process_list(&self) -> Result<Vec<WineProcess>> {
        let winedbg = self.runtime_tool("winedbg")?;

        let output = Command::new(&winedbg)
            .args(["--command", "info proc"])
            .env_clear()
            .envs(self.make_env(false))
            .output()
            .with_context(|| format!("Failed to run {:?}", winedbg))?;

        if !output.status.success() {
            error!(code = ?output.status.code(), "winedbg failed; assuming nothing is running");
            return Ok(Vec::new());
        }

        Ok(parse_process_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

pub fn parse_process_list(output: &str) -> Vec<WineProcess> {
    output
        .lines()
        .filter_map(|line| {
            let caps = WINE_PROCESS_LINE.captures(line.trim())?;
            Some(WineProcess {
                pid: caps[1].to_string(),
                threads: caps[2].parse().ok()?,
                image: caps[3].to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::process::LogDirectory;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Writes an executable shell script
    pub(crate) fn script(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// A runtime whose loaders append their arguments to `$WINEPREFIX/calls.log`
    ///
    /// `wineserver` logs to `$WINEPREFIX/server.log` and always reports an idle server.
    pub(crate) fn fake_runtime(root: &Path) -> PathBuf {
        let bin = root.join("bin");
        script(&bin.join("wine"), r#"mkdir -p "$WINEPREFIX"; printf '%s\n' "wine $*" >> "$WINEPREFIX/calls.log""#);
        script(&bin.join("wine64"), r#"mkdir -p "$WINEPREFIX"; printf '%s\n' "wine64 $*" >> "$WINEPREFIX/calls.log""#);
        script(&bin.join("wineserver"), r#"mkdir -p "$WINEPREFIX"; printf '%s\n' "wineserver $*" >> "$WINEPREFIX/server.log"; exit 1"#);
        script(
            &bin.join("winedbg"),
            "cat <<'EOF'\n \
             pid      threads  executable (all id:s are in hex)\n \
             00000038 3        'start.exe'\n \
             0000003c 12       \\_ 'RobloxPlayerBeta.exe'\n\
             EOF",
        );
        root.to_path_buf()
    }

    pub(crate) struct Fixture {
        pub dir: TempDir,
        pub prefix: Prefix,
    }

    impl Fixture {
        pub fn calls(&self) -> Vec<String> {
            fs::read_to_string(self.prefix.paths().base_directory().join("calls.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    pub(crate) fn fixture(configuration: PrefixConfiguration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let runtime = fake_runtime(&dir.path().join("runtime"));

        let context = PrefixContext {
            host: Environment::from([("PATH".to_string(), "/usr/bin:/bin".to_string())]),
            hardware_profile: None,
            runner: ProcessRunner::new(LogDirectory::new(dir.path().join("logs"))),
            assets: dir.path().join("assets"),
            prefixes_root: dir.path().join("prefixes"),
            default_wine_home: runtime.display().to_string(),
        };

        let prefix = Prefix::open(configuration, &context).unwrap();
        Fixture { dir, prefix }
    }

    #[test]
    fn test_exe_request_for_path_and_builtin() {
        let fx = fixture(PrefixConfiguration::new("Player", 0, vec![]));
        let exe_dir = fx.dir.path().join("Versions");
        fs::create_dir_all(&exe_dir).unwrap();
        fs::write(exe_dir.join("Launcher.exe"), "").unwrap();

        let request = fx
            .prefix
            .exe_request(&exe_dir.join("Launcher.exe"), &["-app".into()], ExeOptions::default())
            .unwrap();
        assert_eq!(request.label, "Launcher.exe");
        assert!(request.command[0].ends_with("bin/wine"));
        assert_eq!(request.command[2], "-app");
        assert_eq!(request.working_directory.as_deref(), Some(exe_dir.as_path()));

        let request = fx.prefix.exe_request(Path::new("regedit"), &[], ExeOptions::wine64()).unwrap();
        assert_eq!(request.command[1], "regedit");
        assert!(request.command[0].ends_with("bin/wine64"));
        assert!(request.working_directory.is_none());
        assert_eq!(request.env.get("WINEPREFIX").unwrap(), &fx.prefix.paths().base_directory().display().to_string());
    }

    #[test]
    fn test_load_registry_file_runs_both_loaders_and_cleans_up() {
        let fx = fixture(PrefixConfiguration::new("Player", 0, vec![]));
        let reg = fx.dir.path().join("patch.reg");
        fs::write(&reg, "REGEDIT4\n").unwrap();

        fx.prefix.load_registry_file(&reg).unwrap();

        let calls = fx.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with(r"wine regedit /S C:\windows\temp\"));
        assert!(calls[1].starts_with(r"wine64 regedit /S C:\windows\temp\"));

        let leftovers = fs::read_dir(fx.prefix.paths().temp_directory()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_loader_arguments_are_logged_verbatim() {
        let fx = fixture(PrefixConfiguration::new("Player", 0, vec![]));
        let args = vec![r"C:\temp\new".to_string()];

        fx.prefix.run_exe_sync(Path::new("cmd"), &args, ExeOptions::default()).unwrap();

        assert_eq!(fx.calls(), vec![r"wine cmd C:\temp\new".to_string()]);
    }

    #[test]
    fn test_patched_registry_file_is_substituted() {
        let fx = fixture(PrefixConfiguration::new("Player", 0, vec![]));
        let template = fx.dir.path().join("template.reg");
        fs::write(&template, "\"Path\"=\"$target\"\n").unwrap();

        // Capture the file before the loader deletes it
        script(
            &fx.prefix.runtime_bin().join("wine"),
            r#"cp "$WINEPREFIX/drive_c/windows/temp/"*.reg "$WINEPREFIX/../captured.reg""#,
        );

        let patches = HashMap::from([("target".to_string(), "C:\\x".to_string())]);
        fx.prefix.load_patched_registry_file(&template, &patches).unwrap();

        let captured = fs::read_to_string(fx.dir.path().join("prefixes").join("captured.reg")).unwrap();
        assert_eq!(captured, "\"Path\"=\"C:\\x\"\n");
    }

    #[test]
    fn test_webview_block_and_unblock() {
        let fx = fixture(PrefixConfiguration::new("Player", 0, vec![]));
        let path = fx.prefix.paths().program_files_x86_microsoft();

        fx.prefix.block_webview_installation().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o400);

        fx.prefix.unblock_webview_installation().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o777);
    }

    #[test]
    fn test_sandbox_replaces_symlinks() {
        let fx = fixture(PrefixConfiguration::new("Player", 0, vec![]));
        let user_dir = fx.prefix.paths().user_directory();
        fs::create_dir_all(&user_dir).unwrap();
        std::os::unix::fs::symlink(fx.dir.path(), user_dir.join("Documents")).unwrap();

        fx.prefix.sandbox().unwrap();

        let meta = fs::symlink_metadata(user_dir.join("Documents")).unwrap();
        assert!(meta.is_dir());
        assert!(!meta.file_type().is_symlink());
    }

    #[test]
    fn test_kill_runtime_server_reports_exit_code() {
        let fx = fixture(PrefixConfiguration::new("Player", 0, vec![]));
        let err = fx.prefix.kill_runtime_server().unwrap_err();
        assert_eq!(err.downcast_ref::<ServerKillError>().unwrap().code, Some(1));
    }

    #[test]
    fn test_process_list() {
        let fx = fixture(PrefixConfiguration::new("Player", 0, vec![]));
        let list = fx.prefix.process_list().unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list[0], WineProcess { pid: "00000038".into(), threads: 3, image: "start.exe".into() });
        assert_eq!(list[1].image, "RobloxPlayerBeta.exe");
    }

    #[test]
    fn test_parse_process_list_ignores_noise() {
        assert!(parse_process_list("no processes\n\n").is_empty());
    }
}
