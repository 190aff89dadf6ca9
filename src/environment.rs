//! Environment builder
//!
//! Derives the complete environment for a process running inside a prefix. The builder
//! is pure: the host environment and hardware profile are passed in explicitly, and the
//! real process environment is never touched.
//!
//! Precedence, lowest first:
//! 1. the host environment (skipped when sanitizing)
//! 2. `WINEDLLOVERRIDES`, user variables, prefix root, architecture, PRIME and legacy variables
//! 3. host values for any key the user also declared (the host wins)
//! 4. `WINEDEBUG` when nothing set it yet, then `PATH`
//! 5. whitelisted host variables when sanitizing

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::PrefixConfiguration;
use crate::constants::wine;
use crate::hardware::{GpuVendor, HardwareProfile};

pub type Environment = BTreeMap<String, String>;

const PATH_SEP: &str = ":";

/// Snapshot of the current process environment
pub fn host_environment() -> Environment {
    std::env::vars().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Start from the host environment instead of an empty one
    pub inherit_os_env: bool,
    /// Add GPU offload variables from the hardware profile
    pub accelerate_graphics: bool,
}

impl BuildOptions {
    /// Options following the prefix's own sanitize policy
    pub fn for_prefix(configuration: &PrefixConfiguration, accelerate_graphics: bool) -> Self {
        Self {
            inherit_os_env: !configuration.sanitize_environment,
            accelerate_graphics,
        }
    }
}

pub struct EnvironmentBuilder<'a> {
    configuration: &'a PrefixConfiguration,
    prefix_root: &'a Path,
    runtime_bin: &'a Path,
    host: &'a Environment,
    hardware_profile: Option<&'a HardwareProfile>,
}

impl<'a> EnvironmentBuilder<'a> {
    pub fn new(
        configuration: &'a PrefixConfiguration,
        prefix_root: &'a Path,
        runtime_bin: &'a Path,
        host: &'a Environment,
    ) -> Self {
        Self {
            configuration,
            prefix_root,
            runtime_bin,
            host,
            hardware_profile: None,
        }
    }

    pub fn with_hardware_profile(mut self, profile: Option<&'a HardwareProfile>) -> Self {
        self.hardware_profile = profile;
        self
    }

    pub fn build(&self, options: BuildOptions) -> Environment {
        let config = self.configuration;

        let mut env = if options.inherit_os_env {
            self.host.clone()
        } else {
            Environment::new()
        };

        env.insert("WINEDLLOVERRIDES".into(), self.dll_overrides());
        env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.insert("WINEPREFIX".into(), self.prefix_root.display().to_string());
        env.insert("WINEARCH".into(), wine::ARCH.into());

        if options.accelerate_graphics {
            env.extend(self.prime_variables());
        }

        if config.use_mesa_gl_override {
            env.insert("MESA_GL_VERSION_OVERRIDE".into(), wine::MESA_GL_VERSION.into());
        }

        // Host values take priority over user-declared ones
        for (key, value) in &config.env {
            let value = self.host.get(key).unwrap_or(value);
            env.insert(key.clone(), value.clone());
        }

        // Wine produces huge logs unless told otherwise
        if !env.contains_key("WINEDEBUG") {
            env.insert("WINEDEBUG".into(), self.winedebug());
        }

        self.prepend_runtime_bin(&mut env);

        if !options.inherit_os_env {
            for key in &config.env_passthrough {
                if let Some(value) = self.host.get(key) {
                    env.insert(key.clone(), value.clone());
                }
            }
        }

        debug!(prefix = %config.display_name, vars = env.len(), "Built process environment");
        env
    }

    /// User overrides, then the fixed defaults, then native DXVK modules when enabled
    fn dll_overrides(&self) -> String {
        let config = self.configuration;
        let mut overrides: Vec<String> = config
            .dll_overrides
            .split(wine::DLL_OVERRIDE_SEP)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        overrides.extend(wine::DEFAULT_DLL_OVERRIDES.iter().map(|s| s.to_string()));

        if config.dxvk_enabled() {
            overrides.extend(
                config
                    .dxvk_overrides
                    .iter()
                    .map(|dll| format!("{dll}{}", wine::NATIVE_DLL_MARKER)),
            );
        }

        overrides.join(wine::DLL_OVERRIDE_SEP)
    }

    fn prime_variables(&self) -> Environment {
        let mut prime = Environment::new();

        let Some(profile) = self.hardware_profile else {
            warn!("No hardware profile available, skipping PRIME variables");
            return prime;
        };

        if self.configuration.prime_offload_sink >= 0 {
            let sink = self.configuration.prime_offload_sink.to_string();
            prime.insert("DRI_PRIME".into(), sink.clone());

            if profile.gpu_vendor == GpuVendor::Nvidia {
                prime.insert("__NV_PRIME_RENDER_OFFLOAD".into(), sink);
                prime.insert("__VK_LAYER_NV_optimus".into(), "NVIDIA_only".into());
                prime.insert("__GLX_VENDOR_LIBRARY_NAME".into(), "nvidia".into());
            }
        }

        info!(vars = ?prime, "PRIME environment variables");
        prime
    }

    fn winedebug(&self) -> String {
        let config = self.configuration;
        if !config.enable_winedebug {
            return wine::DEBUG_DISABLE_ALL.into();
        }

        match config.winedebug_string.trim() {
            "" => wine::DEBUG_ENABLE_ALL.into(),
            custom => custom.into(),
        }
    }

    fn prepend_runtime_bin(&self, env: &mut Environment) {
        let current = env
            .get("PATH")
            .filter(|p| !p.is_empty())
            .or_else(|| self.host.get("PATH"))
            .cloned()
            .unwrap_or_default();

        let bin = self.runtime_bin.display().to_string();
        let mut components: Vec<&str> = current.split(PATH_SEP).filter(|c| !c.is_empty()).collect();

        if !components.contains(&bin.as_str()) {
            components.insert(0, &bin);
            env.insert("PATH".into(), components.join(PATH_SEP));
        }
    }
}
