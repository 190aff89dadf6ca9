//! Wine prefixes: locations, registry hives, runtime homes and process control

pub mod control;
pub mod home;
pub mod paths;
pub mod registry;

pub use control::{ExeOptions, Prefix, PrefixContext, ServerKillError, WineProcess};
pub use home::{find_system_runtime_home, resolve_runtime_home, validate_runtime_home};
pub use paths::PrefixPaths;
pub use registry::{RegistryHive, RegistryKey, safe_substitute};
