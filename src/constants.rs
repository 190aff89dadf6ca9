//! Application-wide constants
//!
//! This module contains the magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Names of the directories and files owned by the application
pub mod paths {
    /// Directory name used under the XDG config/data/state roots
    pub const APP_DIR: &str = "vinepress";

    /// Settings file name inside the config directory
    pub const SETTINGS_FILENAME: &str = "user_settings.json";

    /// Directory holding every managed prefix (under the data directory)
    pub const PREFIXES_DIR: &str = "prefixes";

    /// Directory holding per-run process logs (under the state directory)
    pub const LOGS_DIR: &str = "logs";

    /// Directory holding bundled `.reg` templates (under the data directory)
    pub const ASSETS_DIR: &str = "assets";

    /// Environment variable overriding the assets directory
    pub const ASSETS_ENV: &str = "VINEPRESS_ASSETS";
}

/// Wine runtime constants
pub mod wine {
    /// Architecture marker exported as WINEARCH
    pub const ARCH: &str = "win64";

    /// Separator between entries of WINEDLLOVERRIDES
    pub const DLL_OVERRIDE_SEP: &str = ";";

    /// Overrides applied to every prefix
    /// - dxdiagn: suppresses the DirectX 9 warning dialog
    /// - winemenubuilder: stops applications from creating desktop shortcuts
    pub const DEFAULT_DLL_OVERRIDES: [&str; 2] = ["dxdiagn=", "winemenubuilder.exe="];

    /// Suffix mapping a third-party DLL to the native implementation
    pub const NATIVE_DLL_MARKER: &str = "=n";

    /// WINEDEBUG value when debugging is off
    pub const DEBUG_DISABLE_ALL: &str = "-all";

    /// WINEDEBUG value when debugging is on without a custom channel string
    pub const DEBUG_ENABLE_ALL: &str = "+all";

    /// Value exported as MESA_GL_VERSION_OVERRIDE for legacy drivers
    pub const MESA_GL_VERSION: &str = "4.4";

    /// Runtime home directories probed when nothing is on PATH
    pub const STATIC_HOMES: [&str; 3] = ["/opt/wine-stable", "/opt/wine-devel", "/opt/wine-staging"];
}

/// Process supervision constants
pub mod process {
    /// Poll interval for asynchronously launched processes
    pub const POLL_INTERVAL_MS: u64 = 100;

    /// Longest the main loop sleeps while nothing is being polled
    pub const IDLE_WAIT_MS: u64 = 500;

    /// Timestamp format used in per-run log file names
    pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

    /// Extension shared by every per-run log file
    pub const LOG_EXTENSION: &str = "log";
}

/// Settings document constants
pub mod settings {
    /// Current schema version of the settings document
    pub const CURRENT_VERSION: u32 = 4;

    /// Sort key used for prefixes without a priority
    pub const MISSING_PRIORITY: i64 = 999;

    /// Current version of the hardware profile schema
    pub const HARDWARE_PROFILE_VERSION: u32 = 1;
}

/// Registry constants
pub mod registry {
    /// Service keys that must be absent for the edge update service to count as deleted
    pub const EDGE_UPDATE_KEYS: [&str; 2] = [
        r"System\CurrentControlSet\Services\edgeupdate",
        r"System\CurrentControlSet\Services\edgeupdatem",
    ];

    /// Assets subdirectory holding the edge update templates
    pub const EDGE_ASSETS_DIR: &str = "edge_webview";

    pub const DELETE_EDGE_UPDATE: [&str; 2] = [
        "delete_edgeupdate_service.reg",
        "delete_edgeupdatem_service.reg",
    ];

    pub const RESTORE_EDGE_UPDATE: [&str; 2] = ["edgeupdate_service.reg", "edgeupdatem_service.reg"];

    /// Template disabling MIME associations in a fresh prefix
    pub const DISABLE_MIME_ASSOC: &str = "disable_mime_assoc.reg";
}

/// DXVK installation constants
pub mod dxvk {
    /// GitHub API endpoint describing the latest release
    pub const LATEST_RELEASE_API: &str = "https://api.github.com/repos/doitsujin/dxvk/releases/latest";

    /// Release used when the API cannot be reached
    pub const FALLBACK_VERSION: &str = "1.9.2";
    pub const FALLBACK_URL: &str =
        "https://github.com/doitsujin/dxvk/releases/download/v1.9.2/dxvk-1.9.2.tar.gz";

    /// Side-car metadata file inside the prefix's DXVK directory
    pub const METADATA_FILENAME: &str = "vinepress_metadata.json";

    /// Suffix of backed-up Wine DLLs
    pub const BACKUP_SUFFIX: &str = ".old";

    /// Default set of DLLs replaced by DXVK
    pub const DEFAULT_OVERRIDES: [&str; 4] = ["d3d11", "d3d9", "dxgi", "d3d10core"];

    /// Key enabling DXVK in a prefix's third-party map
    pub const THIRD_PARTY_KEY: &str = "dxvk";
}

/// WebView2 installation constants
pub mod webview {
    pub const BOOTSTRAPPER_URL: &str = "https://go.microsoft.com/fwlink/p/?LinkId=2124703";
    pub const BOOTSTRAPPER_FILENAME: &str = "EvergreenBootstrapper.exe";
}

/// Managed application constants
pub mod product {
    pub const PLAYER_LAUNCHER: &str = "RobloxPlayerLauncher.exe";
    pub const STUDIO_LAUNCHER: &str = "RobloxStudioLauncherBeta.exe";
    pub const STUDIO_EXECUTABLE: &str = "RobloxStudioBeta.exe";

    /// URI that launches the desktop app instead of an experience
    pub const APP_EXPERIENCE_URI: &str =
        "roblox-player:+launchmode:app+robloxLocale:en_us+gameLocale:en_us+LaunchExp:InApp";

    /// Fast flag carrying the scheduler frame-rate target
    pub const TARGET_FPS_FLAG: &str = "DFIntTaskSchedulerTargetFps";
}
