//! Hardware profile collaborator
//!
//! The profile is produced by probing the system's graphics devices and stored in the
//! settings document. Consumers only need the GPU vendor and a fingerprint that tells
//! whether the graphics hardware changed since the last profile.

use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::settings::HARDWARE_PROFILE_VERSION;
use crate::errors::HardwareProfilingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    /// Schema version of the profile; a mismatch triggers re-profiling
    pub version: u32,
    pub gpu_vendor: GpuVendor,
    /// Stable identity of the installed graphics hardware
    pub graphics_id: String,
    #[serde(default)]
    pub provider_index: Option<i32>,
}

impl HardwareProfile {
    pub fn new(gpu_vendor: GpuVendor, graphics_id: impl Into<String>) -> Self {
        Self {
            version: HARDWARE_PROFILE_VERSION,
            gpu_vendor,
            graphics_id: graphics_id.into(),
            provider_index: None,
        }
    }
}

/// Source of hardware information
pub trait HardwareProber {
    /// Cheap fingerprint of the graphics hardware
    fn graphics_id(&self) -> Result<String, HardwareProfilingError>;

    /// Full profiling pass
    fn profile(&self) -> Result<HardwareProfile, HardwareProfilingError>;
}

/// Prober backed by `lspci`
#[derive(Debug, Default, Clone, Copy)]
pub struct LspciProber;

const GRAPHICS_CLASSES: [&str; 3] = ["VGA compatible controller", "3D controller", "Display controller"];

impl LspciProber {
    fn graphics_lines(&self) -> Result<Vec<String>, HardwareProfilingError> {
        let output = Command::new("lspci")
            .output()
            .map_err(|e| HardwareProfilingError(format!("failed to run lspci: {e}")))?;

        if !output.status.success() {
            return Err(HardwareProfilingError(format!(
                "lspci exited with {:?}",
                output.status.code()
            )));
        }

        let lines = parse_graphics_devices(&String::from_utf8_lossy(&output.stdout));
        if lines.is_empty() {
            return Err(HardwareProfilingError("no graphics devices reported by lspci".into()));
        }
        Ok(lines)
    }
}

impl HardwareProber for LspciProber {
    fn graphics_id(&self) -> Result<String, HardwareProfilingError> {
        Ok(self.graphics_lines()?.join("\n"))
    }

    fn profile(&self) -> Result<HardwareProfile, HardwareProfilingError> {
        let lines = self.graphics_lines()?;
        let vendor = detect_vendor(&lines);
        info!(vendor = ?vendor, devices = lines.len(), "Profiled graphics hardware");
        Ok(HardwareProfile::new(vendor, lines.join("\n")))
    }
}

/// Extracts the device description of every graphics-class line
fn parse_graphics_devices(lspci_output: &str) -> Vec<String> {
    lspci_output
        .lines()
        .filter_map(|line| {
            let class = GRAPHICS_CLASSES.iter().find(|class| line.contains(*class))?;
            let (_, device) = line.split_once(&format!("{class}: "))?;
            debug!(device = %device, "Found graphics device");
            Some(device.trim().to_string())
        })
        .collect()
}

/// NVIDIA wins on hybrid systems since it is the offload target
fn detect_vendor(devices: &[String]) -> GpuVendor {
    let has = |needle: &str| devices.iter().any(|d| d.contains(needle));

    if has("NVIDIA") {
        GpuVendor::Nvidia
    } else if has("AMD") || has("ATI") {
        GpuVendor::Amd
    } else if has("Intel") {
        GpuVendor::Intel
    } else {
        GpuVendor::Unknown
    }
}
