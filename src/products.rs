//! Managed products, release channels, prefix hints and renderer preferences

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A launchable application managed inside a prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    #[serde(rename = "roblox_studio")]
    Studio,
    #[serde(rename = "roblox_player")]
    Player,
    #[serde(rename = "roblox_app")]
    App,
}

impl Product {
    pub const ALL: [Product; 3] = [Product::Player, Product::Studio, Product::App];

    pub fn as_str(&self) -> &'static str {
        match self {
            Product::Studio => "roblox_studio",
            Product::Player => "roblox_player",
            Product::App => "roblox_app",
        }
    }

    /// Launch priority: player first, app last
    fn priority(&self) -> u8 {
        match self {
            Product::Player => 0,
            Product::Studio => 1,
            Product::App => 2,
        }
    }

    /// Hint a prefix must carry to handle this product
    pub fn hint(&self) -> PrefixHint {
        match self {
            Product::Studio => PrefixHint::Studio,
            Product::Player => PrefixHint::Player,
            Product::App => PrefixHint::App,
        }
    }
}

impl PartialOrd for Product {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Product {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority().cmp(&other.priority())
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag on a prefix configuration selecting which products it handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrefixHint {
    #[serde(rename = "roblox_player")]
    Player,
    #[serde(rename = "roblox_studio")]
    Studio,
    #[serde(rename = "roblox_app")]
    App,
}

impl PrefixHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrefixHint::Player => "roblox_player",
            PrefixHint::Studio => "roblox_studio",
            PrefixHint::App => "roblox_app",
        }
    }
}

impl FromStr for PrefixHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "roblox_player" | "player" => Ok(PrefixHint::Player),
            "roblox_studio" | "studio" => Ok(PrefixHint::Studio),
            "roblox_app" | "app" => Ok(PrefixHint::App),
            other => Err(format!("unknown prefix hint '{other}'")),
        }
    }
}

/// Update track selecting which build of the application is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReleaseChannel {
    #[default]
    #[serde(rename = "live")]
    Live,
    #[serde(rename = "zlive")]
    ZLive,
    #[serde(rename = "zflag")]
    Flag,
    #[serde(rename = "znext")]
    Next,
    #[serde(rename = "zcanary")]
    Canary,
    #[serde(rename = "zintegration")]
    Integration,
    #[serde(rename = "zavatarteam")]
    AvatarTeam,
    #[serde(rename = "zsocialteam")]
    SocialTeam,
}

impl ReleaseChannel {
    /// The channel regular users are on
    pub const MAIN: ReleaseChannel = ReleaseChannel::Live;

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseChannel::Live => "live",
            ReleaseChannel::ZLive => "zlive",
            ReleaseChannel::Flag => "zflag",
            ReleaseChannel::Next => "znext",
            ReleaseChannel::Canary => "zcanary",
            ReleaseChannel::Integration => "zintegration",
            ReleaseChannel::AvatarTeam => "zavatarteam",
            ReleaseChannel::SocialTeam => "zsocialteam",
        }
    }

    pub fn is_main(&self) -> bool {
        *self == Self::MAIN
    }
}

impl FromStr for ReleaseChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let channel = match s.to_ascii_lowercase().as_str() {
            "live" => ReleaseChannel::Live,
            "zlive" => ReleaseChannel::ZLive,
            "zflag" => ReleaseChannel::Flag,
            "znext" => ReleaseChannel::Next,
            "zcanary" => ReleaseChannel::Canary,
            "zintegration" => ReleaseChannel::Integration,
            "zavatarteam" => ReleaseChannel::AvatarTeam,
            "zsocialteam" => ReleaseChannel::SocialTeam,
            other => return Err(format!("unknown release channel '{other}'")),
        };
        Ok(channel)
    }
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Graphics backend the application is asked to prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Renderer {
    #[default]
    Undetermined,
    Vulkan,
    OpenGL,
    D3D11,
    D3D11FL10,
}

impl Renderer {
    /// Fast flag that makes the application prefer this renderer
    pub fn prefer_flag(&self) -> Option<&'static str> {
        match self {
            Renderer::Undetermined => None,
            Renderer::Vulkan => Some("FFlagDebugGraphicsPreferVulkan"),
            Renderer::OpenGL => Some("FFlagDebugGraphicsPreferOpenGL"),
            Renderer::D3D11 => Some("FFlagDebugGraphicsPreferD3D11"),
            Renderer::D3D11FL10 => Some("FFlagDebugGraphicsPreferD3D11FL10"),
        }
    }
}
