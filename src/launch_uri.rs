//! Structured view of `+`-separated launch URIs
//!
//! URIs look like `roblox-player:1+launchmode:play+channel:`. Every segment is kept in
//! its original order and remembers whether it ended in a bare `:`, so rendering a parsed
//! URI reproduces the input byte for byte.

use std::fmt;

use crate::products::ReleaseChannel;

const PART_SEP: char = '+';
const KEY_SEP: char = ':';
const CHANNEL_KEY: &str = "channel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriPart {
    pub key: String,
    pub value: String,
    /// Segment was written as `key:` with nothing after the colon
    ends_with_colon: bool,
}

impl UriPart {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ends_with_colon: false,
        }
    }

    fn parse(part: &str) -> Self {
        let (key, value) = part.split_once(KEY_SEP).unwrap_or((part, ""));
        Self {
            key: key.to_string(),
            value: value.to_string(),
            ends_with_colon: part.ends_with(KEY_SEP),
        }
    }

    fn write_to(&self, out: &mut String) {
        out.push_str(&self.key);
        if !self.value.is_empty() {
            out.push(KEY_SEP);
            out.push_str(&self.value);
        } else if self.ends_with_colon {
            out.push(KEY_SEP);
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct LaunchUri {
    parts: Vec<UriPart>,
}

impl LaunchUri {
    pub fn parse(uri: &str) -> Self {
        Self {
            parts: uri.split(PART_SEP).map(UriPart::parse).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&UriPart> {
        self.parts.iter().find(|part| part.key == key)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut UriPart> {
        self.parts.iter_mut().find(|part| part.key == key)
    }

    /// Key/value pairs in URI order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parts.iter().map(|part| (part.key.as_str(), part.value.as_str()))
    }

    /// Key of the first segment flagged with value `1` (e.g. `roblox-player`)
    pub fn product_string(&self) -> Option<&str> {
        self.entries().find(|(_, value)| *value == "1").map(|(key, _)| key)
    }

    /// Channel requested by the URI; missing or empty means the main channel
    pub fn channel(&self) -> ReleaseChannel {
        self.get(CHANNEL_KEY)
            .filter(|part| !part.value.is_empty())
            .and_then(|part| part.value.parse().ok())
            .unwrap_or(ReleaseChannel::MAIN)
    }

    /// Replaces the channel value in place, or appends a `channel` segment
    pub fn set_channel(&mut self, channel: ReleaseChannel) {
        match self.get_mut(CHANNEL_KEY) {
            Some(part) => part.value = channel.as_str().to_string(),
            None => self.parts.push(UriPart::new(CHANNEL_KEY, channel.as_str())),
        }
    }

    pub fn as_string(&self) -> String {
        let mut out = String::new();
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push(PART_SEP);
            }
            part.write_to(&mut out);
        }
        out
    }
}

impl fmt::Display for LaunchUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl fmt::Debug for LaunchUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LaunchUri({})", self.as_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLACE_LAUNCHER: &str = "placelauncherurl:https%3A%2F%2Fassetgame.roblox.com%2Fgame%2FPlaceLauncher.ashx%3Frequest%3DRequestGame%26browserTrackerId%23452345345%26placeId%45454545%26isPlayTogetherGame%3Dfalse%26joinAttemptId%ASOIDJASDOIJAIOSJD%26joinAttemptOrigin%3DPlayButton";

    fn launch_uri() -> String {
        format!(
            "roblox-player:1+launchmode:play+gameinfo:TEST_GAME_INFO+launchtime:1692294086755+{PLACE_LAUNCHER}+browsertrackerid:123123123123+robloxLocale:en_us+gameLocale:en_us+channel:"
        )
    }

    fn launch_uri_no_channel() -> String {
        format!(
            "roblox-player:1+launchmode:play+gameinfo:TEST_GAME_INFO+launchtime:1692294086755+{PLACE_LAUNCHER}+browsertrackerid:123123123123+robloxLocale:en_us+gameLocale:en_us"
        )
    }

    fn launch_uri_no_value() -> String {
        format!(
            "roblox-player:1+launchmode:play+gameinfo:TEST_GAME_INFO+launchtime:1692294086755+{PLACE_LAUNCHER}+browsertrackerid:+robloxLocale:en_us+gameLocale:en_us"
        )
    }

    const EDIT_CLOUD_GAME_URI: &str = "roblox-studio:1+launchmode:edit+launchtime:1693846676561+avatar+browsertrackerid:12736123+robloxLocale:en-US+gameLocale:en-US+channel:+browser:firefox+userId:12983712+distributorType:Global+task:EditPlace+placeId:283478234+universeId:12871237";

    #[test]
    fn test_perfect_reconstruction() {
        for uri in [
            launch_uri(),
            launch_uri_no_channel(),
            launch_uri_no_value(),
            EDIT_CLOUD_GAME_URI.to_string(),
        ] {
            assert_eq!(LaunchUri::parse(&uri).as_string(), uri);
        }
    }

    #[test]
    fn test_set_channel_replaces_existing_segment_in_place() {
        let original = launch_uri();
        let mut uri = LaunchUri::parse(&original);
        uri.set_channel(ReleaseChannel::Integration);

        let rendered = uri.as_string();
        assert_ne!(rendered, original);
        assert!(rendered.contains("zintegration"));
        assert!(rendered.ends_with("+channel:zintegration"));

        // Every other segment keeps its position
        let keys: Vec<_> = uri.entries().map(|(k, _)| k.to_string()).collect();
        let original_keys: Vec<_> = LaunchUri::parse(&original).entries().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, original_keys);
    }

    #[test]
    fn test_set_channel_appends_missing_segment() {
        let original = launch_uri_no_channel();
        let mut uri = LaunchUri::parse(&original);
        uri.set_channel(ReleaseChannel::Integration);

        let rendered = uri.as_string();
        assert_ne!(rendered, original);
        assert!(rendered.contains("zintegration"));
        assert!(rendered.to_lowercase().contains("+channel"));
        assert!(rendered.starts_with(&original));
    }

    #[test]
    fn test_key_without_value_renders() {
        let uri = LaunchUri::parse(&launch_uri_no_value());
        assert!(!uri.to_string().is_empty());
        assert_eq!(uri.get("browsertrackerid").map(|p| p.value.as_str()), Some(""));
    }

    #[test]
    fn test_empty_uri() {
        let uri = LaunchUri::parse("");
        assert_eq!(uri.to_string(), "");
        assert_eq!(format!("{uri:?}"), "LaunchUri()");
        assert_eq!(uri.channel(), ReleaseChannel::MAIN);
        assert!(uri.product_string().is_none());
    }

    #[test]
    fn test_product_string_and_channel() {
        let uri = LaunchUri::parse(EDIT_CLOUD_GAME_URI);
        assert_eq!(uri.product_string(), Some("roblox-studio"));
        assert_eq!(uri.channel(), ReleaseChannel::MAIN);

        let uri = LaunchUri::parse("roblox-player:1+channel:zcanary");
        assert_eq!(uri.channel(), ReleaseChannel::Canary);
    }
}
