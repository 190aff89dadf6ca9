//! Network access
//!
//! Downloads go through the [`Fetch`] trait so recipes can be exercised without a
//! network. [`HttpFetcher`] is the real implementation.

use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use tracing::{error, info};

use crate::constants::dxvk;

const USER_AGENT: &str = concat!("vinepress/", env!("CARGO_PKG_VERSION"));

static VERSION_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^v(.*)").expect("valid regex"));

/// Fetches the body of `url`; non-success statuses are errors
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Default, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        info!(url, "Downloading");
        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json, */*")
            .send()
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Download failed: {} (HTTP {})", url, status);
        }

        let bytes = response
            .bytes()
            .with_context(|| format!("Failed to read response body from {}", url))?;
        Ok(bytes.to_vec())
    }
}

/// A downloadable DXVK build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DxvkRelease {
    pub tag: String,
    pub version: String,
    pub download_url: String,
    pub from_github: bool,
}

impl Default for DxvkRelease {
    fn default() -> Self {
        Self {
            tag: "unknown_tag".to_string(),
            version: dxvk::FALLBACK_VERSION.to_string(),
            download_url: dxvk::FALLBACK_URL.to_string(),
            from_github: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    #[serde(default)]
    name: String,
    browser_download_url: String,
}

/// Latest DXVK release, or the pinned fallback when the API cannot be used
pub fn current_dxvk_release(fetcher: &dyn Fetch) -> DxvkRelease {
    match latest_dxvk_release(fetcher) {
        Ok(Some(release)) => release,
        Ok(None) => {
            error!("Latest DXVK release has no tarball; using fallback");
            DxvkRelease::default()
        }
        Err(e) => {
            error!(error = %e, "Could not query DXVK releases; using fallback");
            DxvkRelease::default()
        }
    }
}

fn latest_dxvk_release(fetcher: &dyn Fetch) -> Result<Option<DxvkRelease>> {
    let body = fetcher.fetch(dxvk::LATEST_RELEASE_API)?;
    let release: GitHubRelease = serde_json::from_slice(&body).context("Malformed release payload")?;

    let version = VERSION_TAG
        .captures(&release.tag_name)
        .map(|caps| caps[1].trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| dxvk::FALLBACK_VERSION.to_string());

    Ok(release
        .assets
        .into_iter()
        .find(|asset| asset.name.to_lowercase().ends_with(".tar.gz"))
        .map(|asset| DxvkRelease {
            tag: release.tag_name.clone(),
            version,
            download_url: asset.browser_download_url,
            from_github: true,
        }))
}
