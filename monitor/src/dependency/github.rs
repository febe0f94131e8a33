use super::{ReleaseSource, Version};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct Release {
    tag_name: String,
}

/// wakatime-cli releases published on GitHub.
pub struct GithubReleases {
    client: reqwest::Client,
    releases_url: String,
    download_url: String,
    user_agent: String,
}

impl GithubReleases {
    pub fn new(releases_url: &str, download_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .with_context(|| "Failed to build HTTP client")?;

        Ok(Self {
            client,
            releases_url: releases_url.to_string(),
            download_url: download_url.trim_end_matches('/').to_string(),
            user_agent: format!("wakawatcher/{}", env!("CARGO_PKG_VERSION")),
        })
    }
}

#[async_trait]
impl ReleaseSource for GithubReleases {
    async fn latest_version(&self) -> anyhow::Result<Version> {
        debug!("Requesting the latest wakatime-cli release at {}", self.releases_url);
        let release: Release = self
            .client
            .get(&self.releases_url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", self.releases_url))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| "Release response cannot be parsed")?;

        release.tag_name.parse()
    }

    async fn download(&self, version: &Version, asset: &str) -> anyhow::Result<Vec<u8>> {
        let url = format!("{}/{version}/{asset}.zip", self.download_url);
        info!("Downloading {url}");

        let bytes = self
            .client
            .get(&url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .with_context(|| format!("Failed to request {url}"))?
            .error_for_status()?
            .bytes()
            .await
            .with_context(|| format!("Failed to download {url}"))?;

        Ok(bytes.to_vec())
    }
}
