use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use keeper_platform::Platform;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};

use crate::error::{EngineError, response_snippet};
use crate::version::{self, normalize_version};

const RELEASE_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

/// One release as published on the feed. Shared behind an `Arc` and never
/// mutated after decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    pub tag_name: String,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseDescriptor {
    /// The tag without its `v` prefix.
    #[must_use]
    pub fn version(&self) -> &str {
        normalize_version(&self.tag_name)
    }
}

/// Asset file name published for `platform`, e.g. `nadeko-linux-x64.tar.gz`.
#[must_use]
pub fn expected_asset_name(product: &str, platform: Platform) -> String {
    platform.asset_name(product)
}

/// Pick the asset built for `platform`, matching `{product}-{os}-{arch}{ext}`
/// exactly but ignoring ASCII case.
#[must_use]
pub fn select_asset<'a>(
    release: &'a ReleaseDescriptor,
    product: &str,
    platform: Platform,
) -> Option<&'a ReleaseAsset> {
    let expected = expected_asset_name(product, platform);
    release
        .assets
        .iter()
        .find(|asset| asset.name.eq_ignore_ascii_case(&expected))
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    /// Product base name; used for the `User-Agent` header and asset names.
    pub product: String,
}

impl FeedConfig {
    #[must_use]
    pub fn user_agent(&self) -> String {
        format!("{}-Updater", self.product)
    }
}

/// Owns the process-wide "latest release" and tells subscribers when a
/// different release shows up on the feed.
#[derive(Debug)]
pub struct ReleaseClient {
    http: reqwest::Client,
    feed: FeedConfig,
    latest: RwLock<Option<Arc<ReleaseDescriptor>>>,
    fetch_lock: Mutex<()>,
    events: broadcast::Sender<Arc<ReleaseDescriptor>>,
}

impl ReleaseClient {
    #[must_use]
    pub fn new(http: reqwest::Client, feed: FeedConfig) -> Self {
        let (events, _) = broadcast::channel(RELEASE_EVENT_CAPACITY);
        Self {
            http,
            feed,
            latest: RwLock::new(None),
            fetch_lock: Mutex::new(()),
            events,
        }
    }

    #[must_use]
    pub fn feed(&self) -> &FeedConfig {
        &self.feed
    }

    /// Receive every newly discovered release. Dropping the receiver
    /// unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ReleaseDescriptor>> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn latest(&self) -> Option<Arc<ReleaseDescriptor>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn latest_version(&self) -> Option<String> {
        self.latest().map(|release| release.version().to_string())
    }

    /// Whether an instance at `local` should be offered the cached release.
    /// Without a cached release only a missing install counts as updatable.
    #[must_use]
    pub fn is_update_available(&self, local: Option<&str>) -> bool {
        match (local, self.latest()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(local), Some(latest)) => {
                version::is_update_available(Some(local), &latest.tag_name)
            }
        }
    }

    /// Fetch the feed and refresh the cached release.
    ///
    /// # Errors
    /// Returns a network error when the request fails or the feed answers
    /// with a non-success status, and a decode error when the body is not a
    /// release object.
    pub async fn fetch_latest(&self) -> Result<Arc<ReleaseDescriptor>, EngineError> {
        let _guard = self.fetch_lock.lock().await;

        debug!("Fetching latest release from {}", self.feed.url);
        let response = self
            .http
            .get(&self.feed.url)
            .header(reqwest::header::USER_AGENT, self.feed.user_agent())
            .send()
            .await
            .map_err(|error| EngineError::http("release feed request failed", error))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_snippet = response
                .text()
                .await
                .ok()
                .map(|body| response_snippet(&body, 160))
                .unwrap_or_default();
            return Err(EngineError::HttpStatus {
                context: "release feed request",
                status,
                body_snippet,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|error| EngineError::http("failed to read release feed", error))?;
        let release: ReleaseDescriptor = serde_json::from_str(&body).map_err(EngineError::Decode)?;
        let release = Arc::new(release);

        let is_new = {
            let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
            let is_new = latest
                .as_ref()
                .is_none_or(|cached| cached.tag_name != release.tag_name);
            if is_new {
                *latest = Some(Arc::clone(&release));
            }
            is_new
        };

        if is_new {
            info!("New release found: {}", release.tag_name);
            let _ = self.events.send(Arc::clone(&release));
        } else {
            debug!("Release {} unchanged", release.tag_name);
        }

        Ok(release)
    }
}
