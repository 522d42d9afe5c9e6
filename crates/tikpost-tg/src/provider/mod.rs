//! Strategies that turn a link into a deliverable media, and the manager
//! that drives them through the task executor.
mod manager;
mod snaptik;
mod ytdlp;

use crate::browser::Page;
use crate::proxy::ProxyRotator;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub(crate) use manager::*;
pub(crate) use snaptik::*;
pub(crate) use ytdlp::*;

/// Where the resolved media can be taken from
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MediaRef {
    /// Downloaded file. The consumer is responsible for deleting it.
    File(PathBuf),

    /// Direct link to the media
    Url(Url),
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => fmt::Display::fmt(&path.display(), f),
            Self::Url(url) => fmt::Display::fmt(url, f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum ResolveMode {
    /// Only find the direct link, don't download anything
    Info,
    Video,

    /// Download and transcode the audio track
    Audio,
}

pub(crate) struct ResolveRequest<'a> {
    pub(crate) url: &'a Url,
    pub(crate) mode: ResolveMode,

    /// Page of the browsing context isolated for the current task.
    /// Present only if the provider needs a browser.
    pub(crate) page: Option<&'a dyn Page>,
}

#[async_trait]
pub(crate) trait ResourceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the provider must be given a page to work with
    fn needs_browser(&self) -> bool;

    /// Returns `None` if the provider has nothing to offer for the link
    async fn resolve(&self, request: ResolveRequest<'_>) -> Result<Option<MediaRef>>;
}

#[derive(Debug, Error)]
pub(crate) enum ProviderError {
    #[error("Provider `{provider}` requires a browser page, but none was given")]
    MissingPage { provider: &'static str },

    #[error("Provider `{provider}` doesn't support the `{mode}` mode")]
    UnsupportedMode {
        provider: &'static str,
        mode: ResolveMode,
    },

    #[error("The site returned no download links for {url}")]
    NoResults { url: String },

    #[error("Neither results nor an error appeared on the page within {timeout:.2?}")]
    ResultsTimeout { timeout: Duration },

    #[error("Nothing was resolved for {url}")]
    NothingResolved { url: String },

    #[error("Unexpected response of the provider: {message}")]
    UnexpectedOutput { message: String },
}

impl ProviderError {
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            Self::NoResults { .. } | Self::ResultsTimeout { .. } => true,
            Self::MissingPage { .. }
            | Self::UnsupportedMode { .. }
            | Self::NothingResolved { .. }
            | Self::UnexpectedOutput { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub(crate) enum ProviderKind {
    /// Scrapes the snaptik.app website with a headless browser
    Snaptik,

    /// Runs the `yt-dlp` program
    #[default]
    YtDlp,
}

/// Loaded from `PROVIDER_*` env vars
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) kind: ProviderKind,
    pub(crate) max_parallel: usize,
    pub(crate) task_timeout_secs: u64,
    pub(crate) max_attempts: u32,
    pub(crate) retry_base_delay_secs: u64,
    pub(crate) screenshot_dir: PathBuf,
    pub(crate) download_dir: PathBuf,
    pub(crate) yt_dlp_path: String,

    /// Number of different proxies `yt-dlp` is tried with
    pub(crate) proxy_retries: u32,
    pub(crate) use_proxies: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            max_parallel: 3,
            task_timeout_secs: 600,
            max_attempts: 3,
            retry_base_delay_secs: 10,
            screenshot_dir: "error_screenshots".into(),
            download_dir: std::env::temp_dir().join("tikpost"),
            yt_dlp_path: "yt-dlp".to_owned(),
            proxy_retries: 3,
            use_proxies: true,
        }
    }
}

impl Config {
    pub(crate) fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Timeouts of the interactions with snaptik.app, loaded from `SNAPTIK_*` env vars
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct SnaptikConfig {
    pub(crate) site_url: Url,
    pub(crate) page_load_ms: u64,

    /// How long to wait for the "continue on the web" interstitial to show up
    pub(crate) continue_wait_ms: u64,
    pub(crate) continue_click_ms: u64,
    pub(crate) form_ms: u64,
    pub(crate) result_ms: u64,
}

impl Default for SnaptikConfig {
    fn default() -> Self {
        Self {
            site_url: Url::parse("https://snaptik.app/")
                .unwrap_or_else(|err| panic!("BUG: invalid snaptik URL: {err:#?}")),
            page_load_ms: 30_000,
            continue_wait_ms: 3_000,
            continue_click_ms: 5_000,
            form_ms: 10_000,
            result_ms: 30_000,
        }
    }
}

/// Builds the provider selected in the config
pub(crate) fn create_provider(
    config: &Config,
    snaptik: SnaptikConfig,
    proxies: Option<Arc<ProxyRotator>>,
) -> Arc<dyn ResourceProvider> {
    match config.kind {
        ProviderKind::Snaptik => {
            Arc::new(SnaptikProvider::new(snaptik, config.screenshot_dir.clone()))
        }
        ProviderKind::YtDlp => Arc::new(YtDlpProvider::new(YtDlpConfig {
            program: config.yt_dlp_path.clone(),
            download_dir: config.download_dir.clone(),
            proxy_retries: config.proxy_retries,
            proxies: proxies.filter(|_| config.use_proxies),
            stale_download_after: config.task_timeout() * 2,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_is_selected_by_config() {
        let config = Config {
            kind: ProviderKind::Snaptik,
            ..Default::default()
        };
        let provider = create_provider(&config, SnaptikConfig::default(), None);
        assert_eq!(provider.name(), "snaptik");
        assert!(provider.needs_browser());

        let provider = create_provider(&Config::default(), SnaptikConfig::default(), None);
        assert_eq!(provider.name(), "yt_dlp");
        assert!(!provider.needs_browser());
    }

    #[test]
    fn media_ref_display() {
        let file = MediaRef::File("/tmp/video1.mp4".into());
        assert_eq!(file.to_string(), "/tmp/video1.mp4");

        let url = MediaRef::Url("https://cdn.example.com/v.mp4".parse().unwrap());
        assert_eq!(url.to_string(), "https://cdn.example.com/v.mp4");
    }
}
