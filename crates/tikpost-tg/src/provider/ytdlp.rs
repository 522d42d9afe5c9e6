use super::{MediaRef, ProviderError, ResolveMode, ResolveRequest, ResourceProvider};
use crate::prelude::*;
use crate::proxy::ProxyRotator;
use crate::util::process;
use crate::{err, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use url::Url;

pub(crate) struct YtDlpConfig {
    pub(crate) program: String,
    pub(crate) download_dir: PathBuf,

    /// Number of attempts, each with a different proxy
    pub(crate) proxy_retries: u32,

    /// If `None`, `yt-dlp` is run without a proxy
    pub(crate) proxies: Option<Arc<ProxyRotator>>,

    /// Downloads older than this are considered abandoned and are removed.
    /// Must be longer than a task may run and its output wait to be sent.
    pub(crate) stale_download_after: Duration,
}

/// Resolves links by running the `yt-dlp` program
pub(crate) struct YtDlpProvider {
    config: YtDlpConfig,
}

/// The subset of `yt-dlp -j` output we care about
#[derive(Debug, Deserialize)]
struct VideoInfo {
    id: Option<String>,

    /// Direct link to the best format. It's absent if the best format
    /// consists of separate video and audio streams.
    url: Option<Url>,
}

impl YtDlpProvider {
    pub(crate) fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    async fn run(
        &self,
        mode: ResolveMode,
        url: &Url,
        proxy: Option<&Url>,
    ) -> Result<Option<MediaRef>> {
        let config = &self.config;
        let args = build_args(mode, url, &config.download_dir, proxy);

        if mode == ResolveMode::Info {
            let info: VideoInfo = process::run_json(&config.program, &args).await?;
            debug!(
                id = info.id.as_deref(),
                has_url = info.url.is_some(),
                "Fetched video info"
            );
            return Ok(info.url.map(MediaRef::Url));
        }

        fs_err::tokio::create_dir_all(&config.download_dir).await?;

        // Outputs of the downloads whose tasks timed out are never sent
        // and never removed by the consumer
        if let Some(removed) =
            remove_stale_downloads(&config.download_dir, config.stale_download_after)
                .await
                .warn_on_err("Failed to clean up the stale downloads")
        {
            if removed > 0 {
                info!(removed, "Removed stale downloads");
            }
        }

        let output = process::run_utf8(&config.program, &args).await?;

        // `--print after_move:filepath` outputs the final path of the file
        let path = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .ok_or_else(|| {
                err!(ProviderError::UnexpectedOutput {
                    message: "yt-dlp didn't print the path of the downloaded file",
                })
            })?;

        Ok(Some(MediaRef::File(path.into())))
    }
}

#[async_trait]
impl ResourceProvider for YtDlpProvider {
    fn name(&self) -> &'static str {
        "yt_dlp"
    }

    fn needs_browser(&self) -> bool {
        false
    }

    async fn resolve(&self, request: ResolveRequest<'_>) -> Result<Option<MediaRef>> {
        let ResolveRequest { url, mode, .. } = request;

        with_proxy_retries(
            self.config.proxies.as_deref(),
            self.config.proxy_retries,
            |proxy| async move { self.run(mode, url, proxy.as_ref()).await },
        )
        .instrument(info_span!("yt_dlp", %url, %mode))
        .await
    }
}

/// Runs `op` drawing a fresh proxy from the rotator for every attempt, since
/// a failure most likely means the previous proxy is burned. Without the
/// rotator there is only one attempt.
async fn with_proxy_retries<T, Fut>(
    proxies: Option<&ProxyRotator>,
    max_attempts: u32,
    mut op: impl FnMut(Option<Url>) -> Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let Some(proxies) = proxies else {
        return op(None).await;
    };

    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let proxy = proxies.get_next().await?;
        let proxy_id = proxy.as_ref().map(|proxy| proxy.id);

        // A stored proxy that can't be turned into a URL burns the attempt
        // just like a proxy that refused the connection
        let result = match proxy.map(|proxy| proxy.to_url()).transpose() {
            Ok(proxy_url) => op(proxy_url).await,
            Err(err) => Err(err),
        };

        let err = match result {
            Ok(output) => return Ok(output),
            Err(err) => err,
        };

        if attempt >= max_attempts || !err.is_retryable() {
            return Err(err);
        }

        warn!(
            attempt,
            max_attempts,
            proxy_id,
            err = tracing_err(&err),
            "Attempt with the proxy failed, retrying with another one"
        );

        attempt += 1;
    }
}

/// Removes the files in `dir` that weren't modified for `max_age`.
/// Returns the number of removed files.
async fn remove_stale_downloads(dir: &Path, max_age: Duration) -> Result<usize> {
    let mut entries = match fs_err::tokio::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }

        let age = now.duration_since(metadata.modified()?).unwrap_or_default();
        if age < max_age {
            continue;
        }

        debug!(path = %entry.path().display(), age = tracing_duration(age), "Removing a stale download");

        fs_err::tokio::remove_file(entry.path()).await?;
        removed += 1;
    }

    Ok(removed)
}

fn build_args(
    mode: ResolveMode,
    url: &Url,
    download_dir: &Path,
    proxy: Option<&Url>,
) -> Vec<String> {
    let output = download_dir.join("%(id)s.%(ext)s");

    let download = |format_args: &[&str]| {
        let mut args: Vec<String> = format_args.iter().map(|&arg| arg.to_owned()).collect();
        args.extend([
            "-o".to_owned(),
            output.to_string_lossy().into_owned(),
            "--no-playlist".to_owned(),
            // The age of the file is used to detect abandoned downloads
            "--no-mtime".to_owned(),
            // `--print` implies simulation otherwise
            "--no-simulate".to_owned(),
            "--print".to_owned(),
            "after_move:filepath".to_owned(),
        ]);
        args
    };

    let mut args = match mode {
        ResolveMode::Info => vec!["-j".to_owned(), "--no-playlist".to_owned()],
        ResolveMode::Video => download(&["-f", "best[ext=mp4]/best"]),
        ResolveMode::Audio => download(&["-x", "--audio-format", "mp3", "--audio-quality", "0"]),
    };

    if let Some(proxy) = proxy {
        args.extend(["--proxy".to_owned(), proxy.to_string()]);
    }

    args.push(url.to_string());
    args
}
