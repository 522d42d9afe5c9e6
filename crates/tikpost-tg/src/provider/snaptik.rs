use super::{
    MediaRef, ProviderError, ResolveMode, ResolveRequest, ResourceProvider, SnaptikConfig,
};
use crate::browser::{capture_failure_screenshot, BrowserError, Page};
use crate::prelude::*;
use crate::{err, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const CONTINUE_BUTTON: &str = "button.button.continue-web";
const FORM_INPUT: &str = r#"form.form[name="formurl"] input[name="url"]"#;
const FORM_SUBMIT: &str = r#"form.form[name="formurl"] button[type="submit"]"#;
const RESULT_OR_ERROR: &str = "div.video-links, div.error-message";
const RESULT_LINKS: &str = "div.video-links a";

/// Resolves TikTok links into direct media URLs by submitting them to
/// the snaptik.app website
pub(crate) struct SnaptikProvider {
    config: SnaptikConfig,
    screenshot_dir: PathBuf,
}

impl SnaptikProvider {
    pub(crate) fn new(config: SnaptikConfig, screenshot_dir: PathBuf) -> Self {
        Self {
            config,
            screenshot_dir,
        }
    }

    async fn scrape(&self, page: &dyn Page, url: &Url) -> Result<Url> {
        let config = &self.config;

        page.goto(config.site_url.as_str(), ms(config.page_load_ms))
            .await?;

        self.dismiss_interstitial(page).await;

        if !page.wait_for(FORM_INPUT, ms(config.form_ms)).await? {
            return Err(err!(BrowserError::ElementNotFound {
                selector: FORM_INPUT
            }));
        }

        page.fill(FORM_INPUT, url.as_str()).await?;
        page.click(FORM_SUBMIT).await?;

        let timeout = ms(config.result_ms);
        if !page.wait_for(RESULT_OR_ERROR, timeout).await? {
            return Err(err!(ProviderError::ResultsTimeout { timeout }));
        }

        let href = page
            .attribute_all(RESULT_LINKS, "href")
            .await?
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| err!(ProviderError::NoResults { url: url.as_str() }))?;

        // The links may be relative to the site
        config.site_url.join(&href).map_err(|err| {
            err!(ProviderError::UnexpectedOutput {
                message: format!("invalid download link `{href}`: {err}"),
            })
        })
    }

    /// The interstitial is shown only sometimes. Its absence or a failure to
    /// dismiss it is not an error.
    async fn dismiss_interstitial(&self, page: &dyn Page) {
        let appeared = page
            .wait_for(CONTINUE_BUTTON, ms(self.config.continue_wait_ms))
            .await;

        match appeared {
            Ok(true) => {}
            Ok(false) => {
                debug!("No interstitial on the page, skipping");
                return;
            }
            Err(err) => {
                warn!(
                    err = tracing_err(&err),
                    "Failed to look for the interstitial"
                );
                return;
            }
        }

        let timeout = ms(self.config.continue_click_ms);
        match tokio::time::timeout(timeout, page.click(CONTINUE_BUTTON)).await {
            Ok(Ok(())) => debug!("Dismissed the interstitial"),
            Ok(Err(err)) => {
                warn!(
                    err = tracing_err(&err),
                    "Failed to dismiss the interstitial"
                );
            }
            Err(_) => warn!(
                timeout = tracing_duration(timeout),
                "Clicking the interstitial timed out"
            ),
        }
    }
}

#[async_trait]
impl ResourceProvider for SnaptikProvider {
    fn name(&self) -> &'static str {
        "snaptik"
    }

    fn needs_browser(&self) -> bool {
        true
    }

    async fn resolve(&self, request: ResolveRequest<'_>) -> Result<Option<MediaRef>> {
        let ResolveRequest { url, mode, page } = request;

        let page = page.ok_or_else(|| {
            err!(ProviderError::MissingPage {
                provider: self.name()
            })
        })?;

        // The site gives a direct link to the video, which is good for both
        if !matches!(mode, ResolveMode::Video | ResolveMode::Info) {
            return Err(err!(ProviderError::UnsupportedMode {
                provider: self.name(),
                mode,
            }));
        }

        let result = self
            .scrape(page, url)
            .instrument(info_span!("snaptik", %url))
            .await;

        match result {
            Ok(link) => Ok(Some(MediaRef::Url(link))),
            Err(err) => {
                capture_failure_screenshot(page, &self.screenshot_dir, "snaptik_error").await;
                Err(err)
            }
        }
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakePage;
    use crate::ErrorKind;
    use assert_matches::assert_matches;
    use expect_test::expect;

    const VIDEO: &str = "https://www.tiktok.com/@user/video/7300000000000000000";

    fn provider(screenshot_dir: &std::path::Path) -> SnaptikProvider {
        SnaptikProvider::new(SnaptikConfig::default(), screenshot_dir.to_owned())
    }

    fn form_page() -> FakePage {
        FakePage::default()
            .with_element(FORM_INPUT, &[])
            .with_element(FORM_SUBMIT, &[("type", "submit")])
    }

    async fn resolve(provider: &SnaptikProvider, page: &FakePage) -> Result<Option<MediaRef>> {
        let url = Url::parse(VIDEO).unwrap();
        let request = ResolveRequest {
            url: &url,
            mode: ResolveMode::Video,
            page: Some(page),
        };
        provider.resolve(request).await
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn extracts_the_first_download_link() {
        let dir = tempfile::tempdir().unwrap();
        let page = form_page()
            .with_element(CONTINUE_BUTTON, &[])
            .on_click(FORM_SUBMIT, "div.video-links", &[])
            .on_click(
                FORM_SUBMIT,
                RESULT_LINKS,
                &[("href", "/file.php?token=first")],
            )
            .on_click(
                FORM_SUBMIT,
                RESULT_LINKS,
                &[("href", "https://cdn.example.com/second.mp4")],
            );

        let media = resolve(&provider(dir.path()), &page).await.unwrap();

        assert_eq!(
            media,
            Some(MediaRef::Url(
                "https://snaptik.app/file.php?token=first".parse().unwrap()
            ))
        );

        expect![[r#"
            [
                "goto https://snaptik.app/",
                "click button.button.continue-web",
                "fill form.form[name=\"formurl\"] input[name=\"url\"] https://www.tiktok.com/@user/video/7300000000000000000",
                "click form.form[name=\"formurl\"] button[type=\"submit\"]",
            ]
        "#]]
        .assert_debug_eq(&page.actions());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn missing_interstitial_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let page = form_page()
            .on_click(FORM_SUBMIT, "div.video-links", &[])
            .on_click(
                FORM_SUBMIT,
                RESULT_LINKS,
                &[("href", "https://cdn.example.com/v.mp4")],
            );

        let media = resolve(&provider(dir.path()), &page).await.unwrap();

        assert_eq!(
            media,
            Some(MediaRef::Url(
                "https://cdn.example.com/v.mp4".parse().unwrap()
            ))
        );
        assert!(!page
            .actions()
            .iter()
            .any(|action| action.contains("continue-web")));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn error_container_means_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let page = form_page().on_click(FORM_SUBMIT, "div.error-message", &[]);

        let err = resolve(&provider(dir.path()), &page).await.unwrap_err();

        assert_matches!(
            err.kind(),
            ErrorKind::Provider {
                source: ProviderError::NoResults { .. }
            }
        );
        assert!(err.is_retryable());

        // A diagnostic screenshot is left behind
        let screenshots = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(screenshots, 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn silent_page_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let page = form_page();

        let err = resolve(&provider(dir.path()), &page).await.unwrap_err();

        assert_matches!(
            err.kind(),
            ErrorKind::Provider {
                source: ProviderError::ResultsTimeout { timeout }
            } if *timeout == Duration::from_secs(30)
        );
    }

    #[test_log::test(tokio::test)]
    async fn page_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::parse(VIDEO).unwrap();
        let request = ResolveRequest {
            url: &url,
            mode: ResolveMode::Video,
            page: None,
        };

        let err = provider(dir.path()).resolve(request).await.unwrap_err();

        assert_matches!(
            err.kind(),
            ErrorKind::Provider {
                source: ProviderError::MissingPage { .. }
            }
        );
        assert!(!err.is_retryable());
    }

    #[test_log::test(tokio::test)]
    async fn audio_is_not_supported() {
        let dir = tempfile::tempdir().unwrap();
        let page = form_page();
        let url = Url::parse(VIDEO).unwrap();
        let request = ResolveRequest {
            url: &url,
            mode: ResolveMode::Audio,
            page: Some(&page),
        };

        let err = provider(dir.path()).resolve(request).await.unwrap_err();

        assert_matches!(
            err.kind(),
            ErrorKind::Provider {
                source: ProviderError::UnsupportedMode { .. }
            }
        );
        assert!(page.actions().is_empty());
    }
}
