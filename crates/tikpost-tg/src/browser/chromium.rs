//! [`BrowserLauncher`] implementation on top of the Chrome DevTools Protocol
use super::fingerprint::Geolocation;
use super::{
    BrowserError, BrowserLauncher, BrowserProcess, BrowsingContext, Fingerprint, LaunchOptions,
    Page,
};
use crate::prelude::*;
use crate::{err, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    BrowserContextId, GrantPermissionsParams, PermissionType,
};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetGeolocationOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use futures::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// How often the page is polled while waiting for an element
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub(crate) struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: LaunchOptions) -> Result<Arc<dyn BrowserProcess>> {
        let LaunchOptions {
            mut args,
            headless,
            executable,
            window: (width, height),
            proxy,
        } = options;

        if let Some(proxy) = &proxy {
            if proxy.has_credentials() {
                warn!(
                    id = proxy.id,
                    "Chromium doesn't support proxy credentials in the command line, \
                    they are ignored"
                );
            }
            args.push(format!("--proxy-server={}", proxy.server));
        }

        let mut config = chromiumoxide::BrowserConfig::builder()
            .window_size(width, height)
            .args(args);

        if !headless {
            config = config.with_head();
        }

        if let Some(executable) = executable {
            config = config.chrome_executable(executable);
        }

        let config = config
            .build()
            .map_err(|message| err!(BrowserError::Launch { message }))?;

        let (browser, mut handler) =
            chromiumoxide::Browser::launch(config)
                .await
                .map_err(|err| {
                    err!(BrowserError::Launch {
                        message: err.to_string()
                    })
                })?;

        let handler = tokio::spawn(
            async move {
                while let Some(event) = handler.next().await {
                    if let Err(err) = event {
                        debug!(err = tracing_err(&err), "Browser handler event failed");
                    }
                }
                debug!("Browser handler loop exited");
            }
            .in_current_span(),
        );

        Ok(Arc::new(ChromiumProcess {
            browser: Arc::new(RwLock::new(browser)),
            handler,
        }))
    }
}

struct ChromiumProcess {
    /// Write lock is taken only to close the browser
    browser: Arc<RwLock<chromiumoxide::Browser>>,
    handler: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl BrowserProcess for ChromiumProcess {
    async fn new_context(&self, fingerprint: &Fingerprint) -> Result<Arc<dyn BrowsingContext>> {
        let response = self
            .browser
            .read()
            .await
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(cdp_err)?;

        let context = ChromiumContext {
            id: response.result.browser_context_id,
            browser: self.browser.clone(),
            fingerprint: fingerprint.clone(),
        };

        if let Err(err) = context.grant_geolocation().await {
            context
                .close()
                .await
                .warn_on_err("Failed to close a browsing context after a failed setup");
            return Err(err);
        }

        Ok(Arc::new(context))
    }

    async fn close(&self) -> Result {
        let mut browser = self.browser.write().await;

        browser.close().await.map_err(cdp_err)?;
        browser.wait().await?;

        self.handler.abort();

        Ok(())
    }
}

struct ChromiumContext {
    id: BrowserContextId,
    browser: Arc<RwLock<chromiumoxide::Browser>>,
    fingerprint: Fingerprint,
}

#[async_trait]
impl BrowsingContext for ChromiumContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(self.id.clone())
            .build()
            .map_err(|message| err!(BrowserError::Cdp { message }))?;

        let page = self
            .browser
            .read()
            .await
            .new_page(params)
            .await
            .map_err(cdp_err)?;

        let fp = &self.fingerprint;

        page.set_user_agent(fp.user_agent.as_str())
            .await
            .map_err(cdp_err)?;

        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(fp.viewport.width),
            i64::from(fp.viewport.height),
            fp.device_scale_factor,
            false,
        ))
        .await
        .map_err(cdp_err)?;

        page.execute(geolocation_override(&fp.geolocation))
            .await
            .map_err(cdp_err)?;

        Ok(Arc::new(ChromiumPage { page }))
    }

    async fn close(&self) -> Result {
        // Disposing the context also closes all of its pages
        self.browser
            .read()
            .await
            .execute(DisposeBrowserContextParams::new(self.id.clone()))
            .await
            .map_err(cdp_err)?;
        Ok(())
    }
}

impl ChromiumContext {
    /// The overridden location is reported only if the page may ask for it
    async fn grant_geolocation(&self) -> Result {
        let mut params = GrantPermissionsParams::new(vec![PermissionType::Geolocation]);
        params.browser_context_id = Some(self.id.clone());

        self.browser
            .read()
            .await
            .execute(params)
            .await
            .map_err(cdp_err)?;

        Ok(())
    }
}

fn geolocation_override(geo: &Geolocation) -> SetGeolocationOverrideParams {
    SetGeolocationOverrideParams::builder()
        .latitude(geo.latitude)
        .longitude(geo.longitude)
        .accuracy(f64::from(geo.accuracy))
        .build()
}

struct ChromiumPage {
    page: chromiumoxide::Page,
}

#[async_trait]
impl Page for ChromiumPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result {
        let navigation = tokio::time::timeout(timeout, self.page.goto(url)).await;

        match navigation {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err!(BrowserError::Navigation {
                url,
                message: err.to_string(),
            })),
            Err(_) => Err(err!(BrowserError::NavigationTimeout { url, timeout })),
        }
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    async fn click(&self, selector: &str) -> Result {
        self.find(selector).await?.click().await.map_err(cdp_err)?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result {
        self.find(selector)
            .await?
            .click()
            .await
            .map_err(cdp_err)?
            .type_str(value)
            .await
            .map_err(cdp_err)?;
        Ok(())
    }

    async fn attribute_all(&self, selector: &str, attribute: &str) -> Result<Vec<Option<String>>> {
        let elements = match self.page.find_elements(selector).await {
            Ok(elements) => elements,
            // No elements is a normal outcome for the callers
            Err(CdpError::NotFound) => return Ok(vec![]),
            Err(err) => return Err(cdp_err(err)),
        };

        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            values.push(element.attribute(attribute).await.map_err(cdp_err)?);
        }

        Ok(values)
    }

    async fn screenshot(&self, path: &Path) -> Result {
        let png = self
            .page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(cdp_err)?;

        fs_err::tokio::write(path, png).await?;

        Ok(())
    }
}

impl ChromiumPage {
    async fn find(&self, selector: &str) -> Result<chromiumoxide::Element> {
        self.page
            .find_element(selector)
            .await
            .map_err(|err| match err {
                CdpError::NotFound => err!(BrowserError::ElementNotFound { selector }),
                err => cdp_err(err),
            })
    }
}

fn cdp_err(err: CdpError) -> crate::Error {
    err!(BrowserError::Cdp {
        message: err.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geolocation_of_the_fingerprint_is_overridden() {
        let params = geolocation_override(&Geolocation {
            latitude: 55.7,
            longitude: 37.6,
            accuracy: 50,
        });

        assert_eq!(params.latitude, Some(55.7));
        assert_eq!(params.longitude, Some(37.6));
        assert_eq!(params.accuracy, Some(50.0));
    }
}
