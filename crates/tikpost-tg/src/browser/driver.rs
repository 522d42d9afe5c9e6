//! Seam between the session management and the actual browser automation.
use super::Fingerprint;
use crate::prelude::*;
use crate::proxy::ProxyCredential;
use crate::{fatal, Result};
use async_trait::async_trait;
use chrono::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct LaunchOptions {
    pub(crate) args: Vec<String>,
    pub(crate) headless: bool,
    pub(crate) executable: Option<PathBuf>,
    pub(crate) window: (u32, u32),

    /// Used for the whole lifetime of the browser process
    pub(crate) proxy: Option<ProxyCredential>,
}

#[async_trait]
pub(crate) trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: LaunchOptions) -> Result<Arc<dyn BrowserProcess>>;
}

/// The single underlying browser process
#[async_trait]
pub(crate) trait BrowserProcess: Send + Sync {
    /// Creates an isolated browsing context with its own cookies and storage
    async fn new_context(&self, fingerprint: &Fingerprint) -> Result<Arc<dyn BrowsingContext>>;

    async fn close(&self) -> Result;
}

#[async_trait]
pub(crate) trait BrowsingContext: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn Page>>;

    /// Closes all pages of the context and discards its storage
    async fn close(&self) -> Result;
}

#[async_trait]
pub(crate) trait Page: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result;

    /// Waits for an element matching the CSS `selector` to appear.
    /// Returns `false` if it didn't appear within the `timeout`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<bool>;

    async fn click(&self, selector: &str) -> Result;

    async fn fill(&self, selector: &str, value: &str) -> Result;

    /// Returns the value of the `attribute` for every element matching the `selector`
    async fn attribute_all(&self, selector: &str, attribute: &str) -> Result<Vec<Option<String>>>;

    async fn screenshot(&self, path: &Path) -> Result;
}

/// Browsing context that belongs to exactly one task.
///
/// Call [`ContextLease::release`] once the task is done with the context. If
/// the lease is dropped without that (e.g. the task's future was cancelled),
/// the context is closed in the background.
pub(crate) struct ContextLease {
    context: Option<Arc<dyn BrowsingContext>>,
}

impl ContextLease {
    pub(crate) fn new(context: Arc<dyn BrowsingContext>) -> Self {
        Self {
            context: Some(context),
        }
    }

    pub(crate) async fn new_page(&self) -> Result<Arc<dyn Page>> {
        match &self.context {
            Some(context) => context.new_page().await,
            None => Err(fatal!("BUG: the context lease was already released")),
        }
    }

    pub(crate) async fn release(mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        context
            .close()
            .await
            .warn_on_err("Failed to close a browsing context");
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime to close the browsing context, it's leaked");
            return;
        };

        debug!("Closing a browsing context of a cancelled task");

        runtime.spawn(async move {
            context
                .close()
                .await
                .warn_on_err("Failed to close a browsing context of a cancelled task");
        });
    }
}

/// Saves a screenshot of the page for post-mortem debugging.
/// Any failure is only logged. The caller's error is more important.
pub(crate) async fn capture_failure_screenshot(page: &dyn Page, dir: &Path, label: &str) {
    let file_name = format!("{label}_{}.png", Utc::now().format("%Y%m%d_%H%M%S"));
    let path = dir.join(file_name);

    let result = async {
        fs_err::tokio::create_dir_all(dir).await?;
        page.screenshot(&path).await
    }
    .await;

    if result
        .warn_on_err("Failed to capture a diagnostic screenshot")
        .is_some()
    {
        info!(path = %path.display(), "Saved a diagnostic screenshot");
    }
}


#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test_log::test(tokio::test)]
    async fn released_lease_closes_the_context() {
        let closed = Arc::new(AtomicUsize::new(0));
        let lease = ContextLease::new(Arc::new(FakeContext {
            closed: closed.clone(),
        }));

        lease.new_page().await.unwrap();
        lease.release().await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn dropped_lease_closes_the_context_in_background() {
        let closed = Arc::new(AtomicUsize::new(0));
        let lease = ContextLease::new(Arc::new(FakeContext {
            closed: closed.clone(),
        }));

        drop(lease);

        // Let the spawned task run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn failure_screenshot_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::default();

        capture_failure_screenshot(&page, dir.path(), "task_error_1").await;

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();

        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("task_error_1_"), "{files:?}");
        assert!(files[0].ends_with(".png"), "{files:?}");
    }

    #[test_log::test(tokio::test)]
    async fn failed_screenshot_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage {
            fail_screenshots: true,
            ..Default::default()
        };

        // Must not panic or propagate anything
        capture_failure_screenshot(&page, dir.path(), "task_error_2").await;

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
