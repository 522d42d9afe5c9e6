use super::{Dependencies, Task, TaskId, TaskKind};
use crate::prelude::*;
use crate::provider::{MediaRef, ProviderError, ResolveRequest};
use crate::util::retry::RetryPolicy;
use crate::{err, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use url::Url;

/// Turns a link into a deliverable media with the configured provider
#[derive(Debug)]
pub(crate) struct ResolveTask {
    pub(crate) id: TaskId,
    pub(crate) kind: TaskKind,
    pub(crate) url: Url,
    pub(crate) retry: RetryPolicy,
    pub(crate) artifact_dir: Option<PathBuf>,
}

#[async_trait]
impl Task for ResolveTask {
    type Output = MediaRef;

    fn id(&self) -> TaskId {
        self.id
    }

    fn kind(&self) -> &'static str {
        self.kind.into()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn artifact_dir(&self) -> Option<&Path> {
        self.artifact_dir.as_deref()
    }

    async fn execute(&self, deps: &Dependencies) -> Result<MediaRef> {
        let mode = self.kind.resolve_mode();
        let provider = &deps.provider;

        let browser = deps.browser.as_ref().filter(|_| provider.needs_browser());

        let media = match browser {
            Some(browser) => {
                let lease = browser.new_context().await?;

                let result = async {
                    let page = lease.new_page().await?;
                    let request = ResolveRequest {
                        url: &self.url,
                        mode,
                        page: Some(page.as_ref()),
                    };
                    provider.resolve(request).await
                }
                .await;

                lease.release().await;
                result?
            }
            None => {
                let request = ResolveRequest {
                    url: &self.url,
                    mode,
                    page: None,
                };
                provider.resolve(request).await?
            }
        };

        let media = media.ok_or_else(|| {
            err!(ProviderError::NothingResolved {
                url: self.url.as_str(),
            })
        })?;

        debug!(%media, "Resolved the media");

        Ok(media)
    }
}
