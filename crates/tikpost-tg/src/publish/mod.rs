//! Publication of the scheduled content to the channel.
mod scheduler;

use crate::facts::{FactKind, FactStore};
use crate::observability::metrics::PUBLICATIONS_TOTAL;
use crate::prelude::*;
use crate::provider::{MediaRef, ProviderManager};
use crate::queue::{Submission, SubmissionQueue};
use crate::slots::ContentType;
use crate::task::{TaskFactory, TaskKind};
use crate::Result;
use async_trait::async_trait;
use chrono::FixedOffset;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub(crate) use scheduler::*;

const EMPTY_QUEUE_NOTICE: &str = "[!] The video queue is empty, the publication is skipped.";

/// Loaded from `SCHEDULE_*` env vars
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    /// Offset of the channel's local time. Slot times are in this offset.
    pub(crate) utc_offset_hours: i32,

    /// How long a video publication waits for a submission to show up
    pub(crate) queue_wait_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Moscow time
            utc_offset_hours: 3,
            queue_wait_secs: 10,
        }
    }
}

impl Config {
    pub(crate) fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 60 * 60).unwrap_or_else(|| {
            panic!(
                "BUG: invalid SCHEDULE_UTC_OFFSET_HOURS: {}",
                self.utc_offset_hours
            )
        })
    }

    pub(crate) fn queue_wait(&self) -> Duration {
        Duration::from_secs(self.queue_wait_secs)
    }
}

/// Transport to the channel where the content is published
#[async_trait]
pub(crate) trait Messenger: Send + Sync {
    async fn send_text(&self, text: &str) -> Result;

    async fn send_video(&self, media: &MediaRef, caption: Option<&str>) -> Result;

    /// Re-sends the video that is already stored on the messenger's servers
    async fn send_uploaded_video(&self, file_id: &str, caption: Option<&str>) -> Result;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Published,
    EmptyPool(FactKind),
    EmptyQueue,
}

pub(crate) struct PublisherOptions {
    pub(crate) facts: Arc<dyn FactStore>,
    pub(crate) queue: Arc<SubmissionQueue>,
    pub(crate) provider: Arc<ProviderManager>,
    pub(crate) tasks: Arc<TaskFactory>,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) queue_wait: Duration,
    pub(crate) task_timeout: Option<Duration>,
}

pub(crate) struct Publisher {
    facts: Arc<dyn FactStore>,
    queue: Arc<SubmissionQueue>,
    provider: Arc<ProviderManager>,
    tasks: Arc<TaskFactory>,
    messenger: Arc<dyn Messenger>,
    queue_wait: Duration,
    task_timeout: Option<Duration>,
}

impl Publisher {
    pub(crate) fn new(opts: PublisherOptions) -> Self {
        let PublisherOptions {
            facts,
            queue,
            provider,
            tasks,
            messenger,
            queue_wait,
            task_timeout,
        } = opts;

        Self {
            facts,
            queue,
            provider,
            tasks,
            messenger,
            queue_wait,
            task_timeout,
        }
    }

    pub(crate) async fn publish(&self, content_type: ContentType) -> Result<Outcome> {
        let outcome = match content_type {
            ContentType::ShortFact => self.publish_fact(FactKind::Short).await?,
            ContentType::MediumFact => self.publish_fact(FactKind::Medium).await?,
            ContentType::Video => self.publish_video().await?,
        };

        if outcome == Outcome::Published {
            metrics::increment_counter!(PUBLICATIONS_TOTAL, "content_type" => content_type.as_str());
        }

        info!(?outcome, "Publication finished");

        Ok(outcome)
    }

    /// Same as [`Self::publish`], but the error is only logged. The schedule
    /// must go on regardless of a single failed publication.
    pub(crate) async fn publish_logged(&self, content_type: ContentType) {
        let result = self
            .publish(content_type)
            .instrument(info_span!("publish", %content_type))
            .await;

        if let Err(err) = result {
            warn!(
                err = tracing_err(&err),
                %content_type,
                "Scheduled publication failed"
            );
        }
    }

    async fn publish_fact(&self, kind: FactKind) -> Result<Outcome> {
        let Some(fact) = self.facts.next_fact(kind).await? else {
            warn!(%kind, "The pool of facts is empty, nothing to publish");
            return Ok(Outcome::EmptyPool(kind));
        };

        self.messenger.send_text(&fact).await?;

        Ok(Outcome::Published)
    }

    async fn publish_video(&self) -> Result<Outcome> {
        let Some(submission) = self.queue.pop_timeout(self.queue_wait).await else {
            warn!("The video queue is empty, skipping the publication");
            self.messenger.send_text(EMPTY_QUEUE_NOTICE).await?;
            return Ok(Outcome::EmptyQueue);
        };

        match submission {
            Submission::Uploaded { file_id, caption } => {
                self.messenger
                    .send_uploaded_video(&file_id, caption.as_deref())
                    .await?;
            }
            Submission::Link { url } => {
                let task = self.tasks.create(TaskKind::Video, url.as_str())?;
                let media = self.provider.process_task(task, self.task_timeout).await?;

                let sent = self.messenger.send_video(&media, None).await;

                if let MediaRef::File(path) = &media {
                    fs_err::tokio::remove_file(path)
                        .await
                        .map_err(crate::Error::from)
                        .warn_on_err("Failed to remove the published video file");
                }

                sent?;
            }
        }

        Ok(Outcome::Published)
    }
}
