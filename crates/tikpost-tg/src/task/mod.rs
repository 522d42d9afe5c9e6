//! Units of work and the bounded-concurrency executor for them.
mod factory;
mod manager;
mod resolve;

use crate::browser::{BrowserDeps, Page};
use crate::prelude::*;
use crate::provider::{ResolveMode, ResourceProvider};
use crate::util::retry::{retry, RetryFailure, RetryPolicy};
use crate::{err, ErrorKind, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) use factory::*;
pub(crate) use manager::*;
pub(crate) use resolve::*;

/// Opaque identity of a task, unique within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum TaskKind {
    /// Download the video file
    Video,

    /// Download only the audio track
    Audio,

    /// Resolve the direct link to the media without downloading it
    Info,
}

impl TaskKind {
    pub(crate) fn resolve_mode(self) -> ResolveMode {
        match self {
            Self::Video => ResolveMode::Video,
            Self::Audio => ResolveMode::Audio,
            Self::Info => ResolveMode::Info,
        }
    }
}

/// Collaborators handed to every task execution
#[derive(Clone)]
pub(crate) struct Dependencies {
    pub(crate) provider: Arc<dyn ResourceProvider>,

    /// Present only if the provider needs a browser
    pub(crate) browser: Option<BrowserDeps>,

    /// Page owned by the caller. If present, it's screenshotted when the
    /// task fails for good.
    pub(crate) page: Option<Arc<dyn Page>>,
}

#[async_trait]
pub(crate) trait Task: fmt::Debug + Send + Sync + 'static {
    type Output: Send + 'static;

    fn id(&self) -> TaskId;

    fn kind(&self) -> &'static str;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Directory for failure diagnostics, e.g. screenshots
    fn artifact_dir(&self) -> Option<&Path> {
        None
    }

    /// A single attempt to run the task
    async fn execute(&self, deps: &Dependencies) -> Result<Self::Output>;
}

/// Runs the task according to its retry policy. Running out of attempts is
/// reported as [`ErrorKind::TaskFailed`]. Non-retryable errors are returned
/// as is without consuming the remaining attempts.
pub(crate) async fn execute_with_retry<T: Task + ?Sized>(
    task: &T,
    deps: &Dependencies,
) -> Result<T::Output> {
    retry(task.retry_policy(), |attempt| {
        task.execute(deps)
            .instrument(debug_span!("attempt", attempt = attempt + 1))
    })
    .await
    .map_err(|failure| match failure {
        RetryFailure::NonRetryable { attempts, error } => {
            debug!(
                attempts,
                id = error.id(),
                "Task failed with a non-retryable error"
            );
            error
        }
        RetryFailure::Exhausted {
            attempts,
            last_error,
        } => err!(ErrorKind::TaskFailed {
            task_id: task.id(),
            attempts,
            source: last_error,
        }),
    })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[test]
    fn task_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..100).map(|_| TaskId::next()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn exhausted_retries_become_task_failure() {
        let task = SleepTask {
            max_attempts: 3,
            ..SleepTask::new(Duration::ZERO, Outcome::FailTransient)
        };

        let err = execute_with_retry(&task, &deps()).await.unwrap_err();

        assert_matches!(
            err.kind(),
            ErrorKind::TaskFailed { task_id, attempts: 3, .. } if *task_id == task.id
        );
        assert_eq!(task.gauge.calls.load(Ordering::SeqCst), 3);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn permanent_failure_is_returned_as_is() {
        let task = SleepTask {
            max_attempts: 3,
            ..SleepTask::new(Duration::ZERO, Outcome::FailPermanent)
        };

        let err = execute_with_retry(&task, &deps()).await.unwrap_err();

        assert_matches!(err.kind(), ErrorKind::Validation { .. });
        assert_eq!(task.gauge.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn task_kind_names() {
        assert_eq!(TaskKind::Video.to_string(), "video");
        assert_eq!("audio".parse::<TaskKind>().unwrap(), TaskKind::Audio);
        assert!("podcast".parse::<TaskKind>().is_err());
    }
}
