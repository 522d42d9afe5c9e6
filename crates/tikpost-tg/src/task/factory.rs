use super::{ResolveTask, TaskId, TaskKind};
use crate::prelude::*;
use crate::util::retry::RetryPolicy;
use crate::{err, provider, Result, ValidationError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use strum::IntoEnumIterator;
use url::Url;

/// Parameters shared by all tasks of the same kind
#[derive(Debug, Clone)]
pub(crate) struct TaskTemplate {
    pub(crate) retry: RetryPolicy,
    pub(crate) artifact_dir: Option<PathBuf>,
}

/// Lookup table from the task kind to its template. It's built once at
/// startup and never changes afterwards.
#[derive(Debug)]
pub(crate) struct TaskFactory {
    templates: HashMap<TaskKind, TaskTemplate>,
}

impl TaskFactory {
    pub(crate) fn new(templates: impl IntoIterator<Item = (TaskKind, TaskTemplate)>) -> Self {
        Self {
            templates: templates.into_iter().collect(),
        }
    }

    /// Registers every task kind with the same retry policy and artifact dir
    pub(crate) fn from_config(config: &provider::Config) -> Self {
        let template = TaskTemplate {
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: Duration::from_secs(config.retry_base_delay_secs),
            },
            artifact_dir: Some(config.screenshot_dir.clone()),
        };

        Self::new(TaskKind::iter().map(|kind| (kind, template.clone())))
    }

    pub(crate) fn create(&self, kind: TaskKind, url: &str) -> Result<ResolveTask> {
        let template = self.templates.get(&kind).ok_or_else(|| {
            err!(ValidationError::TaskKind {
                kind: kind.to_string(),
            })
        })?;

        let url = Url::parse(url.trim())
            .map_err(|source| err!(ValidationError::Link { input: url, source }))?;

        let task = ResolveTask {
            id: TaskId::next(),
            kind,
            url,
            retry: template.retry,
            artifact_dir: template.artifact_dir.clone(),
        };

        trace!(id = %task.id, %kind, url = %task.url, "Created a task");

        Ok(task)
    }
}
