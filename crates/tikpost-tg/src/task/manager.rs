use super::{execute_with_retry, Dependencies, Task, TaskId};
use crate::browser::capture_failure_screenshot;
use crate::observability::metrics::{record_task_finished, TASKS_ACTIVE};
use crate::prelude::*;
use crate::{err, fatal, LifecycleError, Result, TimeoutError, ValidationError};
use chrono::prelude::*;
use futures::prelude::*;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// How often [`TaskManager::wait_for_completion`] looks at the active tasks
const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bookkeeping of a task that was admitted past the concurrency gate
#[derive(Debug, Clone)]
pub(crate) struct ActiveTask {
    pub(crate) id: TaskId,
    pub(crate) kind: &'static str,
    pub(crate) started_at: DateTime<Utc>,
    started: Instant,
}

impl ActiveTask {
    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TaskStats {
    pub(crate) max_parallel: usize,
    pub(crate) active_tasks: usize,
    pub(crate) completed_tasks: u64,
    pub(crate) failed_tasks: u64,

    /// Share of the completed tasks among all finished ones, in `[0, 1]`.
    /// Zero if nothing has finished yet.
    pub(crate) success_rate: f64,
}

#[derive(Default)]
struct State {
    active: HashMap<TaskId, ActiveTask>,
    completed: u64,
    failed: u64,
}

/// Runs tasks with at most `max_parallel` of them in flight at any moment.
///
/// A task holds its slot for the whole duration of its execution including
/// the retries and the backoff sleeps between them.
pub(crate) struct TaskManager {
    max_parallel: usize,
    permits: Semaphore,
    state: Mutex<State>,
    stopped: AtomicBool,
}

impl TaskManager {
    pub(crate) fn new(max_parallel: usize) -> Result<Self> {
        if max_parallel == 0 {
            return Err(err!(ValidationError::MaxParallel));
        }

        Ok(Self {
            max_parallel,
            permits: Semaphore::new(max_parallel),
            state: Default::default(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Waits for a free slot and runs the task to completion with retries.
    ///
    /// If the task fails for good and the caller supplied a page in the
    /// dependencies, a screenshot of it is saved to the task's artifact dir.
    pub(crate) async fn execute<T: Task>(&self, task: T, deps: &Dependencies) -> Result<T::Output> {
        if self.is_stopped() {
            return Err(err!(LifecycleError::Stopped));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .fatal_ctx(|| "BUG: the task semaphore was closed")?;

        // Stop could have been requested while we were waiting for the slot
        if self.is_stopped() {
            return Err(err!(LifecycleError::Stopped));
        }

        let mut admission = self.admit(&task);

        let span = info_span!("task", id = %task.id(), kind = task.kind());

        let result = execute_with_retry(&task, deps)
            .instrument(span.clone())
            .await;

        if result.is_err() {
            self.capture_diagnostics(&task, deps).instrument(span).await;
        }

        admission.success = Some(result.is_ok());

        result
    }

    /// Same as [`TaskManager::execute`], but gives up waiting after the
    /// `timeout`. The task itself keeps running in the background and holds
    /// its slot until it finishes, so the concurrency bound is never exceeded.
    pub(crate) async fn execute_with_timeout<T: Task>(
        self: &Arc<Self>,
        task: T,
        deps: &Dependencies,
        timeout: Option<Duration>,
    ) -> Result<T::Output> {
        let Some(timeout) = timeout else {
            return self.execute(task, deps).await;
        };

        let task_id = task.id();
        let manager = self.clone();
        let deps = deps.clone();

        let handle =
            tokio::spawn(async move { manager.execute(task, &deps).await }.in_current_span());

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => match err.try_into_panic() {
                Ok(panic) => std::panic::resume_unwind(panic),
                Err(err) => Err(fatal!("BUG: task {task_id} was cancelled: {err}")),
            },
            Err(_) => {
                warn!(
                    %task_id,
                    timeout = tracing_duration(timeout),
                    "Stopped waiting for the task, it keeps running in the background"
                );
                Err(err!(TimeoutError {
                    operation: format!("Task {task_id}"),
                    timeout,
                }))
            }
        }
    }

    /// Runs all tasks under the shared concurrency bound. The results are
    /// returned in the order of completion, not in the order of the input.
    pub(crate) async fn execute_many<T: Task>(
        &self,
        tasks: impl IntoIterator<Item = T>,
        deps: &Dependencies,
    ) -> Vec<Result<T::Output>> {
        tasks
            .into_iter()
            .map(|task| self.execute(task, deps))
            .collect::<FuturesUnordered<_>>()
            .collect()
            .await
    }

    /// Waits until there are no active tasks. Returns a timeout error if
    /// they didn't finish within the given `timeout`.
    pub(crate) async fn wait_for_completion(&self, timeout: Option<Duration>) -> Result {
        let idle = async {
            while !self.state.lock().active.is_empty() {
                tokio::time::sleep(COMPLETION_POLL_INTERVAL).await;
            }
        };

        let Some(timeout) = timeout else {
            idle.await;
            return Ok(());
        };

        tokio::time::timeout(timeout, idle).await.map_err(|_| {
            err!(TimeoutError {
                operation: "Waiting for the active tasks",
                timeout,
            })
        })
    }

    /// Makes the manager reject new tasks. The ones already admitted
    /// continue running.
    pub(crate) fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("Task manager stopped accepting new tasks");
        }
    }

    pub(crate) fn resume(&self) {
        if self.stopped.swap(false, Ordering::SeqCst) {
            info!("Task manager resumed accepting new tasks");
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn get_stats(&self) -> TaskStats {
        let state = self.state.lock();
        let finished = state.completed + state.failed;

        #[allow(clippy::cast_precision_loss)]
        let success_rate = if finished == 0 {
            0.0
        } else {
            state.completed as f64 / finished as f64
        };

        TaskStats {
            max_parallel: self.max_parallel,
            active_tasks: state.active.len(),
            completed_tasks: state.completed,
            failed_tasks: state.failed,
            success_rate,
        }
    }

    /// Snapshot of the active tasks, the longest running first
    pub(crate) fn active_tasks_info(&self) -> Vec<ActiveTask> {
        let mut tasks: Vec<_> = self.state.lock().active.values().cloned().collect();
        tasks.sort_by_key(|task| (task.started, task.id));
        tasks
    }

    fn admit(&self, task: &impl Task) -> Admission<'_> {
        let record = ActiveTask {
            id: task.id(),
            kind: task.kind(),
            started_at: Utc::now(),
            started: Instant::now(),
        };

        let active = {
            let mut state = self.state.lock();
            state.active.insert(record.id, record.clone());
            state.active.len()
        };

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(TASKS_ACTIVE, active as f64);

        Admission {
            manager: self,
            record,
            success: None,
        }
    }

    async fn capture_diagnostics(&self, task: &impl Task, deps: &Dependencies) {
        let (Some(page), Some(dir)) = (&deps.page, task.artifact_dir()) else {
            return;
        };
        let label = format!("task_error_{}", task.id());
        capture_failure_screenshot(page.as_ref(), dir, &label).await;
    }
}

/// Removes the task's record when dropped. If the outcome was never set,
/// the task's future was cancelled, which counts as a failure.
struct Admission<'a> {
    manager: &'a TaskManager,
    record: ActiveTask,
    success: Option<bool>,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        let success = self.success.unwrap_or_else(|| {
            warn!(id = %self.record.id, "Task was cancelled before it finished");
            false
        });

        let active = {
            let mut state = self.manager.state.lock();
            state.active.remove(&self.record.id);
            if success {
                state.completed += 1;
            } else {
                state.failed += 1;
            }
            state.active.len()
        };

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(TASKS_ACTIVE, active as f64);

        record_task_finished(success, self.record.elapsed());
    }
}
