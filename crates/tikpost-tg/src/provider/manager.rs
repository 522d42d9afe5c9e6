use super::ResourceProvider;
use crate::browser::BrowserSessionManager;
use crate::prelude::*;
use crate::task::{Dependencies, Task, TaskManager, TaskStats};
use crate::Result;
use chrono::prelude::*;
use futures::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound of time to wait for the in-flight tasks when stopping
/// without a browser
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProcessingStats {
    pub(crate) total_processed: u64,
    pub(crate) successful: u64,
    pub(crate) failed: u64,
    pub(crate) last_processed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub(crate) struct CombinedStats {
    pub(crate) provider: &'static str,
    pub(crate) processing: ProcessingStats,
    pub(crate) tasks: TaskStats,
}

/// Drives tasks through the [`TaskManager`] with the resource provider and,
/// if the provider needs one, the shared browser.
pub(crate) struct ProviderManager {
    provider: Arc<dyn ResourceProvider>,
    task_manager: Arc<TaskManager>,

    /// Present only if the provider needs a browser
    session: Option<Arc<BrowserSessionManager>>,
    running: AtomicBool,
    stats: Mutex<ProcessingStats>,
}

impl ProviderManager {
    pub(crate) fn new(
        provider: Arc<dyn ResourceProvider>,
        task_manager: Arc<TaskManager>,
        session: Option<Arc<BrowserSessionManager>>,
    ) -> Self {
        Self {
            provider,
            task_manager,
            session,
            running: AtomicBool::new(false),
            stats: Default::default(),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn session(&self) -> Option<&Arc<BrowserSessionManager>> {
        self.session.as_ref()
    }

    /// Runs a single task, starting the manager first if needed
    pub(crate) async fn process_task<T: Task>(
        &self,
        task: T,
        timeout: Option<Duration>,
    ) -> Result<T::Output> {
        if !self.is_running() {
            self.start().await?;
        }

        let deps = self.dependencies().await?;

        let result = self
            .task_manager
            .execute_with_timeout(task, &deps, timeout)
            .await;

        self.record(result.is_ok());

        result
    }

    /// Runs the tasks one by one. A failure of one task is stored in the
    /// results and doesn't affect the rest of them.
    pub(crate) async fn process_batch<T: Task>(
        &self,
        tasks: impl IntoIterator<Item = T>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Result<T::Output>>> {
        if !self.is_running() {
            self.start().await?;
        }

        let mut results = vec![];

        for task in tasks {
            let id = task.id();
            let result = self.process_task(task, timeout).await;
            if let Err(err) = &result {
                warn!(%id, err = tracing_err(err), "Task in the batch failed");
            }
            results.push(result);
        }

        let failed = results.iter().filter(|result| result.is_err()).count();
        info!(total = results.len(), failed, "Processed a batch of tasks");

        Ok(results)
    }

    /// Lazily processes the tasks from the stream one at a time. The output
    /// ends once `max_tasks` results were produced or the input is exhausted.
    pub(crate) fn process_stream<'a, T: Task>(
        &'a self,
        tasks: impl Stream<Item = T> + 'a,
        timeout: Option<Duration>,
        max_tasks: Option<usize>,
    ) -> impl Stream<Item = Result<T::Output>> + 'a {
        tasks
            .take(max_tasks.unwrap_or(usize::MAX))
            .then(move |task| self.process_task(task, timeout))
    }

    pub(crate) async fn start(&self) -> Result {
        if let Some(session) = &self.session {
            session.start().await?;
        }

        self.task_manager.resume();

        if !self.running.swap(true, Ordering::SeqCst) {
            info!(provider = self.provider.name(), "Provider manager started");
        }

        Ok(())
    }

    /// Stops accepting new tasks, waits for the in-flight ones and closes
    /// the browser if there is one
    pub(crate) async fn stop(&self) -> Result {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        match &self.session {
            // The session manager drains the task manager itself
            Some(session) => session.stop().await?,
            None => {
                self.task_manager.stop();
                self.task_manager
                    .wait_for_completion(Some(DRAIN_TIMEOUT))
                    .await
                    .warn_on_err("In-flight tasks didn't finish in time");
            }
        }

        info!(provider = self.provider.name(), "Provider manager stopped");

        Ok(())
    }

    pub(crate) async fn restart(&self) -> Result {
        info!(
            provider = self.provider.name(),
            "Restarting the provider manager"
        );
        self.stop().await?;
        self.start().await
    }

    pub(crate) async fn health_check(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        match &self.session {
            Some(session) => session.health_check().await,
            None => true,
        }
    }

    pub(crate) fn get_stats(&self) -> ProcessingStats {
        self.stats.lock().clone()
    }

    pub(crate) fn get_combined_stats(&self) -> CombinedStats {
        CombinedStats {
            provider: self.provider.name(),
            processing: self.get_stats(),
            tasks: self.task_manager.get_stats(),
        }
    }

    pub(crate) fn task_manager(&self) -> &TaskManager {
        &self.task_manager
    }

    async fn dependencies(&self) -> Result<Dependencies> {
        let browser = match &self.session {
            Some(session) => Some(session.ensure_ready().await?),
            None => None,
        };

        Ok(Dependencies {
            provider: self.provider.clone(),
            browser,
            page: None,
        })
    }

    fn record(&self, success: bool) {
        let mut stats = self.stats.lock();
        stats.total_processed += 1;
        if success {
            stats.successful += 1;
        } else {
            stats.failed += 1;
        }
        stats.last_processed = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeLauncher;
    use crate::browser::BrowserConfig;
    use crate::provider::{MediaRef, ProviderError, ResolveRequest};
    use crate::task::{ResolveTask, TaskFactory, TaskKind, TaskTemplate};
    use crate::util::retry::RetryPolicy;
    use crate::ErrorKind;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Resolves every link to `/tmp/video{n}.mp4` where `n` is the last
    /// path segment of the link. Links containing `bad` resolve to nothing.
    #[derive(Default)]
    struct StubProvider {
        needs_browser: bool,
        delay: Duration,
        pages_seen: AtomicUsize,
    }

    #[async_trait]
    impl ResourceProvider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn needs_browser(&self) -> bool {
            self.needs_browser
        }

        async fn resolve(&self, request: ResolveRequest<'_>) -> Result<Option<MediaRef>> {
            if request.page.is_some() {
                self.pages_seen.fetch_add(1, Ordering::SeqCst);
            }

            tokio::time::sleep(self.delay).await;

            let url = request.url.as_str();
            if url.contains("bad") {
                return Ok(None);
            }

            let n = url.rsplit('/').next().unwrap_or_default();
            Ok(Some(MediaRef::File(format!("/tmp/video{n}.mp4").into())))
        }
    }

    fn factory() -> TaskFactory {
        TaskFactory::new([(
            TaskKind::Video,
            TaskTemplate {
                retry: RetryPolicy {
                    max_attempts: 1,
                    base_delay: Duration::from_secs(1),
                },
                artifact_dir: None,
            },
        )])
    }

    fn task(url: &str) -> ResolveTask {
        factory().create(TaskKind::Video, url).unwrap()
    }

    fn manager(provider: StubProvider) -> (ProviderManager, Arc<FakeLauncher>) {
        let provider = Arc::new(provider);
        let task_manager = Arc::new(TaskManager::new(3).unwrap());
        let launcher = Arc::new(FakeLauncher::default());

        let session = provider.needs_browser.then(|| {
            Arc::new(BrowserSessionManager::new(
                BrowserConfig::default(),
                launcher.clone(),
                None,
                task_manager.clone(),
            ))
        });

        (
            ProviderManager::new(provider, task_manager, session),
            launcher,
        )
    }

    #[test_log::test(tokio::test)]
    async fn resolves_a_link_end_to_end() {
        let (manager, _) = manager(StubProvider::default());

        let media = manager
            .process_task(task("https://tiktok.com/@u/video/1"), None)
            .await
            .unwrap();

        assert_eq!(media, MediaRef::File("/tmp/video1.mp4".into()));

        let stats = manager.get_combined_stats();
        assert_eq!(stats.tasks.completed_tasks, 1);
        assert_eq!(stats.processing.total_processed, 1);
        assert_eq!(stats.processing.successful, 1);
        assert!(stats.processing.last_processed.is_some());
    }

    #[test_log::test(tokio::test)]
    async fn browser_is_launched_once_and_contexts_are_isolated() {
        let (manager, launcher) = manager(StubProvider {
            needs_browser: true,
            ..Default::default()
        });

        for n in 1..=3 {
            manager
                .process_task(task(&format!("https://tiktok.com/@u/video/{n}")), None)
                .await
                .unwrap();
        }

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.contexts_opened.load(Ordering::SeqCst), 3);
        assert_eq!(launcher.contexts_closed.load(Ordering::SeqCst), 3);
        assert!(manager.health_check().await);
    }

    #[test_log::test(tokio::test)]
    async fn batch_survives_failures() {
        let (manager, _) = manager(StubProvider::default());

        let tasks = [
            task("https://tiktok.com/@u/video/bad"),
            task("https://tiktok.com/@u/video/2"),
            task("https://tiktok.com/@u/video/bad"),
        ];

        let results = manager.process_batch(tasks, None).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_matches!(
            results[0].as_ref().unwrap_err().kind(),
            ErrorKind::Provider {
                source: ProviderError::NothingResolved { .. }
            }
        );
        assert_eq!(
            results[1].as_ref().unwrap(),
            &MediaRef::File("/tmp/video2.mp4".into())
        );
        assert!(results[2].is_err());

        let stats = manager.get_stats();
        assert_eq!((stats.successful, stats.failed), (1, 2));
    }

    #[test_log::test(tokio::test)]
    async fn stream_stops_after_max_tasks() {
        let (manager, _) = manager(StubProvider::default());

        let tasks = stream::iter(1..).map(|n| task(&format!("https://tiktok.com/@u/video/{n}")));

        let results: Vec<_> = manager.process_stream(tasks, None, Some(2)).collect().await;

        let media: Vec<_> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            media,
            [
                MediaRef::File("/tmp/video1.mp4".into()),
                MediaRef::File("/tmp/video2.mp4".into()),
            ]
        );
    }

    #[test_log::test(tokio::test)]
    async fn stream_yields_failures_as_values() {
        let (manager, _) = manager(StubProvider::default());

        let tasks =
            stream::iter(["bad", "7"]).map(|n| task(&format!("https://tiktok.com/@u/video/{n}")));

        let results: Vec<_> = manager.process_stream(tasks, None, None).collect().await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn slow_task_times_out() {
        let (manager, _) = manager(StubProvider {
            delay: Duration::from_secs(20),
            ..Default::default()
        });

        let err = manager
            .process_task(
                task("https://tiktok.com/@u/video/1"),
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();

        assert_matches!(err.kind(), ErrorKind::Timeout { .. });

        manager
            .task_manager()
            .wait_for_completion(None)
            .await
            .unwrap();

        assert_eq!(manager.get_combined_stats().tasks.active_tasks, 0);
    }

    #[test_log::test(tokio::test)]
    async fn restart_relaunches_the_browser() {
        let (manager, launcher) = manager(StubProvider {
            needs_browser: true,
            ..Default::default()
        });

        manager.start().await.unwrap();
        manager.restart().await.unwrap();

        assert!(manager.is_running());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
        assert_eq!(launcher.processes_closed.load(Ordering::SeqCst), 1);

        manager.stop().await.unwrap();
        assert!(!manager.is_running());
        assert!(!manager.health_check().await);
        assert!(manager.task_manager().is_stopped());
    }
}
