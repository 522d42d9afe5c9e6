use super::{
    BrowserConfig, BrowserLauncher, BrowserProcess, ContextLease, Fingerprint, LaunchOptions,
};
use crate::observability::metrics::BROWSER_LAUNCHES_TOTAL;
use crate::prelude::*;
use crate::proxy::{ProxyCredential, ProxyError, ProxyRotator};
use crate::task::TaskManager;
use crate::{err, fatal, LifecycleError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound of time to wait for the in-flight tasks when stopping
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum SessionPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
}

struct SessionState {
    phase: SessionPhase,
    process: Option<Arc<dyn BrowserProcess>>,
    fingerprint: Option<Arc<Fingerprint>>,
    proxy: Option<ProxyCredential>,
}

/// Everything a task needs to open its own browsing context
#[derive(Clone)]
pub(crate) struct BrowserDeps {
    pub(crate) process: Arc<dyn BrowserProcess>,
    pub(crate) fingerprint: Arc<Fingerprint>,
    pub(crate) config: Arc<BrowserConfig>,
}

impl BrowserDeps {
    pub(crate) async fn new_context(&self) -> Result<ContextLease> {
        let context = self.process.new_context(&self.fingerprint).await?;
        Ok(ContextLease::new(context))
    }
}

/// Owns the single browser process shared by all tasks.
///
/// Lifecycle transitions (start, stop, restart) are serialized with an async
/// mutex, so concurrent `start()` calls launch at most one process. The state
/// itself sits behind a sync lock for cheap reads from the tasks.
pub(crate) struct BrowserSessionManager {
    config: Arc<BrowserConfig>,
    launcher: Arc<dyn BrowserLauncher>,
    proxies: Option<Arc<ProxyRotator>>,
    task_manager: Arc<TaskManager>,
    lifecycle: tokio::sync::Mutex<()>,
    state: RwLock<SessionState>,
}

impl BrowserSessionManager {
    pub(crate) fn new(
        config: BrowserConfig,
        launcher: Arc<dyn BrowserLauncher>,
        proxies: Option<Arc<ProxyRotator>>,
        task_manager: Arc<TaskManager>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            launcher,
            proxies,
            task_manager,
            lifecycle: Default::default(),
            state: RwLock::new(SessionState {
                phase: SessionPhase::Stopped,
                process: None,
                fingerprint: None,
                proxy: None,
            }),
        }
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.state.read().phase
    }

    pub(crate) fn proxy(&self) -> Option<ProxyCredential> {
        self.state.read().proxy.clone()
    }

    /// Launches the browser unless it's already running
    pub(crate) async fn start(&self) -> Result {
        let _lifecycle = self.lifecycle.lock().await;

        if self.phase() == SessionPhase::Running {
            debug!("Browser is already running, nothing to start");
            return Ok(());
        }

        self.launch_locked(SessionPhase::Starting).await
    }

    /// Returns the handles of the running browser, launching it if needed
    pub(crate) async fn ensure_ready(&self) -> Result<BrowserDeps> {
        if let Some(deps) = self.running_deps()? {
            return Ok(deps);
        }

        self.start().await?;

        match self.running_deps()? {
            Some(deps) => Ok(deps),
            None => Err(fatal!("BUG: browser is not running right after the start")),
        }
    }

    /// Opens an isolated context. The caller must release the lease when done.
    pub(crate) async fn new_context_for_task(&self) -> Result<ContextLease> {
        self.ensure_ready().await?.new_context().await
    }

    /// Stops accepting new tasks, waits for the in-flight ones and closes
    /// the browser process
    pub(crate) async fn stop(&self) -> Result {
        let _lifecycle = self.lifecycle.lock().await;

        if self.phase() == SessionPhase::Stopped {
            debug!("Browser is already stopped");
            return Ok(());
        }

        self.stop_locked(SessionPhase::Stopping).await
    }

    /// Relaunches the browser with a fresh fingerprint and proxy
    pub(crate) async fn restart(&self) -> Result {
        let _lifecycle = self.lifecycle.lock().await;

        info!("Restarting the browser");

        if self.phase() != SessionPhase::Stopped {
            self.stop_locked(SessionPhase::Restarting).await?;
        }

        self.launch_locked(SessionPhase::Restarting).await
    }

    /// Opens and immediately closes a throwaway context. Never fails.
    pub(crate) async fn health_check(&self) -> bool {
        let Some(deps) = self.running_deps().ok().flatten() else {
            return false;
        };

        let result = async {
            let lease = deps.new_context().await?;
            lease.release().await;
            Ok::<_, crate::Error>(())
        }
        .await;

        result.warn_on_err("Browser health check failed").is_some()
    }

    fn running_deps(&self) -> Result<Option<BrowserDeps>> {
        let state = self.state.read();
        match state.phase {
            SessionPhase::Running => {}
            SessionPhase::Stopping => {
                return Err(err!(LifecycleError::ShuttingDown {
                    component: "browser session",
                }))
            }
            SessionPhase::Stopped | SessionPhase::Starting | SessionPhase::Restarting => {
                return Ok(None)
            }
        }

        let (Some(process), Some(fingerprint)) = (&state.process, &state.fingerprint) else {
            return Err(fatal!("BUG: running browser session has no process"));
        };

        Ok(Some(BrowserDeps {
            process: process.clone(),
            fingerprint: fingerprint.clone(),
            config: self.config.clone(),
        }))
    }

    fn set_phase(&self, phase: SessionPhase) {
        let mut state = self.state.write();
        debug!(from = %state.phase, to = %phase, "Browser session phase transition");
        state.phase = phase;
    }

    async fn launch_locked(&self, phase: SessionPhase) -> Result {
        self.set_phase(phase);

        let result = self.launch().await;

        let mut state = self.state.write();
        match result {
            Ok((process, fingerprint, proxy)) => {
                state.phase = SessionPhase::Running;
                state.process = Some(process);
                state.fingerprint = Some(Arc::new(fingerprint));
                state.proxy = proxy;
                drop(state);

                self.task_manager.resume();
                Ok(())
            }
            Err(err) => {
                state.phase = SessionPhase::Stopped;
                Err(err)
            }
        }
    }

    async fn launch(
        &self,
    ) -> Result<(
        Arc<dyn BrowserProcess>,
        Fingerprint,
        Option<ProxyCredential>,
    )> {
        let fingerprint = Fingerprint::random();

        let proxy = match &self.proxies {
            Some(proxies) => proxies.get_next().await?,
            None => None,
        };

        if proxy.is_none() && self.config.require_proxy {
            return Err(err!(ProxyError::Required));
        }

        let options = LaunchOptions {
            args: self.config.launch_args(&fingerprint),
            headless: self.config.headless,
            executable: self.config.executable.clone(),
            window: (self.config.window_width, self.config.window_height),
            proxy: proxy.clone(),
        };

        let span = info_span!(
            "launch_browser",
            user_agent = %fingerprint.user_agent,
            proxy = proxy.as_ref().map(|proxy| proxy.id),
        );

        let process = self
            .launcher
            .launch(options)
            .with_duration_log("Launched the browser")
            .instrument(span)
            .await?;

        metrics::increment_counter!(BROWSER_LAUNCHES_TOTAL);

        Ok((process, fingerprint, proxy))
    }

    async fn stop_locked(&self, phase: SessionPhase) -> Result {
        self.set_phase(phase);

        self.task_manager.stop();

        if self
            .task_manager
            .wait_for_completion(Some(DRAIN_TIMEOUT))
            .await
            .is_err()
        {
            warn!(
                timeout = tracing_duration(DRAIN_TIMEOUT),
                active = self.task_manager.get_stats().active_tasks,
                "In-flight tasks didn't finish in time, closing the browser anyway"
            );
        }

        let process = {
            let mut state = self.state.write();
            state.fingerprint = None;
            state.proxy = None;
            state.process.take()
        };

        let result = match process {
            Some(process) => {
                process
                    .close()
                    .with_duration_log("Closed the browser")
                    .await
            }
            None => Ok(()),
        };

        self.set_phase(SessionPhase::Stopped);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeLauncher;
    use crate::proxy::memory::MemoryProxyStore;
    use crate::proxy::NewProxy;
    use crate::ErrorKind;
    use assert_matches::assert_matches;
    use std::sync::atomic::Ordering;

    fn manager(
        launcher: Arc<FakeLauncher>,
        proxies: Option<Arc<ProxyRotator>>,
        config: BrowserConfig,
    ) -> BrowserSessionManager {
        let task_manager = Arc::new(TaskManager::new(3).unwrap());
        BrowserSessionManager::new(config, launcher, proxies, task_manager)
    }

    #[test_log::test(tokio::test)]
    async fn start_is_idempotent() {
        let launcher = Arc::new(FakeLauncher::default());
        let session = manager(launcher.clone(), None, BrowserConfig::default());

        session.start().await.unwrap();
        session.start().await.unwrap();

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(session.phase(), SessionPhase::Running);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn concurrent_starts_launch_one_process() {
        let launcher = Arc::new(FakeLauncher::default());
        let session = Arc::new(manager(launcher.clone(), None, BrowserConfig::default()));

        let starts: Vec<_> = (0..10)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.ensure_ready().await.map(drop) })
            })
            .collect();

        for start in starts {
            start.await.unwrap().unwrap();
        }

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn fingerprint_is_kept_until_restart() {
        let launcher = Arc::new(FakeLauncher::default());
        let session = manager(launcher.clone(), None, BrowserConfig::default());

        let first = session.ensure_ready().await.unwrap().fingerprint;
        let second = session.ensure_ready().await.unwrap().fingerprint;
        assert!(Arc::ptr_eq(&first, &second));

        session.restart().await.unwrap();

        let third = session.ensure_ready().await.unwrap().fingerprint;
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
        assert_eq!(launcher.processes_closed.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn one_proxy_per_launch() {
        let rotator = Arc::new(ProxyRotator::new(Arc::new(MemoryProxyStore::default())));
        for server in ["http://1.1.1.1:80", "http://2.2.2.2:80"] {
            rotator
                .add(NewProxy {
                    server: server.to_owned(),
                    username: None,
                    password: None,
                })
                .await
                .unwrap();
        }

        let launcher = Arc::new(FakeLauncher::default());
        let session = manager(
            launcher.clone(),
            Some(rotator.clone()),
            BrowserConfig::default(),
        );

        for _ in 0..3 {
            session
                .new_context_for_task()
                .await
                .unwrap()
                .release()
                .await;
        }

        let proxy = launcher.last_proxy.lock().clone().unwrap();
        assert_eq!(proxy.server, "http://1.1.1.1:80");
        assert_eq!(session.proxy(), Some(proxy));

        // The second proxy is still untouched
        let next = rotator.get_next().await.unwrap().unwrap();
        assert_eq!(next.server, "http://2.2.2.2:80");

        assert_eq!(launcher.contexts_opened.load(Ordering::SeqCst), 3);
        assert_eq!(launcher.contexts_closed.load(Ordering::SeqCst), 3);
    }

    #[test_log::test(tokio::test)]
    async fn required_proxy_is_enforced() {
        let rotator = Arc::new(ProxyRotator::new(Arc::new(MemoryProxyStore::default())));
        let launcher = Arc::new(FakeLauncher::default());
        let config = BrowserConfig {
            require_proxy: true,
            ..Default::default()
        };
        let session = manager(launcher.clone(), Some(rotator), config);

        let err = session.start().await.unwrap_err();
        assert_matches!(
            err.kind(),
            ErrorKind::Proxy {
                source: ProxyError::Required
            }
        );
        assert_eq!(session.phase(), SessionPhase::Stopped);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[test_log::test(tokio::test)]
    async fn stop_closes_the_process_and_stops_the_task_manager() {
        let launcher = Arc::new(FakeLauncher::default());
        let task_manager = Arc::new(TaskManager::new(3).unwrap());
        let session = BrowserSessionManager::new(
            BrowserConfig::default(),
            launcher.clone(),
            None,
            task_manager.clone(),
        );

        session.start().await.unwrap();
        session.stop().await.unwrap();
        session.stop().await.unwrap();

        assert_eq!(session.phase(), SessionPhase::Stopped);
        assert!(task_manager.is_stopped());
        assert_eq!(launcher.processes_closed.load(Ordering::SeqCst), 1);
        assert!(!session.health_check().await);

        session.start().await.unwrap();
        assert!(!task_manager.is_stopped());
    }

    #[test_log::test(tokio::test)]
    async fn health_check() {
        let launcher = Arc::new(FakeLauncher::default());
        let session = manager(launcher.clone(), None, BrowserConfig::default());

        assert!(!session.health_check().await);

        session.start().await.unwrap();
        assert!(session.health_check().await);
        assert_eq!(launcher.contexts_closed.load(Ordering::SeqCst), 1);

        let broken = Arc::new(FakeLauncher {
            fail_contexts: true,
            ..Default::default()
        });
        let session = manager(broken, None, BrowserConfig::default());
        session.start().await.unwrap();
        assert!(!session.health_check().await);
    }
}
