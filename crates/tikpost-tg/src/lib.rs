mod browser;
mod config;
mod db;
mod error;
mod facts;
mod observability;
mod provider;
mod proxy;
mod publish;
mod queue;
mod slots;
mod task;
mod tg;

pub mod util;

pub use crate::error::*;
pub use config::*;
pub use observability::*;

#[allow(unused_imports)]
mod prelude {
    pub(crate) use crate::error::prelude::*;
    pub(crate) use crate::observability::logging::prelude::*;
    pub(crate) use crate::util::prelude::*;
}

use browser::{BrowserSessionManager, ChromiumLauncher};
use facts::{FactStore, PgFactStore};
use prelude::*;
use provider::ProviderManager;
use proxy::{PgProxyStore, ProxyRotator};
use publish::{Publisher, PublisherOptions, Scheduler};
use queue::SubmissionQueue;
use slots::{PgSlotStore, SlotStore};
use std::sync::Arc;
use task::{TaskFactory, TaskManager};

/// Run the telegram bot and the publication schedule until Ctrl+C
pub async fn run(config: Config) -> Result {
    let Config {
        tg: tg_cfg,
        db: db_cfg,
        browser: browser_cfg,
        provider: provider_cfg,
        snaptik: snaptik_cfg,
        schedule: schedule_cfg,
    } = config;

    let utc_offset = schedule_cfg.utc_offset();

    let db = db::init(db_cfg).await?;

    let proxies = Arc::new(ProxyRotator::new(Arc::new(PgProxyStore::new(db.clone()))));
    let facts: Arc<dyn FactStore> = Arc::new(PgFactStore::new(db.clone()));
    let slots: Arc<dyn SlotStore> = Arc::new(PgSlotStore::new(db));
    let queue = Arc::new(SubmissionQueue::default());

    let task_manager = Arc::new(TaskManager::new(provider_cfg.max_parallel)?);
    let resource_provider =
        provider::create_provider(&provider_cfg, snaptik_cfg, Some(proxies.clone()));

    let session = resource_provider.needs_browser().then(|| {
        Arc::new(BrowserSessionManager::new(
            browser_cfg,
            Arc::new(ChromiumLauncher),
            Some(proxies.clone()).filter(|_| provider_cfg.use_proxies),
            task_manager.clone(),
        ))
    });

    let provider = Arc::new(ProviderManager::new(
        resource_provider,
        task_manager,
        session,
    ));

    let bot = tg::create_bot(&tg_cfg);

    let publisher = Arc::new(Publisher::new(PublisherOptions {
        facts: facts.clone(),
        queue: queue.clone(),
        provider: provider.clone(),
        tasks: Arc::new(TaskFactory::from_config(&provider_cfg)),
        messenger: Arc::new(tg::TgMessenger::new(bot.clone(), tg_cfg.channel_id)),
        queue_wait: schedule_cfg.queue_wait(),
        task_timeout: Some(provider_cfg.task_timeout()),
    }));

    let scheduler = Scheduler::new(slots.clone(), publisher.clone(), utc_offset);
    let scheduler = tokio::spawn(scheduler.run().instrument(info_span!("scheduler")));

    let result = tg::run_bot(tg::RunBotOptions {
        bot,
        tg_cfg,
        facts,
        slots,
        queue,
        proxies,
        provider: provider.clone(),
        publisher,
        utc_offset,
    })
    .await;

    scheduler.abort();

    provider
        .stop()
        .await
        .warn_on_err("Failed to stop the video processing");

    result
}
