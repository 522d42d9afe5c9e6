//! Telegram glue: the channel transport and the admin interface

mod cmd;
mod config;
mod messenger;
mod submissions;

use crate::facts::FactStore;
use crate::prelude::*;
use crate::provider::ProviderManager;
use crate::proxy::ProxyRotator;
use crate::publish::Publisher;
use crate::queue::SubmissionQueue;
use crate::slots::SlotStore;
use crate::util::DynResult;
use crate::Result;
use chrono::FixedOffset;
use dptree::di::DependencyMap;
use std::future::Future;
use std::sync::Arc;
use teloxide::adaptors::{CacheMe, Throttle, Trace};
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

pub(crate) use config::*;
pub(crate) use messenger::*;

pub(crate) type Bot = Trace<CacheMe<Throttle<teloxide::Bot>>>;

pub(crate) struct Ctx {
    bot: Bot,
    cfg: Arc<Config>,
    facts: Arc<dyn FactStore>,
    slots: Arc<dyn SlotStore>,
    queue: Arc<SubmissionQueue>,
    proxies: Arc<ProxyRotator>,
    provider: Arc<ProviderManager>,
    publisher: Arc<Publisher>,

    /// Offset of the channel's local time, used to display timestamps
    utc_offset: FixedOffset,
}

pub(crate) struct RunBotOptions {
    pub(crate) bot: Bot,
    pub(crate) tg_cfg: Config,
    pub(crate) facts: Arc<dyn FactStore>,
    pub(crate) slots: Arc<dyn SlotStore>,
    pub(crate) queue: Arc<SubmissionQueue>,
    pub(crate) proxies: Arc<ProxyRotator>,
    pub(crate) provider: Arc<ProviderManager>,
    pub(crate) publisher: Arc<Publisher>,
    pub(crate) utc_offset: FixedOffset,
}

/// Must be called within the tokio runtime, because the throttling adaptor
/// spawns its worker
pub(crate) fn create_bot(cfg: &Config) -> Bot {
    teloxide::Bot::new(cfg.token.clone())
        .throttle(Default::default())
        .cache_me()
        .trace(teloxide::adaptors::trace::Settings::all())
}

pub(crate) async fn run_bot(opts: RunBotOptions) -> Result {
    let RunBotOptions {
        bot,
        tg_cfg,
        facts,
        slots,
        queue,
        proxies,
        provider,
        publisher,
        utc_offset,
    } = opts;

    let mut di = DependencyMap::new();

    di.insert(Arc::new(Ctx {
        bot: bot.clone(),
        cfg: Arc::new(tg_cfg),
        facts,
        slots,
        queue,
        proxies,
        provider,
        publisher,
        utc_offset,
    }));

    info!("Starting bot...");

    bot.set_my_commands(cmd::admin::Cmd::bot_commands()).await?;

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<cmd::admin::Cmd>()
                .chain(dptree::filter(cmd::filter_admin))
                .endpoint(cmd::handle::<cmd::admin::Cmd>()),
        )
        .branch(
            Update::filter_message()
                .filter_command::<cmd::admin::Cmd>()
                .endpoint(cmd::deny),
        )
        .branch(
            Update::filter_message()
                .chain(dptree::filter(cmd::filter_admin))
                .chain(dptree::filter_map(submissions::filter_facts_file))
                .endpoint(submissions::handle_facts_file),
        )
        .branch(
            Update::filter_message()
                .chain(dptree::filter(cmd::filter_admin))
                .endpoint(submissions::handle_submission),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(di)
        // We don't handle all possible messages that users send,
        // so to suppress the warning that we don't do this we have
        // a noop default handler here
        .default_handler(|_| std::future::ready(()))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped");

    Ok(())
}

/// Runs the handler and replies to the message with the error if it fails
pub(crate) async fn reply_on_err(
    ctx: &Ctx,
    msg: &Message,
    handler: impl Future<Output = Result>,
) -> DynResult {
    let result = handler.await;

    let Err(err) = &result else {
        return Ok(());
    };

    let span = warn_span!("err", err = tracing_err(err), id = err.id());
    async {
        if !err.is_user_error() {
            warn!("Message handler returned an error");
        }

        let reply = ctx.bot.reply_to(msg, err.display_chain().to_string()).await;

        if let Err(err) = reply {
            warn!(
                err = tracing_err(&err),
                "Failed to reply with the error message to the user"
            );
        }
    }
    .instrument(span)
    .await;

    result.map_err(Into::into)
}
