use crate::facts::FactKind;
use crate::prelude::*;
use crate::provider::CombinedStats;
use crate::proxy::{self, ProxyCredential, ProxyId};
use crate::publish::Outcome;
use crate::queue::QueueStats;
use crate::slots::{self, ContentType, NewSlot};
use crate::task::ActiveTask;
use crate::{err, tg, Result, ValidationError};
use async_trait::async_trait;
use chrono::prelude::*;
use itertools::Itertools;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "snake_case", description = "Admin commands:")]
pub(crate) enum Cmd {
    #[command(description = "show this text")]
    Help,

    #[command(
        description = "add a publication slot: <day> <HH:MM> <short_fact|medium_fact|video>"
    )]
    AddSlot(String),

    #[command(description = "remove all publication slots")]
    ClearSlots,

    #[command(description = "show the weekly publication schedule")]
    Slots,

    #[command(description = "start collecting videos and TikTok links into the queue")]
    VideoModeStart,

    #[command(description = "stop collecting videos")]
    VideoModeStop,

    #[command(description = "show the number of queued videos")]
    VideoRemaining,

    #[command(description = "remove all queued videos")]
    VideoClear,

    #[command(description = "show the number of remaining facts")]
    Remaining,

    #[command(description = "publish the next queued video to the channel right now")]
    TestPost,

    #[command(description = "add a proxy: scheme://[user[:password]@]host:port")]
    AddProxy(String),

    #[command(description = "remove the proxy with the given id")]
    RemoveProxy(ProxyId),

    #[command(description = "remove all proxies")]
    ClearProxies,

    #[command(description = "list the proxies")]
    Proxies,

    #[command(description = "show the statistics of the video processing")]
    Stats,

    #[command(description = "check whether the video processing works")]
    Health,

    #[command(description = "restart the browser used for the video processing")]
    RestartBrowser,
}

#[async_trait]
impl tg::cmd::Command for Cmd {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result {
        let reply = match self {
            Cmd::Help => {
                ctx.bot.reply_help::<Cmd>(msg).await?;
                return Ok(());
            }
            Cmd::AddSlot(args) => {
                let slot = ctx.slots.add(parse_slot_args(&args)?).await?;
                format!(
                    "Slot added: {} {} {}",
                    slots::weekday_name(slot.weekday),
                    slot.time.format("%H:%M"),
                    slot.content_type,
                )
            }
            Cmd::ClearSlots => {
                let removed = ctx.slots.clear().await?;
                format!("Removed {removed} publication slot(s)")
            }
            Cmd::Slots => slots::format_schedule(&ctx.slots.all().await?),
            Cmd::VideoModeStart => {
                ctx.queue.set_collecting(true);
                "Video collection mode is ON. Send videos or TikTok links, \
                they will be added to the queue."
                    .to_owned()
            }
            Cmd::VideoModeStop => {
                ctx.queue.set_collecting(false);
                "Video collection mode is OFF. New videos are not accepted.".to_owned()
            }
            Cmd::VideoRemaining => {
                format!("There are {} video(s) in the queue", ctx.queue.len())
            }
            Cmd::VideoClear => {
                let removed = ctx.queue.clear();
                format!("Removed {removed} video(s) from the queue")
            }
            Cmd::Remaining => {
                let short = ctx.facts.count(FactKind::Short).await?;
                let medium = ctx.facts.count(FactKind::Medium).await?;
                format!("Remaining facts:\n- short: {short}\n- medium: {medium}")
            }
            Cmd::TestPost => {
                ctx.bot
                    .reply_to(msg, "Publishing the next video to the channel...")
                    .await?;

                match ctx.publisher.publish(ContentType::Video).await? {
                    Outcome::Published => "The video was published".to_owned(),
                    Outcome::EmptyQueue => "There are no videos in the queue".to_owned(),
                    Outcome::EmptyPool(kind) => format!("There are no {kind} facts left"),
                }
            }
            Cmd::AddProxy(input) => {
                let proxy = ctx.proxies.add(proxy::parse_proxy(&input)?).await?;
                format!("Proxy {} added: {}", proxy.id, proxy.server)
            }
            Cmd::RemoveProxy(id) => {
                ctx.proxies.remove(id).await?;
                format!("Proxy {id} removed")
            }
            Cmd::ClearProxies => {
                let removed = ctx.proxies.remove_all().await?;
                format!("Removed {removed} proxies")
            }
            Cmd::Proxies => format_proxies(&ctx.proxies.list().await?, ctx.utc_offset),
            Cmd::Stats => format_stats(
                &ctx.provider.get_combined_stats(),
                &ctx.queue.stats(),
                &ctx.provider.task_manager().active_tasks_info(),
                ctx.utc_offset,
            ),
            Cmd::Health => {
                let healthy = ctx.provider.health_check().await;
                let status = if healthy { "healthy" } else { "NOT healthy" };
                let phase = ctx
                    .provider
                    .session()
                    .map(|session| format!(", browser is {}", session.phase()))
                    .unwrap_or_default();
                format!("Video processing is {status}{phase}")
            }
            Cmd::RestartBrowser => {
                ctx.provider.restart().await?;
                "Video processing was restarted".to_owned()
            }
        };

        ctx.bot.reply_to(msg, reply).await?;

        Ok(())
    }
}

fn parse_slot_args(args: &str) -> Result<NewSlot> {
    let Some((weekday, time, content_type)) = args.split_whitespace().collect_tuple() else {
        return Err(err!(ValidationError::SlotArgs { input: args }));
    };

    NewSlot::parse(weekday, time, content_type)
}

fn format_proxies(proxies: &[ProxyCredential], offset: FixedOffset) -> String {
    if proxies.is_empty() {
        return "No proxies are registered".to_owned();
    }

    proxies
        .iter()
        .map(|proxy| {
            let auth = if proxy.has_credentials() {
                " (with credentials)"
            } else {
                ""
            };
            let last_used = proxy
                .last_used_at
                .map(|time| time.to_human_readable(offset))
                .unwrap_or_else(|| "never".to_owned());

            format!(
                "{}. {}{auth}, last used: {last_used}",
                proxy.id, proxy.server
            )
        })
        .join("\n")
}

fn format_stats(
    stats: &CombinedStats,
    queue: &QueueStats,
    active: &[ActiveTask],
    offset: FixedOffset,
) -> String {
    let CombinedStats {
        provider,
        processing,
        tasks,
    } = stats;

    let last_processed = processing
        .last_processed
        .map(|time| time.to_human_readable(offset))
        .unwrap_or_else(|| "never".to_owned());

    let collecting = if queue.collecting { "on" } else { "off" };

    let mut lines = vec![
        format!("Provider: {provider}"),
        format!(
            "Tasks: {} active of {} max, {} completed, {} failed ({:.1}% success)",
            tasks.active_tasks,
            tasks.max_parallel,
            tasks.completed_tasks,
            tasks.failed_tasks,
            tasks.success_rate * 100.0,
        ),
        format!(
            "Processed: {} total, {} successful, {} failed, last at {last_processed}",
            processing.total_processed, processing.successful, processing.failed,
        ),
        format!(
            "Queue: {} video(s), {} added, {} taken, collection mode is {collecting}",
            queue.len, queue.added, queue.taken,
        ),
    ];

    if !active.is_empty() {
        lines.push("Active tasks:".to_owned());
        lines.extend(
            active
                .iter()
                .map(|task| format!("  {} {} for {:.0?}", task.id, task.kind, task.elapsed())),
        );
    }

    lines.join("\n")
}
