//! Messages of the admins that aren't commands: fact files and videos
use crate::facts;
use crate::prelude::*;
use crate::queue::{self, Submission};
use crate::util::DynResult;
use crate::{tg, Result};
use std::sync::Arc;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::Document;

const SUBMISSION_HINT: &str = "Send a video or a TikTok link. Supported link formats:\n\
    - https://tiktok.com/@user/video/123456789\n\
    - https://vm.tiktok.com/ABCD1234/\n\
    - https://vt.tiktok.com/XYZ9876/";

pub(crate) fn filter_facts_file(msg: Message) -> Option<Document> {
    msg.document()
        .filter(|doc| {
            doc.file_name
                .as_deref()
                .is_some_and(|name| name.ends_with(".txt"))
        })
        .cloned()
}

pub(crate) async fn handle_facts_file(ctx: Arc<tg::Ctx>, msg: Message, doc: Document) -> DynResult {
    let span = info_span!(
        "handle_facts_file",
        sender = msg.from.as_ref().map(|user| user.debug_id()).as_deref(),
        file_name = doc.file_name.as_deref(),
    );

    tg::reply_on_err(&ctx, &msg, import_facts_file(&ctx, &msg, &doc))
        .instrument(span)
        .await
}

async fn import_facts_file(ctx: &tg::Ctx, msg: &Message, doc: &Document) -> Result {
    let file_name = doc.file_name.as_deref().unwrap_or_default();

    // Fail early before downloading anything
    facts::kind_from_file_name(file_name)?;

    ctx.bot.reply_to(msg, "Loading the file...").await?;

    let file = ctx.bot.get_file(doc.file.id.clone()).await?;

    let mut content: Vec<u8> = vec![];
    ctx.bot
        .inner()
        .inner()
        .inner()
        .download_file(&file.path, &mut content)
        .await?;

    let content = String::from_utf8_lossy(&content);
    let imported = facts::import_facts(ctx.facts.as_ref(), file_name, &content).await?;

    let reply = format!(
        "The {} facts were replaced with {} facts from {file_name}",
        imported.kind, imported.count,
    );

    ctx.bot.reply_to(msg, reply).await?;

    Ok(())
}

pub(crate) async fn handle_submission(ctx: Arc<tg::Ctx>, msg: Message) -> DynResult {
    if !ctx.queue.is_collecting() {
        return Ok(());
    }

    let span = info_span!(
        "handle_submission",
        sender = msg.from.as_ref().map(|user| user.debug_id()).as_deref(),
    );

    tg::reply_on_err(&ctx, &msg, queue_submissions(&ctx, &msg))
        .instrument(span)
        .await
}

async fn queue_submissions(ctx: &tg::Ctx, msg: &Message) -> Result {
    let video = msg.video().map(|video| video.file.id.to_string());
    let submissions = collect_submissions(msg.text(), msg.caption(), video);

    if submissions.is_empty() {
        ctx.bot.reply_to(msg, SUBMISSION_HINT).await?;
        return Ok(());
    }

    let count = submissions.len();
    for submission in submissions {
        info!(?submission, "Queueing a submission");
        ctx.queue.push(submission)?;
    }

    let reply = format!(
        "Added {count} video(s) to the queue, there are {} video(s) in it now",
        ctx.queue.len()
    );

    ctx.bot.reply_to(msg, reply).await?;

    Ok(())
}

/// TikTok links take precedence over the uploaded video. The caption of the
/// uploaded video is published with it.
fn collect_submissions(
    text: Option<&str>,
    caption: Option<&str>,
    video_file_id: Option<String>,
) -> Vec<Submission> {
    let links = [caption, text]
        .into_iter()
        .flatten()
        .map(queue::extract_tiktok_links)
        .find(|links| !links.is_empty())
        .unwrap_or_default();

    if !links.is_empty() {
        return links
            .into_iter()
            .map(|url| Submission::Link { url })
            .collect();
    }

    video_file_id
        .map(|file_id| Submission::Uploaded {
            file_id,
            caption: caption.map(ToOwned::to_owned),
        })
        .into_iter()
        .collect()
}
