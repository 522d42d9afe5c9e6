pub(crate) mod admin;

use crate::prelude::*;
use crate::util::DynResult;
use crate::{tg, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use teloxide::types::{Message, User};

#[async_trait]
pub(crate) trait Command: fmt::Debug + Send + Sync + 'static {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result;
}

pub(crate) fn handle<'a, C: Command>(
) -> impl Fn(Arc<tg::Ctx>, Message, C) -> BoxFuture<'a, DynResult> {
    move |ctx, msg, cmd| {
        let info = info_span!(
            "handle_command",
            sender = msg.from.as_ref().map(User::debug_id).as_deref(),
            chat = %msg.chat.debug_id(),
            cmd = format_args!("{cmd:?}")
        );

        let fut = async move {
            debug!("Processing command");
            tg::reply_on_err(&ctx, &msg, cmd.handle(&ctx, &msg)).await
        };

        Box::pin(fut.instrument(info))
    }
}

pub(crate) fn filter_admin(ctx: Arc<tg::Ctx>, msg: Message) -> bool {
    matches!(&msg.from, Some(sender) if ctx.cfg.is_admin(sender.id))
}

pub(crate) async fn deny(ctx: Arc<tg::Ctx>, msg: Message) -> DynResult {
    info!(
        sender = msg.from.as_ref().map(User::debug_id).as_deref(),
        "Non-admin user tried to access an admin command"
    );

    ctx.bot
        .reply_to(&msg, "Insufficient rights to run this command")
        .await?;

    Ok(())
}
