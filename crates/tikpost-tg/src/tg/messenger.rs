use super::Bot;
use crate::provider::MediaRef;
use crate::publish::Messenger;
use crate::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::InputFile;

/// Publishes to the telegram channel
pub(crate) struct TgMessenger {
    bot: Bot,
    channel: ChatId,
}

impl TgMessenger {
    pub(crate) fn new(bot: Bot, channel: ChatId) -> Self {
        Self { bot, channel }
    }

    async fn send(&self, video: InputFile, caption: Option<&str>) -> Result {
        let mut request = self
            .bot
            .send_video(self.channel, video)
            .supports_streaming(true);

        if let Some(caption) = caption {
            request = request.caption(caption);
        }

        request.await?;

        Ok(())
    }
}

#[async_trait]
impl Messenger for TgMessenger {
    async fn send_text(&self, text: &str) -> Result {
        self.bot.send_message(self.channel, text).await?;
        Ok(())
    }

    async fn send_video(&self, media: &MediaRef, caption: Option<&str>) -> Result {
        let video = match media {
            MediaRef::File(path) => InputFile::file(path.clone()),
            MediaRef::Url(url) => InputFile::url(url.clone()),
        };
        self.send(video, caption).await
    }

    async fn send_uploaded_video(&self, file_id: &str, caption: Option<&str>) -> Result {
        let video = InputFile::file_id(file_id.to_owned());
        self.send(video, caption).await
    }
}
