use easy_ext::ext;
use teloxide::payloads::SendMessageSetters;
use teloxide::requests::Requester;
use teloxide::types::{Chat, Message, ReplyParameters, User};

pub(crate) mod prelude {
    pub(crate) use super::{ChatExt as _, UserExt as _, UtilRequesterExt as _};
}

#[ext(UserExt)]
pub(crate) impl User {
    fn username(&self) -> String {
        self.username.clone().unwrap_or_else(|| self.full_name())
    }

    fn debug_id(&self) -> String {
        format!("{} ({})", self.username(), self.id)
    }
}

#[ext(ChatExt)]
pub(crate) impl Chat {
    fn debug_id(&self) -> String {
        let title = self.title().unwrap_or("{{unknown_chat_title}}");
        let username = self
            .username()
            .map(|name| format!("{name}, "))
            .unwrap_or_default();

        format!("{title} ({username}{})", self.id)
    }
}

/// There is [`RequesterExt`] in [`teloxide::prelude`]. We name this symbol
/// different to avoid collisions.
///
/// [`RequesterExt`]: teloxide::requests::RequesterExt
#[ext(UtilRequesterExt)]
pub(crate) impl<T: Requester> T {
    fn reply_to(&self, msg: &Message, text: impl Into<String>) -> T::SendMessage {
        self.send_message(msg.chat.id, text)
            .reply_parameters(ReplyParameters::new(msg.id).allow_sending_without_reply())
    }

    fn reply_help<Cmd: teloxide::utils::command::BotCommands>(
        &self,
        msg: &Message,
    ) -> T::SendMessage {
        self.reply_to(msg, Cmd::descriptions().to_string())
    }
}
