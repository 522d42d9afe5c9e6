use serde::Deserialize;
use teloxide::types::{ChatId, UserId};

#[derive(Deserialize, Clone)]
pub(crate) struct Config {
    pub(crate) token: String,

    /// Channel where the scheduled content is published
    pub(crate) channel_id: ChatId,

    /// IDs of the users who have full access to the bot
    #[serde(default)]
    pub(crate) admin_ids: Vec<u64>,
}

impl Config {
    pub(crate) fn is_admin(&self, user: UserId) -> bool {
        self.admin_ids.contains(&user.0)
    }
}
