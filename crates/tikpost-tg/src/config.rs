use crate::{browser, db, provider, publish, tg};
use serde::de::DeserializeOwned;

pub struct Config {
    pub(crate) tg: tg::Config,
    pub(crate) db: db::Config,
    pub(crate) browser: browser::BrowserConfig,
    pub(crate) provider: provider::Config,
    pub(crate) snaptik: provider::SnaptikConfig,
    pub(crate) schedule: publish::Config,
}

impl Config {
    pub fn load_or_panic() -> Config {
        Self {
            tg: from_env_or_panic("TG_"),
            db: from_env_or_panic("DATABASE_"),
            browser: from_env_or_panic("BROWSER_"),
            provider: from_env_or_panic("PROVIDER_"),
            snaptik: from_env_or_panic("SNAPTIK_"),
            schedule: from_env_or_panic("SCHEDULE_"),
        }
    }
}

pub(crate) fn from_env_or_panic<T: DeserializeOwned>(prefix: &str) -> T {
    envy::prefixed(prefix).from_env().unwrap_or_else(|err| {
        panic!(
            "BUG: Couldn't load config from environment for {}: {:#?}",
            std::any::type_name::<T>(),
            err
        );
    })
}
