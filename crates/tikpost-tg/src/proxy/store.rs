use super::{NewProxy, ProxyCredential, ProxyId};
use crate::Result;
use async_trait::async_trait;

/// Persistent storage of proxy credentials
#[async_trait]
pub(crate) trait ProxyStore: Send + Sync {
    async fn insert(&self, proxy: NewProxy) -> Result<ProxyCredential>;

    /// Returns `false` if there was no proxy with the given id
    async fn delete(&self, id: ProxyId) -> Result<bool>;

    /// Returns the number of deleted proxies
    async fn delete_all(&self) -> Result<u64>;

    async fn list(&self) -> Result<Vec<ProxyCredential>>;

    /// Selects the proxy with the oldest `last_used_at` (never used proxies
    /// go first) and marks it as used right now. The selection and the update
    /// must be atomic, such that concurrent callers never get the same proxy
    /// while there are other candidates.
    async fn take_least_recently_used(&self) -> Result<Option<ProxyCredential>>;
}

pub(crate) struct PgProxyStore {
    db: sqlx::PgPool,
}

impl PgProxyStore {
    pub(crate) fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProxyStore for PgProxyStore {
    async fn insert(&self, proxy: NewProxy) -> Result<ProxyCredential> {
        let NewProxy {
            server,
            username,
            password,
        } = proxy;

        let proxy = sqlx::query_as(
            "insert into proxies (server, username, password)
            values ($1, $2, $3)
            returning id, server, username, password, last_used_at, created_at",
        )
        .bind(server)
        .bind(username)
        .bind(password)
        .fetch_one(&self.db)
        .await?;

        Ok(proxy)
    }

    async fn delete(&self, id: ProxyId) -> Result<bool> {
        let result = sqlx::query("delete from proxies where id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("delete from proxies").execute(&self.db).await?;
        Ok(result.rows_affected())
    }

    async fn list(&self) -> Result<Vec<ProxyCredential>> {
        let proxies = sqlx::query_as(
            "select id, server, username, password, last_used_at, created_at
            from proxies
            order by id",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(proxies)
    }

    async fn take_least_recently_used(&self) -> Result<Option<ProxyCredential>> {
        // `skip locked` makes concurrent callers pick different rows instead
        // of waiting for each other and then updating the same proxy twice.
        // `clock_timestamp()` is used instead of `now()` to keep the order
        // strict even for the calls made within a single transaction.
        let proxy = sqlx::query_as(
            "update proxies set last_used_at = clock_timestamp()
            where id = (
                select id from proxies
                order by last_used_at asc nulls first, id asc
                limit 1
                for update skip locked
            )
            returning id, server, username, password, last_used_at, created_at",
        )
        .fetch_optional(&self.db)
        .await?;

        Ok(proxy)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use chrono::prelude::*;
    use parking_lot::Mutex;

    /// In-memory store used in tests
    #[derive(Default)]
    pub(crate) struct MemoryProxyStore {
        proxies: Mutex<Vec<ProxyCredential>>,
    }

    impl MemoryProxyStore {
        pub(crate) fn with_proxies(proxies: Vec<ProxyCredential>) -> Self {
            Self {
                proxies: Mutex::new(proxies),
            }
        }
    }

    #[async_trait]
    impl ProxyStore for MemoryProxyStore {
        async fn insert(&self, proxy: NewProxy) -> Result<ProxyCredential> {
            let mut proxies = self.proxies.lock();
            let id = proxies.iter().map(|proxy| proxy.id).max().unwrap_or(0) + 1;
            let proxy = ProxyCredential {
                id,
                server: proxy.server,
                username: proxy.username,
                password: proxy.password,
                last_used_at: None,
                created_at: Utc::now(),
            };
            proxies.push(proxy.clone());
            Ok(proxy)
        }

        async fn delete(&self, id: ProxyId) -> Result<bool> {
            let mut proxies = self.proxies.lock();
            let len = proxies.len();
            proxies.retain(|proxy| proxy.id != id);
            Ok(proxies.len() != len)
        }

        async fn delete_all(&self) -> Result<u64> {
            let mut proxies = self.proxies.lock();
            let len = proxies.len();
            proxies.clear();
            Ok(len as u64)
        }

        async fn list(&self) -> Result<Vec<ProxyCredential>> {
            Ok(self.proxies.lock().clone())
        }

        async fn take_least_recently_used(&self) -> Result<Option<ProxyCredential>> {
            let mut proxies = self.proxies.lock();

            // The clock may return the same value for consecutive calls, so
            // the new timestamp is forced to be later than all existing ones.
            let latest = proxies.iter().filter_map(|proxy| proxy.last_used_at).max();
            let now = match latest {
                Some(latest) => Utc::now().max(latest + chrono::Duration::microseconds(1)),
                None => Utc::now(),
            };

            // `None` orders before `Some`, which puts never used proxies first
            let Some(proxy) = proxies
                .iter_mut()
                .min_by_key(|proxy| (proxy.last_used_at, proxy.id))
            else {
                return Ok(None);
            };

            proxy.last_used_at = Some(now);
            Ok(Some(proxy.clone()))
        }
    }
}
