use super::{validate_server, NewProxy, ProxyCredential, ProxyError, ProxyId, ProxyStore};
use crate::observability::metrics::PROXIES_ISSUED_TOTAL;
use crate::prelude::*;
use crate::{err, Result};
use std::sync::Arc;

/// Hands out proxies in the least-recently-used order.
///
/// There is no in-memory cursor. The fairness is derived from the
/// `last_used_at` timestamps in the store, so it survives restarts and
/// works across several rotator instances sharing the same store.
pub(crate) struct ProxyRotator {
    store: Arc<dyn ProxyStore>,
}

impl ProxyRotator {
    pub(crate) fn new(store: Arc<dyn ProxyStore>) -> Self {
        Self { store }
    }

    /// Returns `None` if there are no proxies at all. The caller is expected
    /// to operate without a proxy in this case.
    pub(crate) async fn get_next(&self) -> Result<Option<ProxyCredential>> {
        let proxy = self.store.take_least_recently_used().await?;

        match &proxy {
            Some(proxy) => {
                metrics::increment_counter!(PROXIES_ISSUED_TOTAL);
                debug!(id = proxy.id, server = %proxy.server, "Issued a proxy");
            }
            None => debug!("No proxies are registered, going without a proxy"),
        }

        Ok(proxy)
    }

    pub(crate) async fn add(&self, proxy: NewProxy) -> Result<ProxyCredential> {
        validate_server(&proxy.server)?;

        let proxy = self.store.insert(proxy).await?;

        info!(id = proxy.id, server = %proxy.server, "Added a proxy");

        Ok(proxy)
    }

    pub(crate) async fn remove(&self, id: ProxyId) -> Result {
        if !self.store.delete(id).await? {
            return Err(err!(ProxyError::NotFound { id }));
        }

        info!(id, "Removed a proxy");

        Ok(())
    }

    pub(crate) async fn remove_all(&self) -> Result<u64> {
        let removed = self.store.delete_all().await?;
        info!(removed, "Removed all proxies");
        Ok(removed)
    }

    pub(crate) async fn list(&self) -> Result<Vec<ProxyCredential>> {
        self.store.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::memory::MemoryProxyStore;
    use crate::{ErrorKind, ValidationError};
    use assert_matches::assert_matches;
    use chrono::prelude::*;
    use futures::prelude::*;
    use std::collections::HashSet;

    fn proxy(id: ProxyId, last_used_at: Option<DateTime<Utc>>) -> ProxyCredential {
        ProxyCredential {
            id,
            server: format!("http://10.0.0.{id}:8080"),
            username: None,
            password: None,
            last_used_at,
            created_at: Utc::now() - chrono::Duration::hours(1),
        }
    }

    fn rotator(proxies: Vec<ProxyCredential>) -> ProxyRotator {
        ProxyRotator::new(Arc::new(MemoryProxyStore::with_proxies(proxies)))
    }

    #[test_log::test(tokio::test)]
    async fn least_recently_used_goes_first() {
        let now = Utc::now();
        let rotator = rotator(vec![
            proxy(1, Some(now - chrono::Duration::seconds(5))),
            proxy(2, None),
            proxy(3, Some(now - chrono::Duration::seconds(10))),
        ]);

        let mut order = vec![];
        for _ in 0..6 {
            let proxy = rotator.get_next().await.unwrap().unwrap();
            order.push(proxy.id);
        }

        // Never used, then 10s ago, then 5s ago, and the cycle repeats
        assert_eq!(order, [2, 3, 1, 2, 3, 1]);
    }

    #[test_log::test(tokio::test)]
    async fn issuing_marks_the_proxy_as_used() {
        let rotator = rotator(vec![proxy(1, None)]);

        let issued = rotator.get_next().await.unwrap().unwrap();
        assert!(issued.last_used_at.is_some());

        let stored = rotator.list().await.unwrap();
        assert_eq!(stored[0].last_used_at, issued.last_used_at);
    }

    #[test_log::test(tokio::test)]
    async fn no_proxies_is_not_an_error() {
        let rotator = rotator(vec![]);
        assert_matches!(rotator.get_next().await, Ok(None));
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn concurrent_callers_get_distinct_proxies() {
        let rotator = Arc::new(rotator((1..=8).map(|id| proxy(id, None)).collect()));

        let issued: Vec<_> = (0..8)
            .map(|_| {
                let rotator = rotator.clone();
                tokio::spawn(async move { rotator.get_next().await.unwrap().unwrap().id })
            })
            .collect::<stream::FuturesUnordered<_>>()
            .try_collect()
            .await
            .unwrap();

        let unique: HashSet<_> = issued.iter().copied().collect();
        assert_eq!(unique.len(), 8, "{issued:?}");
    }

    #[test_log::test(tokio::test)]
    async fn add_validates_the_server() {
        let rotator = rotator(vec![]);

        let err = rotator
            .add(NewProxy {
                server: "not-a-url".to_owned(),
                username: None,
                password: None,
            })
            .await
            .unwrap_err();

        assert_matches!(
            err.kind(),
            ErrorKind::Validation {
                source: ValidationError::ProxyServer { .. }
            }
        );

        let added = rotator
            .add(NewProxy {
                server: "http://1.2.3.4:8080".to_owned(),
                username: None,
                password: None,
            })
            .await
            .unwrap();

        let listed = rotator.list().await.unwrap();
        assert_eq!(listed, [added]);
    }

    #[test_log::test(tokio::test)]
    async fn remove_unknown_proxy_fails() {
        let rotator = rotator(vec![proxy(1, None), proxy(2, None)]);

        let err = rotator.remove(42).await.unwrap_err();
        assert_matches!(
            err.kind(),
            ErrorKind::Proxy {
                source: ProxyError::NotFound { id: 42 }
            }
        );

        rotator.remove(1).await.unwrap();
        assert_eq!(rotator.list().await.unwrap().len(), 1);

        assert_eq!(rotator.remove_all().await.unwrap(), 1);
        assert!(rotator.list().await.unwrap().is_empty());
    }
}
