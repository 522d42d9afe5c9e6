use super::FactKind;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub(crate) trait FactStore: Send + Sync {
    /// Removes the oldest fact of the given kind and returns it
    async fn next_fact(&self, kind: FactKind) -> Result<Option<String>>;

    async fn count(&self, kind: FactKind) -> Result<u64>;

    /// Appends the facts to the end of the pool. Returns the number of
    /// added facts.
    async fn add_batch(&self, kind: FactKind, texts: Vec<String>) -> Result<u64>;

    /// Returns the number of removed facts
    async fn remove_all(&self, kind: FactKind) -> Result<u64>;

    /// Atomically replaces the whole pool with the given facts
    async fn replace(&self, kind: FactKind, texts: Vec<String>) -> Result<u64>;
}

pub(crate) struct PgFactStore {
    db: sqlx::PgPool,
}

impl PgFactStore {
    pub(crate) fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FactStore for PgFactStore {
    async fn next_fact(&self, kind: FactKind) -> Result<Option<String>> {
        // Concurrent publications must never get the same fact
        let text = sqlx::query_scalar(
            "delete from facts
            where id = (
                select id from facts
                where kind = $1
                order by id asc
                limit 1
                for update skip locked
            )
            returning text",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.db)
        .await?;

        Ok(text)
    }

    async fn count(&self, kind: FactKind) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("select count(*) from facts where kind = $1")
            .bind(kind.as_str())
            .fetch_one(&self.db)
            .await?;

        Ok(count.unsigned_abs())
    }

    async fn add_batch(&self, kind: FactKind, texts: Vec<String>) -> Result<u64> {
        insert_facts(&self.db, kind, texts).await
    }

    async fn remove_all(&self, kind: FactKind) -> Result<u64> {
        let result = sqlx::query("delete from facts where kind = $1")
            .bind(kind.as_str())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    async fn replace(&self, kind: FactKind, texts: Vec<String>) -> Result<u64> {
        let mut tx = self.db.begin().await?;

        sqlx::query("delete from facts where kind = $1")
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await?;

        let added = insert_facts(&mut *tx, kind, texts).await?;

        tx.commit().await?;

        Ok(added)
    }
}

async fn insert_facts<'c>(
    executor: impl sqlx::PgExecutor<'c>,
    kind: FactKind,
    texts: Vec<String>,
) -> Result<u64> {
    // `unnest` preserves the order of the array, so do the ids
    let result = sqlx::query(
        "insert into facts (kind, text)
        select $1, text from unnest($2::text[]) with ordinality as t(text, n)
        order by n",
    )
    .bind(kind.as_str())
    .bind(texts)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    #[derive(Default)]
    pub(crate) struct MemoryFactStore {
        pools: Mutex<HashMap<FactKind, VecDeque<String>>>,
    }

    #[async_trait]
    impl FactStore for MemoryFactStore {
        async fn next_fact(&self, kind: FactKind) -> Result<Option<String>> {
            Ok(self.pools.lock().entry(kind).or_default().pop_front())
        }

        async fn count(&self, kind: FactKind) -> Result<u64> {
            Ok(self
                .pools
                .lock()
                .get(&kind)
                .map_or(0, |pool| pool.len() as u64))
        }

        async fn add_batch(&self, kind: FactKind, texts: Vec<String>) -> Result<u64> {
            let added = texts.len() as u64;
            self.pools.lock().entry(kind).or_default().extend(texts);
            Ok(added)
        }

        async fn remove_all(&self, kind: FactKind) -> Result<u64> {
            let removed = self.pools.lock().remove(&kind).unwrap_or_default();
            Ok(removed.len() as u64)
        }

        async fn replace(&self, kind: FactKind, texts: Vec<String>) -> Result<u64> {
            let added = texts.len() as u64;
            self.pools.lock().insert(kind, texts.into());
            Ok(added)
        }
    }
}
