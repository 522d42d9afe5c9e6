use super::{ContentType, NewSlot, PublicationSlot};
use crate::prelude::*;
use crate::Result;
use async_trait::async_trait;
use chrono::prelude::*;

#[async_trait]
pub(crate) trait SlotStore: Send + Sync {
    async fn add(&self, slot: NewSlot) -> Result<PublicationSlot>;

    /// Slots of the given day ordered by time
    async fn for_day(&self, weekday: Weekday) -> Result<Vec<PublicationSlot>>;

    /// All slots ordered by the day of week and time
    async fn all(&self) -> Result<Vec<PublicationSlot>>;

    /// Returns the number of removed slots
    async fn clear(&self) -> Result<u64>;
}

pub(crate) struct PgSlotStore {
    db: sqlx::PgPool,
}

impl PgSlotStore {
    pub(crate) fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow)]
struct SlotRow {
    id: i64,
    week_day: i16,
    time: NaiveTime,
    content_type: String,
}

impl TryFrom<SlotRow> for PublicationSlot {
    type Error = crate::Error;

    fn try_from(row: SlotRow) -> Result<Self> {
        let weekday = u8::try_from(row.week_day)
            .ok()
            .and_then(|day| Weekday::try_from(day).ok())
            .fatal_ctx(|| format!("Invalid week day in the database: {}", row.week_day))?;

        let content_type = row
            .content_type
            .parse::<ContentType>()
            .fatal_ctx(|| format!("Invalid content type in the database: {}", row.content_type))?;

        Ok(Self {
            id: row.id,
            weekday,
            time: row.time,
            content_type,
        })
    }
}

fn week_day(weekday: Weekday) -> i16 {
    // Always in 0..=6
    weekday.num_days_from_monday() as i16
}

#[async_trait]
impl SlotStore for PgSlotStore {
    async fn add(&self, slot: NewSlot) -> Result<PublicationSlot> {
        let row: SlotRow = sqlx::query_as(
            "insert into publication_slots (week_day, time, content_type)
            values ($1, $2, $3)
            returning id, week_day, time, content_type",
        )
        .bind(week_day(slot.weekday))
        .bind(slot.time)
        .bind(slot.content_type.as_str())
        .fetch_one(&self.db)
        .await?;

        row.try_into()
    }

    async fn for_day(&self, weekday: Weekday) -> Result<Vec<PublicationSlot>> {
        let rows: Vec<SlotRow> = sqlx::query_as(
            "select id, week_day, time, content_type
            from publication_slots
            where week_day = $1
            order by time, id",
        )
        .bind(week_day(weekday))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn all(&self) -> Result<Vec<PublicationSlot>> {
        let rows: Vec<SlotRow> = sqlx::query_as(
            "select id, week_day, time, content_type
            from publication_slots
            order by week_day, time, id",
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("delete from publication_slots")
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
