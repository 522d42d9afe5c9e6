use super::Publisher;
use crate::prelude::*;
use crate::slots::{ContentType, PublicationSlot, SlotStore};
use crate::Result;
use chrono::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Publishes the content of today's slots at their time. The slots are
/// reloaded at startup and after every midnight of the channel's local time.
pub(crate) struct Scheduler {
    slots: Arc<dyn SlotStore>,
    publisher: Arc<Publisher>,
    offset: FixedOffset,
}

/// Publication planned for the current day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlannedPublication {
    /// Time left until the publication
    pub(crate) delay: Duration,
    pub(crate) content_type: ContentType,
}

impl Scheduler {
    pub(crate) fn new(
        slots: Arc<dyn SlotStore>,
        publisher: Arc<Publisher>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            slots,
            publisher,
            offset,
        }
    }

    /// Runs forever. Dropping the future cancels the pending publications.
    pub(crate) async fn run(self) {
        let mut jobs = JoinSet::new();

        loop {
            let now = Utc::now().with_timezone(&self.offset);

            self.schedule_day(&mut jobs, now)
                .await
                .warn_on_err("Failed to schedule today's publications");

            let midnight = tokio::time::sleep(until_next_midnight(now));
            tokio::pin!(midnight);

            loop {
                tokio::select! {
                    () = &mut midnight => break,
                    Some(result) = jobs.join_next() => {
                        if let Err(err) = result {
                            error!(err = tracing_err(&err), "Publication job panicked");
                        }
                    }
                }
            }
        }
    }

    async fn schedule_day(&self, jobs: &mut JoinSet<()>, now: DateTime<FixedOffset>) -> Result {
        let slots = self.slots.for_day(now.weekday()).await?;
        let plan = plan_day(&slots, now);

        info!(
            weekday = %now.weekday(),
            slots = slots.len(),
            planned = plan.len(),
            "Scheduled today's publications"
        );

        for planned in plan {
            let publisher = self.publisher.clone();
            jobs.spawn(async move {
                tokio::time::sleep(planned.delay).await;
                publisher.publish_logged(planned.content_type).await;
            });
        }

        Ok(())
    }
}

/// Slots of the current day that are still ahead of `now`, in the order of
/// their time. Slots whose time has already passed are skipped.
pub(crate) fn plan_day(
    slots: &[PublicationSlot],
    now: DateTime<FixedOffset>,
) -> Vec<PlannedPublication> {
    let now = now.time();

    let mut plan: Vec<_> = slots
        .iter()
        .filter(|slot| slot.time > now)
        .filter_map(|slot| {
            let delay = (slot.time - now).to_std().ok()?;
            Some(PlannedPublication {
                delay,
                content_type: slot.content_type,
            })
        })
        .collect();

    plan.sort_by_key(|planned| planned.delay);
    plan
}

pub(crate) fn until_next_midnight(now: DateTime<FixedOffset>) -> Duration {
    let time = now.time();

    // Nanoseconds exceed a second only during a leap second
    let elapsed = Duration::new(
        time.num_seconds_from_midnight().into(),
        time.nanosecond() % 1_000_000_000,
    );

    DAY.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::super::testing::FakeMessenger;
    use super::super::{Publisher, PublisherOptions};
    use super::*;
    use crate::facts::memory::MemoryFactStore;
    use crate::facts::{FactKind, FactStore};
    use crate::provider::{ProviderManager, YtDlpConfig, YtDlpProvider};
    use crate::queue::SubmissionQueue;
    use crate::slots::memory::MemorySlotStore;
    use crate::slots::{parse_slot_time, NewSlot};
    use crate::task::{TaskFactory, TaskManager};
    use expect_test::expect;

    fn moscow() -> FixedOffset {
        FixedOffset::east_opt(3 * 60 * 60).unwrap()
    }

    /// Monday, 12:00 in Moscow
    fn monday_noon() -> DateTime<FixedOffset> {
        moscow().with_ymd_and_hms(2024, 10, 14, 12, 0, 0).unwrap()
    }

    fn slot(time: &str, content_type: ContentType) -> PublicationSlot {
        PublicationSlot {
            id: 0,
            weekday: Weekday::Mon,
            time: parse_slot_time(time).unwrap(),
            content_type,
        }
    }

    #[test]
    fn plan_skips_the_past_slots() {
        let slots = [
            slot("18:30", ContentType::Video),
            slot("09:00", ContentType::ShortFact),
            slot("12:00", ContentType::MediumFact),
            slot("12:01", ContentType::ShortFact),
        ];

        expect![[r#"
            [
                PlannedPublication {
                    delay: 60s,
                    content_type: ShortFact,
                },
                PlannedPublication {
                    delay: 23400s,
                    content_type: Video,
                },
            ]
        "#]]
        .assert_debug_eq(&plan_day(&slots, monday_noon()));
    }

    #[test]
    fn midnight_is_in_the_local_time() {
        assert_eq!(
            until_next_midnight(monday_noon()),
            Duration::from_secs(12 * 60 * 60)
        );

        // 23:59:30 in Moscow is 20:59:30 UTC
        let late = Utc
            .with_ymd_and_hms(2024, 10, 14, 20, 59, 30)
            .unwrap()
            .with_timezone(&moscow());
        assert_eq!(until_next_midnight(late), Duration::from_secs(30));

        let midnight = moscow().with_ymd_and_hms(2024, 10, 15, 0, 0, 0).unwrap();
        assert_eq!(until_next_midnight(midnight), DAY);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn publications_fire_at_their_time() {
        let slots = Arc::new(MemorySlotStore::default());
        for (weekday, time, content_type) in [
            (Weekday::Mon, "13:00", ContentType::ShortFact),
            (Weekday::Mon, "11:00", ContentType::ShortFact),
            (Weekday::Tue, "12:30", ContentType::ShortFact),
        ] {
            slots
                .add(NewSlot {
                    weekday,
                    time: parse_slot_time(time).unwrap(),
                    content_type,
                })
                .await
                .unwrap();
        }

        let facts = Arc::new(MemoryFactStore::default());
        facts
            .add_batch(
                FactKind::Short,
                vec!["first".to_owned(), "second".to_owned()],
            )
            .await
            .unwrap();

        let messenger = Arc::new(FakeMessenger::default());

        // Video publications are not planned here, so the provider is never used
        let provider = Arc::new(YtDlpProvider::new(YtDlpConfig {
            program: "yt-dlp".to_owned(),
            download_dir: std::env::temp_dir(),
            proxy_retries: 1,
            proxies: None,
            stale_download_after: Duration::from_secs(60),
        }));
        let publisher = Arc::new(Publisher::new(PublisherOptions {
            facts,
            queue: Arc::new(SubmissionQueue::default()),
            provider: Arc::new(ProviderManager::new(
                provider,
                Arc::new(TaskManager::new(1).unwrap()),
                None,
            )),
            tasks: Arc::new(TaskFactory::new(std::iter::empty())),
            messenger: messenger.clone(),
            queue_wait: Duration::from_secs(1),
            task_timeout: None,
        }));

        let scheduler = Scheduler::new(slots, publisher, moscow());
        let mut jobs = JoinSet::new();
        scheduler
            .schedule_day(&mut jobs, monday_noon())
            .await
            .unwrap();

        assert_eq!(jobs.len(), 1);

        let start = tokio::time::Instant::now();
        jobs.join_next().await.unwrap().unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(60 * 60));
        assert_eq!(messenger.sent(), ["text: first"]);
    }
}
