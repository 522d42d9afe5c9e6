//! Weekly schedule of publications.
mod store;

use crate::{err, Result, ValidationError};
use chrono::prelude::*;
use itertools::Itertools;
use std::fmt::Write;

pub(crate) use store::*;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum ContentType {
    ShortFact,
    MediumFact,
    Video,
}

impl ContentType {
    pub(crate) fn as_str(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PublicationSlot {
    pub(crate) id: i64,
    pub(crate) weekday: Weekday,

    /// Local time of the channel
    pub(crate) time: NaiveTime,
    pub(crate) content_type: ContentType,
}

/// Slot that is not yet persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NewSlot {
    pub(crate) weekday: Weekday,
    pub(crate) time: NaiveTime,
    pub(crate) content_type: ContentType,
}

impl NewSlot {
    /// Parses the `<day> <HH:MM> <type>` triple
    pub(crate) fn parse(weekday: &str, time: &str, content_type: &str) -> Result<Self> {
        Ok(Self {
            weekday: parse_weekday(weekday)?,
            time: parse_slot_time(time)?,
            content_type: parse_content_type(content_type)?,
        })
    }
}

pub(crate) fn parse_weekday(input: &str) -> Result<Weekday> {
    input
        .trim()
        .parse()
        .map_err(|_| err!(ValidationError::Weekday { input }))
}

pub(crate) fn parse_slot_time(input: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .map_err(|_| err!(ValidationError::SlotTime { input }))
}

pub(crate) fn parse_content_type(input: &str) -> Result<ContentType> {
    input
        .trim()
        .to_lowercase()
        .parse()
        .map_err(|_| err!(ValidationError::ContentType { input }))
}

pub(crate) fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Human readable listing of the slots grouped by the day of week
pub(crate) fn format_schedule(slots: &[PublicationSlot]) -> String {
    if slots.is_empty() {
        return "No publication slots are configured".to_owned();
    }

    let sorted = slots
        .iter()
        .sorted_by_key(|slot| (slot.weekday.num_days_from_monday(), slot.time));

    let mut output = String::new();

    for (weekday, slots) in &sorted.group_by(|slot| slot.weekday) {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(weekday_name(weekday));
        for slot in slots {
            // Writing to a `String` never fails
            let _ = write!(
                output,
                "\n  {} {}",
                slot.time.format("%H:%M"),
                slot.content_type
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use assert_matches::assert_matches;
    use expect_test::expect;

    fn slot(id: i64, weekday: Weekday, time: &str, content_type: ContentType) -> PublicationSlot {
        PublicationSlot {
            id,
            weekday,
            time: parse_slot_time(time).unwrap(),
            content_type,
        }
    }

    #[test]
    fn parses_slot_input() {
        let slot = NewSlot::parse("Friday", "18:05", "medium_fact").unwrap();
        assert_eq!(
            slot,
            NewSlot {
                weekday: Weekday::Fri,
                time: NaiveTime::from_hms_opt(18, 5, 0).unwrap(),
                content_type: ContentType::MediumFact,
            }
        );
    }

    #[test]
    fn rejects_malformed_slot_input() {
        let cases = [
            ("someday", "10:00", "video"),
            ("monday", "25:00", "video"),
            ("monday", "10.00", "video"),
            ("monday", "10:00", "podcast"),
        ];

        for (weekday, time, content_type) in cases {
            let err = NewSlot::parse(weekday, time, content_type).unwrap_err();
            assert_matches!(
                err.kind(),
                ErrorKind::Validation { .. },
                "{weekday} {time} {content_type}"
            );
        }
    }

    #[test]
    fn schedule_listing() {
        let slots = [
            slot(1, Weekday::Wed, "12:00", ContentType::Video),
            slot(2, Weekday::Mon, "18:30", ContentType::MediumFact),
            slot(3, Weekday::Mon, "09:00", ContentType::ShortFact),
            slot(4, Weekday::Sun, "23:59", ContentType::ShortFact),
        ];

        expect![[r#"
            monday
              09:00 short_fact
              18:30 medium_fact
            wednesday
              12:00 video
            sunday
              23:59 short_fact"#]]
        .assert_eq(&format_schedule(&slots));

        expect!["No publication slots are configured"].assert_eq(&format_schedule(&[]));
    }
}
