//! Wall-clock views of absolute instants in the engine's configured zone.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;

use crate::model::{ClockTime, Ms, Span};

/// Zoned datetime for a unix-ms instant. `None` outside chrono's range.
pub fn zoned(t: Ms, tz: Tz) -> Option<DateTime<Tz>> {
    DateTime::from_timestamp_millis(t).map(|dt| dt.with_timezone(&tz))
}

/// First instant at which `date` shows `time` on the wall clock.
/// `24:00` maps to midnight of the next day. `None` inside a DST gap.
pub fn instant_at(date: NaiveDate, time: ClockTime, tz: Tz) -> Option<Ms> {
    let (date, time) = if time == ClockTime::END_OF_DAY {
        (date.succ_opt()?, NaiveTime::MIN)
    } else {
        (date, NaiveTime::from_hms_opt(time.hour(), time.minute(), 0)?)
    };
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

/// A window together with its wall-clock endpoints.
#[derive(Debug, Clone)]
pub struct LocalWindow {
    pub span: Span,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl LocalWindow {
    pub fn resolve(span: Span, tz: Tz) -> Option<Self> {
        Some(Self {
            span,
            start: zoned(span.start, tz)?,
            end: zoned(span.end, tz)?,
        })
    }

    pub fn start_time(&self) -> ClockTime {
        ClockTime::of(&self.start)
    }

    pub fn end_time(&self) -> ClockTime {
        ClockTime::of(&self.end)
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn start_weekday(&self) -> Weekday {
        self.start.weekday()
    }
}
