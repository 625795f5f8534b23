use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;

use crate::calendar::{LocalWindow, instant_at};
use crate::model::*;

use super::store::{BookingStore, ScheduleStore};

// ── Schedule check ───────────────────────────────────────────────

/// Whether the schedule opens for the whole window.
///
/// Only the wall-clock date of `start` is consulted. An exception for that date
/// wins over the weekly slots: closed → never, open without slots → always,
/// open with slots → some slot must contain both endpoints' times of day.
/// Windows that cross local midnight are judged by the start day alone.
pub fn is_available(schedule: &impl ScheduleStore, window: &LocalWindow) -> bool {
    let from = window.start_time();
    let to = window.end_time();

    if let Some(exception) = schedule.exception_on(window.start_date()) {
        if !exception.available {
            return false;
        }
        if exception.slots.is_empty() {
            return true;
        }
        return any_slot_covers(&exception.slots, from, to);
    }

    any_slot_covers(schedule.weekly_slots(window.start_weekday()), from, to)
}

fn any_slot_covers(slots: &[TimeRange], from: ClockTime, to: ClockTime) -> bool {
    slots.iter().any(|slot| slot.covers(from, to))
}

// ── Open / free windows for a date ───────────────────────────────

/// Absolute spans during which the schedule is open on `date`, merged and sorted.
/// An open exception without slots opens the whole day.
pub fn open_windows(schedule: &impl ScheduleStore, date: NaiveDate, tz: Tz) -> Vec<Span> {
    let whole_day = [TimeRange::new(ClockTime::MIDNIGHT, ClockTime::END_OF_DAY)];
    let slots: &[TimeRange] = match schedule.exception_on(date) {
        Some(e) if !e.available => return Vec::new(),
        Some(e) if e.slots.is_empty() => &whole_day[..],
        Some(e) => e.slots.as_slice(),
        None => schedule.weekly_slots(date.weekday()),
    };

    let mut spans: Vec<Span> = slots
        .iter()
        .filter_map(|slot| {
            let start = instant_at(date, slot.start, tz)?;
            let end = instant_at(date, slot.end, tz)?;
            (start < end).then(|| Span::new(start, end))
        })
        .collect();
    spans.sort_by_key(|s| s.start);
    merge_spans(&spans)
}

/// Open spans on `date` minus every active booking.
pub fn free_windows<S>(spot: &S, date: NaiveDate, tz: Tz) -> Vec<Span>
where
    S: ScheduleStore + BookingStore,
{
    let open = open_windows(spot, date, tz);
    let (Some(first), Some(last)) = (open.first(), open.last()) else {
        return open;
    };
    let day = Span::new(first.start, last.end);
    let taken: Vec<Span> = spot.active_overlapping(&day).map(|b| b.span).collect();
    let taken = merge_spans(&taken);
    subtract_spans(&open, &taken)
}

// ── Interval algebra ─────────────────────────────────────────────

/// Merge start-sorted spans, joining overlapping and touching neighbours.
pub fn merge_spans(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    for &span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// `base \ cut` for two disjoint, start-sorted span lists.
pub fn subtract_spans(base: &[Span], cut: &[Span]) -> Vec<Span> {
    let mut out = Vec::new();
    let mut skip = 0;

    for b in base {
        while skip < cut.len() && cut[skip].end <= b.start {
            skip += 1;
        }
        let mut cursor = b.start;
        for c in cut[skip..].iter().take_while(|c| c.start < b.end) {
            if c.start > cursor {
                out.push(Span::new(cursor, c.start));
            }
            cursor = cursor.max(c.end);
        }
        if cursor < b.end {
            out.push(Span::new(cursor, b.end));
        }
    }
    out
}
