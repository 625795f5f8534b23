//! Read-only views the rule evaluators work against.
//!
//! Availability, conflict and pricing logic only see these traits, so they can
//! be exercised against fixtures without an `Engine` or a WAL.

use chrono::{NaiveDate, Weekday};
use ulid::Ulid;

use crate::model::*;

pub trait ScheduleStore {
    fn weekly_slots(&self, day: Weekday) -> &[TimeRange];
    fn exception_on(&self, date: NaiveDate) -> Option<&AvailabilityException>;
}

pub trait PriceRuleStore {
    /// Price per hour before rules.
    fn hourly_price(&self) -> f64;
    /// Active rules in evaluation order.
    fn active_rules(&self) -> impl Iterator<Item = &PriceRule>;
}

pub trait BookingStore {
    /// Pending or confirmed bookings whose span overlaps `window`.
    fn active_overlapping(&self, window: &Span) -> impl Iterator<Item = &Booking>;
}

impl ScheduleStore for SpotState {
    fn weekly_slots(&self, day: Weekday) -> &[TimeRange] {
        self.schedule.slots(day)
    }

    fn exception_on(&self, date: NaiveDate) -> Option<&AvailabilityException> {
        self.exceptions.get(&date)
    }
}

impl PriceRuleStore for SpotState {
    fn hourly_price(&self) -> f64 {
        self.base_price
    }

    fn active_rules(&self) -> impl Iterator<Item = &PriceRule> {
        self.rules.iter().filter(|r| r.is_active)
    }
}

impl BookingStore for SpotState {
    fn active_overlapping(&self, window: &Span) -> impl Iterator<Item = &Booking> {
        self.overlapping(window).filter(|b| b.status.is_active())
    }
}

/// Ids of every booking and rule owned by a spot, for index cleanup on delete.
pub(crate) fn owned_entity_ids(rs: &SpotState) -> Vec<Ulid> {
    rs.bookings
        .iter()
        .map(|b| b.id)
        .chain(rs.rules.iter().map(|r| r.id))
        .collect()
}
