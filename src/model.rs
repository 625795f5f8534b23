use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Length in fractional hours. No rounding.
    pub fn duration_hours(&self) -> f64 {
        self.duration_ms() as f64 / HOUR_MS as f64
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[allow(dead_code)]
    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Wall-clock time ──────────────────────────────────────────────

/// Time of day as minutes since midnight. `24:00` is accepted as the end of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MIDNIGHT: ClockTime = ClockTime(0);
    pub const END_OF_DAY: ClockTime = ClockTime(24 * 60);

    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if minute >= 60 || hour > 24 || (hour == 24 && minute != 0) {
            return None;
        }
        Some(Self((hour * 60 + minute) as u16))
    }

    /// Wall-clock time of a zoned timestamp, truncated to the minute.
    pub fn of(t: &impl Timelike) -> Self {
        Self((t.hour() * 60 + t.minute()) as u16)
    }

    pub fn hour(&self) -> u32 {
        u32::from(self.0) / 60
    }

    pub fn minute(&self) -> u32 {
        u32::from(self.0) % 60
    }

    pub fn minutes(&self) -> u16 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeError(String);

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time {:?}: expected HH:MM", self.0)
    }
}

impl std::error::Error for ParseTimeError {}

impl FromStr for ClockTime {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimeError(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(err)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(err());
        }
        let hour: u32 = h.parse().map_err(|_| err())?;
        let minute: u32 = m.parse().map_err(|_| err())?;
        ClockTime::new(hour, minute).ok_or_else(err)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Inclusive wall-clock range, e.g. `09:00-18:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl TimeRange {
    pub fn new(start: ClockTime, end: ClockTime) -> Self {
        Self { start, end }
    }

    /// `start ≤ from ∧ to ≤ end`.
    pub fn covers(&self, from: ClockTime, to: ClockTime) -> bool {
        self.start <= from && to <= self.end
    }

    pub fn contains(&self, t: ClockTime) -> bool {
        self.start <= t && t <= self.end
    }
}

impl FromStr for TimeRange {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .split_once('-')
            .ok_or_else(|| ParseTimeError(s.to_string()))?;
        Ok(Self::new(a.trim().parse()?, b.trim().parse()?))
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ── Schedule ─────────────────────────────────────────────────────

/// Opening hours per weekday, indexed Monday = 0 … Sunday = 6.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    days: [Vec<TimeRange>; 7],
}

impl WeeklySchedule {
    pub fn slots(&self, day: Weekday) -> &[TimeRange] {
        &self.days[day.num_days_from_monday() as usize]
    }

    pub fn set_day(&mut self, day: Weekday, ranges: Vec<TimeRange>) {
        self.days[day.num_days_from_monday() as usize] = ranges;
    }

    pub fn with_day(mut self, day: Weekday, ranges: Vec<TimeRange>) -> Self {
        self.set_day(day, ranges);
        self
    }

    pub fn slot_count(&self) -> usize {
        self.days.iter().map(Vec::len).sum()
    }
}

/// Per-date override of the weekly schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub date: NaiveDate,
    pub available: bool,
    /// Only consulted when `available` is true. Empty means the whole day is open.
    pub slots: Vec<TimeRange>,
}

impl AvailabilityException {
    pub fn closed(date: NaiveDate) -> Self {
        Self {
            date,
            available: false,
            slots: Vec::new(),
        }
    }

    pub fn open(date: NaiveDate, slots: Vec<TimeRange>) -> Self {
        Self {
            date,
            available: true,
            slots,
        }
    }
}

// ── Price rules ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceRuleType {
    TimeOfDay,
    DayOfWeek,
    DateRange,
    Duration,
    Discount,
}

impl PriceRuleType {
    pub fn label(&self) -> &'static str {
        match self {
            PriceRuleType::TimeOfDay => "time_of_day",
            PriceRuleType::DayOfWeek => "day_of_week",
            PriceRuleType::DateRange => "date_range",
            PriceRuleType::Duration => "duration",
            PriceRuleType::Discount => "discount",
        }
    }
}

/// Applicability condition of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PriceRuleKind {
    /// Matches when the start time falls inside `hours` (inclusive).
    TimeOfDay { hours: TimeRange },
    /// Matches when the start weekday is listed. 0 = Sunday … 6 = Saturday.
    DayOfWeek { days: Vec<u8> },
    /// Matches when `from ≤ start ≤ until`.
    DateRange { from: Ms, until: Ms },
    /// Always matches.
    Duration,
    /// Always matches.
    Discount,
}

impl PriceRuleKind {
    pub fn rule_type(&self) -> PriceRuleType {
        match self {
            PriceRuleKind::TimeOfDay { .. } => PriceRuleType::TimeOfDay,
            PriceRuleKind::DayOfWeek { .. } => PriceRuleType::DayOfWeek,
            PriceRuleKind::DateRange { .. } => PriceRuleType::DateRange,
            PriceRuleKind::Duration => PriceRuleType::Duration,
            PriceRuleKind::Discount => PriceRuleType::Discount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRule {
    pub id: Ulid,
    pub spot_id: Ulid,
    pub kind: PriceRuleKind,
    /// Plain multiplier: 1.5 = +50%, 0.8 = -20%.
    pub factor: f64,
    pub name: Option<String>,
    pub is_active: bool,
    /// Per-spot insertion sequence; fixes evaluation order.
    pub seq: u64,
    pub created_at: Ms,
}

impl PriceRule {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.rule_type().label().to_string())
    }
}

/// Snapshot of one rule's effect on a computed price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRule {
    pub rule_id: Ulid,
    pub rule_name: String,
    pub rule_type: PriceRuleType,
    pub factor: f64,
    /// Signed delta this rule caused on the running price.
    pub price_effect: f64,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Canceled,
    Completed,
    Rejected,
}

impl BookingStatus {
    /// Statuses that occupy the spot for conflict detection.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Canceled => "canceled",
            BookingStatus::Completed => "completed",
            BookingStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub spot_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub total_price: f64,
    pub applied_rules: Vec<AppliedRule>,
    pub checked_in: bool,
    pub checked_in_at: Option<Ms>,
    pub checked_out: bool,
    pub checked_out_at: Option<Ms>,
    pub access_code: Option<String>,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

// ── Spot state ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SpotState {
    pub id: Ulid,
    pub owner_id: Ulid,
    /// Hourly price.
    pub base_price: f64,
    pub currency: String,
    pub schedule: WeeklySchedule,
    pub exceptions: BTreeMap<NaiveDate, AvailabilityException>,
    /// Price rules in evaluation order: `seq` ascending.
    pub rules: Vec<PriceRule>,
    /// All bookings regardless of status, sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl SpotState {
    pub fn new(id: Ulid, owner_id: Ulid, base_price: f64, currency: String) -> Self {
        Self {
            id,
            owner_id,
            base_price,
            currency,
            schedule: WeeklySchedule::default(),
            exceptions: BTreeMap::new(),
            rules: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Mutable access for in-place updates. Callers must not change `span`;
    /// reschedules go through remove + insert to keep the sort order.
    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings (any status) whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn active_booking_count(&self) -> usize {
        self.bookings.iter().filter(|b| b.status.is_active()).count()
    }

    /// Sequence number for the next rule added to this spot.
    pub fn next_rule_seq(&self) -> u64 {
        self.rules.last().map_or(0, |r| r.seq + 1)
    }

    /// Insert a rule at its sequence position.
    pub fn insert_rule(&mut self, rule: PriceRule) {
        let pos = self.rules.partition_point(|r| r.seq <= rule.seq);
        self.rules.insert(pos, rule);
    }

    /// Replace a rule in place, keeping its evaluation position.
    pub fn replace_rule(&mut self, rule: PriceRule) -> bool {
        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(slot) => {
                *slot = rule;
                true
            }
            None => false,
        }
    }

    pub fn remove_rule(&mut self, id: Ulid) -> Option<PriceRule> {
        let pos = self.rules.iter().position(|r| r.id == id)?;
        Some(self.rules.remove(pos))
    }
}

// ── Suggestions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionAlgorithm {
    Base,
    EventAware,
    MultiFactor,
}

impl SuggestionAlgorithm {
    pub fn label(&self) -> &'static str {
        match self {
            SuggestionAlgorithm::Base => "base",
            SuggestionAlgorithm::EventAware => "event_aware",
            SuggestionAlgorithm::MultiFactor => "multi_factor",
        }
    }
}

/// Named multipliers that went into a suggestion. Unused factors stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceFactors {
    pub time_of_day: Option<f64>,
    pub day_of_week: Option<f64>,
    pub seasonality: Option<f64>,
    pub events: Option<f64>,
    pub occupancy: Option<f64>,
    pub demand: Option<f64>,
    pub competition: Option<f64>,
    pub weather: Option<f64>,
}

impl PriceFactors {
    /// `(name, value)` pairs for every factor that is set.
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        [
            ("time_of_day", self.time_of_day),
            ("day_of_week", self.day_of_week),
            ("seasonality", self.seasonality),
            ("events", self.events),
            ("occupancy", self.occupancy),
            ("demand", self.demand),
            ("competition", self.competition),
            ("weather", self.weather),
        ]
        .into_iter()
        .filter_map(|(name, v)| v.map(|v| (name, v)))
        .collect()
    }
}

/// An event near a spot that may drive parking demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyEvent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    /// Distance from the spot in metres.
    #[serde(default)]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub expected_attendance: Option<u64>,
    pub start: Ms,
    pub end: Ms,
}

/// Advisory price record. Never changes the spot price unless applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSuggestion {
    pub id: Ulid,
    pub spot_id: Ulid,
    pub algorithm: SuggestionAlgorithm,
    pub base_price: f64,
    pub suggested_price: f64,
    pub confidence: f64,
    pub span: Span,
    pub factors: PriceFactors,
    pub events: Vec<NearbyEvent>,
    pub applied: bool,
    pub applied_at: Option<Ms>,
    pub created_at: Ms,
}

// ── WAL events ───────────────────────────────────────────────────

/// WAL record format. One variant per committed state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    SpotCreated {
        id: Ulid,
        owner_id: Ulid,
        base_price: f64,
        currency: String,
    },
    SpotUpdated {
        id: Ulid,
        base_price: f64,
        currency: String,
    },
    SpotDeleted {
        id: Ulid,
    },
    ScheduleSet {
        spot_id: Ulid,
        schedule: WeeklySchedule,
    },
    ExceptionSet {
        spot_id: Ulid,
        exception: AvailabilityException,
    },
    ExceptionRemoved {
        spot_id: Ulid,
        date: NaiveDate,
    },
    PriceRuleAdded {
        rule: PriceRule,
    },
    PriceRuleUpdated {
        rule: PriceRule,
    },
    PriceRuleRemoved {
        id: Ulid,
        spot_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    /// New window and price, plus a notes change made in the same update.
    BookingRescheduled {
        id: Ulid,
        spot_id: Ulid,
        span: Span,
        total_price: f64,
        applied_rules: Vec<AppliedRule>,
        notes: Option<Option<String>>,
        at: Ms,
    },
    BookingNotesChanged {
        id: Ulid,
        spot_id: Ulid,
        notes: Option<String>,
        at: Ms,
    },
    BookingStatusChanged {
        id: Ulid,
        spot_id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
    BookingCheckedIn {
        id: Ulid,
        spot_id: Ulid,
        at: Ms,
    },
    BookingCheckedOut {
        id: Ulid,
        spot_id: Ulid,
        at: Ms,
    },
    AccessCodeIssued {
        id: Ulid,
        spot_id: Ulid,
        code: String,
        at: Ms,
    },
    BookingRemoved {
        id: Ulid,
        spot_id: Ulid,
    },
    SuggestionRecorded {
        suggestion: PriceSuggestion,
    },
    SuggestionApplied {
        id: Ulid,
        spot_id: Ulid,
        base_price: f64,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SpotInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub base_price: f64,
    pub currency: String,
    pub rule_count: usize,
    pub booking_count: usize,
}

/// Output of the rule engine for one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    /// Hourly price × duration, before any rule.
    pub base_price: f64,
    pub final_price: f64,
    pub applied_rules: Vec<AppliedRule>,
}

/// Lifecycle events accepted by `Engine::transition_booking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingAction {
    Confirm,
    Reject,
    Cancel,
    CheckIn,
    CheckOut,
    IssueAccessCode,
}

impl BookingAction {
    pub fn label(&self) -> &'static str {
        match self {
            BookingAction::Confirm => "confirm",
            BookingAction::Reject => "reject",
            BookingAction::Cancel => "cancel",
            BookingAction::CheckIn => "check-in",
            BookingAction::CheckOut => "check-out",
            BookingAction::IssueAccessCode => "issue access code",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub spot_id: Option<Ulid>,
    pub user_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
    pub start_from: Option<Ms>,
    pub start_to: Option<Ms>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.spot_id.is_none_or(|id| b.spot_id == id)
            && self.user_id.is_none_or(|id| b.user_id == id)
            && self.status.is_none_or(|s| b.status == s)
            && self.start_from.is_none_or(|t| b.span.start >= t)
            && self.start_to.is_none_or(|t| b.span.start <= t)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingStats {
    pub total: usize,
    pub completed: usize,
    pub canceled: usize,
    pub upcoming: usize,
    /// Sum of `total_price` over completed bookings.
    pub completed_revenue: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestionPerformance {
    pub applied_count: usize,
    pub average_price_increase: f64,
    pub estimated_revenue_increase: f64,
    /// Average value per factor, most influential (furthest from 1.0) first.
    pub top_factors: Vec<(&'static str, f64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            spot_id: Ulid::nil(),
            user_id: Ulid::nil(),
            span: Span::new(start, end),
            status: BookingStatus::Pending,
            total_price: 0.0,
            applied_rules: Vec::new(),
            checked_in: false,
            checked_in_at: None,
            checked_out: false,
            checked_out_at: None,
            access_code: None,
            notes: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn spot() -> SpotState {
        SpotState::new(Ulid::new(), Ulid::new(), 10.0, "EUR".into())
    }

    #[test]
    fn span_basics() {
        let s = Span::new(0, 90 * MINUTE_MS);
        assert_eq!(s.duration_hours(), 1.5);
        assert!(s.contains_instant(0));
        assert!(!s.contains_instant(90 * MINUTE_MS)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn clock_time_parse_and_display() {
        let t: ClockTime = "09:05".parse().unwrap();
        assert_eq!(t.hour(), 9);
        assert_eq!(t.minute(), 5);
        assert_eq!(t.to_string(), "09:05");
        assert_eq!("24:00".parse::<ClockTime>().unwrap(), ClockTime::END_OF_DAY);
    }

    #[test]
    fn clock_time_rejects_garbage() {
        for bad in ["9:00", "24:01", "12:60", "ab:cd", "1200", ""] {
            assert!(bad.parse::<ClockTime>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn clock_time_ordering_matches_lexicographic() {
        let a: ClockTime = "08:59".parse().unwrap();
        let b: ClockTime = "09:00".parse().unwrap();
        assert!(a < b);
        assert_eq!(a.cmp(&b), "08:59".cmp("09:00"));
    }

    #[test]
    fn time_range_covers_inclusive() {
        let r: TimeRange = "09:00-18:00".parse().unwrap();
        assert!(r.covers("09:00".parse().unwrap(), "18:00".parse().unwrap()));
        assert!(!r.covers("08:59".parse().unwrap(), "10:00".parse().unwrap()));
        assert!(!r.covers("17:00".parse().unwrap(), "18:01".parse().unwrap()));
        assert!(r.contains("18:00".parse().unwrap()));
    }

    #[test]
    fn weekly_schedule_indexing() {
        let r: TimeRange = "09:00-12:00".parse().unwrap();
        let s = WeeklySchedule::default().with_day(Weekday::Sun, vec![r]);
        assert_eq!(s.slots(Weekday::Sun), &[r]);
        assert!(s.slots(Weekday::Mon).is_empty());
        assert_eq!(s.slot_count(), 1);
    }

    #[test]
    fn bookings_kept_sorted() {
        let mut rs = spot();
        rs.insert_booking(booking(300, 400));
        rs.insert_booking(booking(100, 200));
        rs.insert_booking(booking(200, 300));
        let starts: Vec<Ms> = rs.bookings.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_respects_half_open() {
        let mut rs = spot();
        rs.insert_booking(booking(100, 200));
        rs.insert_booking(booking(450, 600));
        rs.insert_booking(booking(1000, 1100));

        let hits: Vec<_> = rs.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));

        assert_eq!(rs.overlapping(&Span::new(200, 300)).count(), 0);
    }

    #[test]
    fn remove_booking_preserves_order() {
        let mut rs = spot();
        let bs: Vec<Booking> = (0..3).map(|i| booking(i * 100, i * 100 + 50)).collect();
        let ids: Vec<Ulid> = bs.iter().map(|b| b.id).collect();
        for b in bs {
            rs.insert_booking(b);
        }
        assert!(rs.remove_booking(ids[1]).is_some());
        assert!(rs.remove_booking(Ulid::new()).is_none());
        assert_eq!(rs.bookings.len(), 2);
        assert_eq!(rs.bookings[0].id, ids[0]);
        assert_eq!(rs.bookings[1].id, ids[2]);
    }

    #[test]
    fn rules_ordered_by_sequence() {
        let mut rs = spot();
        let rule = |seq: u64| PriceRule {
            id: Ulid::new(),
            spot_id: Ulid::nil(),
            kind: PriceRuleKind::Discount,
            factor: 0.9,
            name: None,
            is_active: true,
            seq,
            created_at: 0,
        };
        assert_eq!(rs.next_rule_seq(), 0);
        rs.insert_rule(rule(3));
        rs.insert_rule(rule(1));
        rs.insert_rule(rule(2));
        let order: Vec<u64> = rs.rules.iter().map(|r| r.seq).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(rs.next_rule_seq(), 4);

        let mut edited = rs.rules[1].clone();
        edited.factor = 1.4;
        assert!(rs.replace_rule(edited));
        assert_eq!(rs.rules[1].factor, 1.4);
        assert_eq!(rs.rules[1].seq, 2);
    }

    #[test]
    fn same_instant_rules_keep_insertion_order() {
        let mut rs = spot();
        let high = Ulid::from_parts(u64::MAX >> 16, u128::MAX >> 48);
        let low = Ulid::from_parts(0, 1);
        for id in [high, low] {
            let seq = rs.next_rule_seq();
            rs.insert_rule(PriceRule {
                id,
                spot_id: rs.id,
                kind: PriceRuleKind::Discount,
                factor: 0.9,
                name: None,
                is_active: true,
                seq,
                created_at: 1_000,
            });
        }
        let ids: Vec<Ulid> = rs.rules.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![high, low]);
    }

    #[test]
    fn booking_filter_matches() {
        let mut b = booking(1000, 2000);
        b.status = BookingStatus::Confirmed;
        let f = BookingFilter {
            status: Some(BookingStatus::Confirmed),
            start_from: Some(500),
            ..Default::default()
        };
        assert!(f.matches(&b));
        let f = BookingFilter {
            start_to: Some(999),
            ..Default::default()
        };
        assert!(!f.matches(&b));
    }

    #[test]
    fn price_factors_entries_skip_unset() {
        let f = PriceFactors {
            time_of_day: Some(1.3),
            weather: Some(1.0),
            ..Default::default()
        };
        assert_eq!(f.entries(), vec![("time_of_day", 1.3), ("weather", 1.0)]);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            booking: booking(0, HOUR_MS),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
