use crate::model::{HOUR_MS, Ms};

pub const MAX_SPOTS: usize = 100_000;
pub const MAX_BOOKINGS_PER_SPOT: usize = 50_000;
pub const MAX_RULES_PER_SPOT: usize = 64;
pub const MAX_SLOTS_PER_DAY: usize = 24;
pub const MAX_EXCEPTIONS_PER_SPOT: usize = 1_000;
pub const MAX_DAYS_PER_RULE: usize = 7;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_CURRENCY_LEN: usize = 8;
pub const MAX_CONTEXT_EVENTS: usize = 200;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// Longest bookable window.
pub const MAX_BOOKING_DURATION_MS: Ms = 31 * 24 * HOUR_MS;

/// Check-in opens this long before the booking starts.
pub const CHECK_IN_LEAD_MS: Ms = HOUR_MS;
