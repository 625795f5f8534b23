use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;
use super::store::BookingStore;

/// Shape checks on a requested window: ordered, within the supported range and
/// not absurdly long. Says nothing about the spot.
pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::Validation("start must be before end"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("window too wide"));
    }
    Ok(Span::new(start, end))
}

/// First active booking overlapping `window`, ignoring `exclude`.
/// Overlap is half-open, so back-to-back bookings never collide.
pub fn find_conflict(
    bookings: &impl BookingStore,
    window: &Span,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    bookings
        .active_overlapping(window)
        .find(|b| Some(b.id) != exclude)
        .map(|b| b.id)
}

pub(crate) fn check_no_conflict(
    bookings: &impl BookingStore,
    window: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(bookings, window, exclude) {
        Some(id) => Err(EngineError::Conflict(id)),
        None => Ok(()),
    }
}
