use ulid::Ulid;

use crate::model::{BookingStatus, Span};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Malformed input: empty or inverted window, start in the past, bad factor.
    Validation(&'static str),
    /// The spot's schedule does not open for the requested window.
    Unavailable(Span),
    /// Overlaps the given active booking.
    Conflict(Ulid),
    /// Lifecycle guard failed.
    InvalidTransition {
        id: Ulid,
        status: BookingStatus,
        /// Label of the attempted operation, e.g. `"check-in"`.
        action: &'static str,
        reason: &'static str,
    },
    /// Spot still has pending or confirmed bookings.
    HasActiveBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Unavailable(span) => {
                write!(f, "spot not open for [{}, {})", span.start, span.end)
            }
            EngineError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            EngineError::InvalidTransition {
                id,
                status,
                action,
                reason,
            } => write!(
                f,
                "cannot {action} booking {id} in status {status}: {reason}"
            ),
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot delete spot {id}: has active bookings")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
