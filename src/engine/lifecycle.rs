//! Booking state machine.
//!
//! ```text
//! Pending ──confirm──▶ Confirmed ──check-out──▶ Completed
//!    │ ╲                   │
//!    │  reject──▶ Rejected  cancel
//!    cancel                ▼
//!    └──────────────▶ Canceled
//! ```
//!
//! Guards here are pure; the engine turns the returned [`Step`] into a WAL event.

use rand::Rng;

use crate::limits::CHECK_IN_LEAD_MS;
use crate::model::*;

use super::EngineError;

/// What an accepted action does to the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SetStatus(BookingStatus),
    CheckIn,
    CheckOut,
    IssueAccessCode,
}

fn refuse(booking: &Booking, action: &'static str, reason: &'static str) -> EngineError {
    EngineError::InvalidTransition {
        id: booking.id,
        status: booking.status,
        action,
        reason,
    }
}

pub fn plan(booking: &Booking, action: BookingAction, now: Ms) -> Result<Step, EngineError> {
    use BookingStatus::*;
    let label = action.label();
    match action {
        BookingAction::Confirm => match booking.status {
            Pending => Ok(Step::SetStatus(Confirmed)),
            _ => Err(refuse(booking, label, "only pending bookings can be confirmed")),
        },
        BookingAction::Reject => match booking.status {
            Pending => Ok(Step::SetStatus(Rejected)),
            _ => Err(refuse(booking, label, "only pending bookings can be rejected")),
        },
        BookingAction::Cancel => match booking.status {
            Pending | Confirmed => Ok(Step::SetStatus(Canceled)),
            _ => Err(refuse(booking, label, "booking already finished")),
        },
        BookingAction::CheckIn => {
            if booking.status != Confirmed {
                return Err(refuse(booking, label, "booking is not confirmed"));
            }
            if now < booking.span.start - CHECK_IN_LEAD_MS {
                return Err(refuse(booking, label, "too early to check in"));
            }
            Ok(Step::CheckIn)
        }
        BookingAction::CheckOut => {
            if !booking.checked_in {
                return Err(refuse(booking, label, "not checked in"));
            }
            if booking.status != Confirmed {
                return Err(refuse(booking, label, "booking is not confirmed"));
            }
            Ok(Step::CheckOut)
        }
        BookingAction::IssueAccessCode => match booking.status {
            Confirmed => Ok(Step::IssueAccessCode),
            _ => Err(refuse(booking, label, "booking is not confirmed")),
        },
    }
}

/// Direct status override. Allowed from any non-terminal status.
pub fn check_status_update(booking: &Booking) -> Result<(), EngineError> {
    if booking.status.is_terminal() {
        return Err(refuse(booking, "update status of", "booking already finished"));
    }
    Ok(())
}

/// Window and notes may change unless the booking is completed or canceled.
pub fn check_updatable(booking: &Booking) -> Result<(), EngineError> {
    match booking.status {
        BookingStatus::Completed | BookingStatus::Canceled => {
            Err(refuse(booking, "update", "booking already finished"))
        }
        _ => Ok(()),
    }
}

pub fn check_removable(booking: &Booking) -> Result<(), EngineError> {
    match booking.status {
        BookingStatus::Confirmed | BookingStatus::Completed => Err(refuse(
            booking,
            "remove",
            "confirmed and completed bookings are kept",
        )),
        _ => Ok(()),
    }
}

/// Six decimal digits, no leading zero.
pub fn generate_access_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999u32).to_string()
}

/// Apply a committed booking event in place. Reschedules are handled by the
/// caller since they move the booking within the spot's sorted list.
pub(crate) fn apply(booking: &mut Booking, event: &Event) {
    match event {
        Event::BookingNotesChanged { notes, at, .. } => {
            booking.notes = notes.clone();
            booking.updated_at = *at;
        }
        Event::BookingStatusChanged { status, at, .. } => {
            booking.status = *status;
            if *status == BookingStatus::Canceled {
                booking.access_code = None;
            }
            booking.updated_at = *at;
        }
        Event::BookingCheckedIn { at, .. } => {
            booking.checked_in = true;
            booking.checked_in_at = Some(*at);
            booking.updated_at = *at;
        }
        Event::BookingCheckedOut { at, .. } => {
            booking.checked_out = true;
            booking.checked_out_at = Some(*at);
            booking.status = BookingStatus::Completed;
            booking.updated_at = *at;
        }
        Event::AccessCodeIssued { code, at, .. } => {
            booking.access_code = Some(code.clone());
            booking.updated_at = *at;
        }
        _ => {}
    }
}
