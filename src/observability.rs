use std::net::SocketAddr;

use crate::model::BookingAction;

// ── Booking path ────────────────────────────────────────────────

/// Counter: bookings accepted.
pub const BOOKINGS_CREATED_TOTAL: &str = "parkwise_bookings_created_total";

/// Counter: create/update refused because of an overlapping active booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "parkwise_booking_conflicts_total";

/// Counter: create refused because the schedule is closed for the window.
pub const BOOKINGS_UNAVAILABLE_TOTAL: &str = "parkwise_bookings_unavailable_total";

/// Counter: lifecycle actions applied. Labels: action.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "parkwise_booking_transitions_total";

/// Counter: rule-engine evaluations (quotes, creates and reschedules).
pub const PRICE_COMPUTATIONS_TOTAL: &str = "parkwise_price_computations_total";

// ── Suggestions ─────────────────────────────────────────────────

/// Counter: suggestions recorded. Labels: algorithm.
pub const SUGGESTIONS_TOTAL: &str = "parkwise_suggestions_total";

/// Counter: multi-factor suggestions that fell back to the base algorithm.
pub const SUGGESTION_FALLBACKS_TOTAL: &str = "parkwise_suggestion_fallbacks_total";

// ── Storage ─────────────────────────────────────────────────────

/// Gauge: spots loaded.
pub const SPOTS_ACTIVE: &str = "parkwise_spots_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "parkwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "parkwise_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "parkwise_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if `None`.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn action_label(action: BookingAction) -> &'static str {
    match action {
        BookingAction::Confirm => "confirm",
        BookingAction::Reject => "reject",
        BookingAction::Cancel => "cancel",
        BookingAction::CheckIn => "check_in",
        BookingAction::CheckOut => "check_out",
        BookingAction::IssueAccessCode => "issue_access_code",
    }
}
