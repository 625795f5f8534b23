use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Weekday;
use chrono_tz::Tz;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use parkwise::clock::ManualClock;
use parkwise::engine::{BookingUpdate, Engine, EngineError, EngineOptions};
use parkwise::model::*;
use parkwise::notify::NotifyHub;
use parkwise::suggest::SuggestionContext;

// ── Test infrastructure ──────────────────────────────────────

/// Wednesday 2024-04-17 12:00 UTC.
const NOON: Ms = 1_713_355_200_000;
const H: Ms = HOUR_MS;

fn wal_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("parkwise_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("parkwise.wal")
}

fn open(path: &Path, clock: Arc<ManualClock>) -> Engine {
    Engine::new(
        path.to_path_buf(),
        Arc::new(NotifyHub::new()),
        EngineOptions {
            timezone: Tz::UTC,
            clock,
        },
    )
    .unwrap()
}

async fn garage(engine: &Engine) -> Ulid {
    let spot = Ulid::new();
    assert_ok!(engine.create_spot(spot, Ulid::new(), 10.0, "EUR".into()).await);
    let hours: TimeRange = "08:00-22:00".parse().unwrap();
    let schedule = [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
        .into_iter()
        .fold(WeeklySchedule::default(), |s, d| s.with_day(d, vec![hours]));
    assert_ok!(engine.set_schedule(spot, schedule).await);
    spot
}

// ── Flows ────────────────────────────────────────────────────

#[tokio::test]
async fn driver_books_parks_and_leaves() {
    let clock = Arc::new(ManualClock::new(NOON - 24 * H));
    let path = wal_path();
    let engine = open(&path, clock.clone());
    let spot = garage(&engine).await;

    let lunch = PriceRuleKind::TimeOfDay {
        hours: "11:00-14:00".parse().unwrap(),
    };
    assert_ok!(
        engine
            .add_price_rule(Ulid::new(), spot, lunch, 1.2, Some("lunch rush".into()))
            .await
    );

    let driver = Ulid::new();
    let booking = assert_ok!(
        engine
            .create_booking(Ulid::new(), spot, driver, NOON, NOON + 2 * H, Some("silver hatchback".into()))
            .await
    );
    assert_eq!(booking.status, BookingStatus::Pending);
    assert!((booking.total_price - 24.0).abs() < 1e-9);
    assert_eq!(booking.applied_rules[0].rule_name, "lunch rush");

    // Someone else wants an overlapping hour.
    let err = assert_err!(
        engine
            .create_booking(Ulid::new(), spot, Ulid::new(), NOON + H, NOON + 3 * H, None)
            .await
    );
    assert!(matches!(err, EngineError::Conflict(id) if id == booking.id));

    assert_ok!(engine.transition_booking(booking.id, BookingAction::Confirm).await);
    let with_code = assert_ok!(
        engine
            .transition_booking(booking.id, BookingAction::IssueAccessCode)
            .await
    );
    assert!(with_code.access_code.is_some());

    clock.set(NOON - 30 * 60_000);
    assert_ok!(engine.transition_booking(booking.id, BookingAction::CheckIn).await);
    clock.set(NOON + 2 * H);
    let done = assert_ok!(engine.transition_booking(booking.id, BookingAction::CheckOut).await);
    assert_eq!(done.status, BookingStatus::Completed);

    let stats = engine.user_stats(driver).await;
    assert_eq!(stats.completed, 1);
    assert!((stats.completed_revenue - 24.0).abs() < 1e-9);
}

#[tokio::test]
async fn weekend_and_closures_are_refused() {
    let clock = Arc::new(ManualClock::new(NOON - 24 * H));
    let engine = open(&wal_path(), clock);
    let spot = garage(&engine).await;

    // Saturday noon.
    let sat = NOON + 3 * 24 * H;
    let err = assert_err!(
        engine
            .create_booking(Ulid::new(), spot, Ulid::new(), sat, sat + H, None)
            .await
    );
    assert!(matches!(err, EngineError::Unavailable(_)));

    let closed = AvailabilityException::closed(chrono::NaiveDate::from_ymd_opt(2024, 4, 17).unwrap());
    assert_ok!(engine.set_exception(spot, closed).await);
    assert!(!assert_ok!(engine.check_availability(spot, NOON, NOON + H).await));
    assert!(assert_ok!(engine.free_windows(spot, chrono::NaiveDate::from_ymd_opt(2024, 4, 17).unwrap()).await).is_empty());
}

#[tokio::test]
async fn reschedule_and_cancel() {
    let clock = Arc::new(ManualClock::new(NOON - 24 * H));
    let engine = open(&wal_path(), clock);
    let spot = garage(&engine).await;

    let b = assert_ok!(
        engine
            .create_booking(Ulid::new(), spot, Ulid::new(), NOON, NOON + H, None)
            .await
    );
    let moved = assert_ok!(
        engine
            .update_booking(
                b.id,
                BookingUpdate {
                    start: Some(NOON + 4 * H),
                    end: Some(NOON + 7 * H),
                    notes: None,
                },
            )
            .await
    );
    assert!((moved.total_price - 30.0).abs() < 1e-9);
    assert_eq!(moved.created_at, b.created_at);

    let canceled = assert_ok!(engine.transition_booking(b.id, BookingAction::Cancel).await);
    assert_eq!(canceled.status, BookingStatus::Canceled);
    let err = assert_err!(engine.transition_booking(b.id, BookingAction::Confirm).await);
    assert!(matches!(err, EngineError::InvalidTransition { status: BookingStatus::Canceled, .. }));
    assert_ok!(engine.remove_booking(b.id).await);
}

#[tokio::test]
async fn event_suggestion_applied_and_survives_restart() {
    let clock = Arc::new(ManualClock::new(NOON - 24 * H));
    let path = wal_path();
    let engine = open(&path, clock.clone());
    let spot = garage(&engine).await;

    let ctx = assert_ok!(SuggestionContext::from_json(&format!(
        r#"{{"events": [{{"name": "Stadium tour", "event_type": "Concert",
             "distance_m": 150.0, "expected_attendance": 20000,
             "start": {}, "end": {}}}]}}"#,
        NOON + H,
        NOON + 4 * H
    )));
    let s = assert_ok!(
        engine
            .suggest_price(spot, NOON, NOON + 2 * H, SuggestionAlgorithm::EventAware, &ctx)
            .await
    );
    assert_eq!(s.suggested_price, 25.0);
    assert!((s.confidence - 0.72).abs() < 1e-9);
    assert_eq!(s.events.len(), 1);
    assert_eq!(assert_ok!(engine.get_spot_info(spot).await).base_price, 10.0);

    assert_ok!(engine.apply_suggestion(s.id).await);
    drop(engine);

    let engine = open(&path, clock);
    assert_eq!(assert_ok!(engine.get_spot_info(spot).await).base_price, 25.0);
    let restored = assert_ok!(engine.get_suggestion(s.id));
    assert!(restored.applied);
    let perf = engine.suggestion_performance(spot);
    assert_eq!(perf.applied_count, 1);
    assert_eq!(perf.top_factors[0].0, "events");
}
