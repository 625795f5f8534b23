use crate::calendar::LocalWindow;
use crate::model::{HOUR_MS, Ms, NearbyEvent, Span};

use super::base::BasePricing;
use super::context::SuggestionContext;
use super::{PricingAlgorithm, Suggestion, round_cents};

/// How far outside the window an event may start or end and still count.
pub const EVENT_PROXIMITY_MS: Ms = 2 * HOUR_MS;
pub const MAX_EVENT_FACTOR: f64 = 3.0;
const CONFIDENCE_PENALTY: f64 = 0.9;

/// Base pricing scaled by demand from nearby events.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventPricing;

/// Event touches the window or starts/ends within two hours of its edges.
pub fn is_relevant(event: &NearbyEvent, window: &Span) -> bool {
    let (start, end) = (window.start, window.end);
    let overlaps = (start..=end).contains(&event.start)
        || (start..=end).contains(&event.end)
        || (event.start <= start && event.end >= end);
    let close = event.start.abs_diff(start) <= EVENT_PROXIMITY_MS as u64
        || event.end.abs_diff(end) <= EVENT_PROXIMITY_MS as u64;
    overlaps || close
}

fn distance_factor(distance_m: Option<f64>) -> f64 {
    match distance_m {
        Some(d) if d < 200.0 => 0.5,
        Some(d) if d < 500.0 => 0.3,
        Some(d) if d < 1000.0 => 0.1,
        _ => 0.05,
    }
}

fn size_factor(attendance: Option<u64>) -> f64 {
    match attendance.unwrap_or(0) {
        10_001.. => 2.0,
        5_001.. => 1.5,
        1_001.. => 1.2,
        _ => 1.0,
    }
}

fn type_factor(event_type: Option<&str>) -> f64 {
    match event_type.map(str::to_ascii_lowercase).as_deref() {
        Some("concert" | "festival" | "sporting") => 1.5,
        Some("conference" | "exhibition") => 1.2,
        _ => 1.0,
    }
}

pub fn event_impact(event: &NearbyEvent) -> f64 {
    distance_factor(event.distance_m)
        * size_factor(event.expected_attendance)
        * type_factor(event.event_type.as_deref())
}

/// 1.0 plus each event's impact, saturating at [`MAX_EVENT_FACTOR`].
pub fn event_factor<'a>(events: impl IntoIterator<Item = &'a NearbyEvent>) -> f64 {
    events
        .into_iter()
        .fold(1.0, |acc, e| (acc + event_impact(e)).min(MAX_EVENT_FACTOR))
}

pub fn relevant_events(ctx: &SuggestionContext, window: &Span) -> Vec<NearbyEvent> {
    ctx.events
        .iter()
        .filter(|e| is_relevant(e, window))
        .cloned()
        .collect()
}

impl PricingAlgorithm for EventPricing {
    fn suggest(&self, base_price: f64, window: &LocalWindow, ctx: &SuggestionContext) -> Suggestion {
        let base = BasePricing.suggest(base_price, window, ctx);
        let events = relevant_events(ctx, &window.span);
        let factor = event_factor(&events);

        let mut factors = base.factors;
        factors.events = Some(factor);
        Suggestion {
            suggested_price: round_cents(base.suggested_price * factor),
            confidence: base.confidence * CONFIDENCE_PENALTY,
            factors,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    // Wednesday 2024-04-17 12:00 UTC: every base factor is 1.0.
    const NOON: Ms = 1_713_355_200_000;

    fn window() -> LocalWindow {
        LocalWindow::resolve(Span::new(NOON, NOON + 2 * HOUR_MS), Tz::UTC).unwrap()
    }

    fn event(start: Ms, end: Ms) -> NearbyEvent {
        NearbyEvent {
            name: None,
            event_type: None,
            distance_m: None,
            expected_attendance: None,
            start,
            end,
        }
    }

    fn big_concert(start: Ms, end: Ms) -> NearbyEvent {
        NearbyEvent {
            name: Some("Stadium tour".into()),
            event_type: Some("Concert".into()),
            distance_m: Some(150.0),
            expected_attendance: Some(20_000),
            ..event(start, end)
        }
    }

    #[test]
    fn relevance() {
        let span = window().span;
        assert!(is_relevant(&event(NOON + HOUR_MS, NOON + 5 * HOUR_MS), &span));
        assert!(is_relevant(&event(NOON - 5 * HOUR_MS, NOON + 5 * HOUR_MS), &span));
        // Five hours before, nothing near either edge.
        assert!(!is_relevant(&event(NOON - 6 * HOUR_MS, NOON - 5 * HOUR_MS), &span));
        // Starts 90 minutes after the window ends: end times are within 2h of each other.
        assert!(is_relevant(
            &event(NOON + 3 * HOUR_MS + 30 * 60_000, NOON + 3 * HOUR_MS + 45 * 60_000),
            &span
        ));
        assert!(!is_relevant(&event(NOON + 10 * HOUR_MS, NOON + 12 * HOUR_MS), &span));
    }

    #[test]
    fn extreme_timestamps_are_not_relevant() {
        let span = window().span;
        assert!(!is_relevant(&event(i64::MIN, i64::MIN + 1), &span));
        assert!(!is_relevant(&event(i64::MAX - 1, i64::MAX), &span));
        assert!(is_relevant(&event(i64::MIN, i64::MAX), &span));
    }

    #[test]
    fn impact_bands() {
        // 0.5 × 2.0 × 1.5
        assert_eq!(event_impact(&big_concert(0, 1)), 1.5);
        // Unknown distance, size and type.
        assert_eq!(event_impact(&event(0, 1)), 0.05);
        let conference = NearbyEvent {
            event_type: Some("conference".into()),
            distance_m: Some(450.0),
            expected_attendance: Some(3_000),
            ..event(0, 1)
        };
        // 0.3 × 1.2 × 1.2
        assert!((event_impact(&conference) - 0.432).abs() < 1e-9);
    }

    #[test]
    fn factor_is_capped() {
        let events = vec![big_concert(0, 1); 3];
        assert_eq!(event_factor(&events), MAX_EVENT_FACTOR);
        assert_eq!(event_factor(std::iter::empty()), 1.0);
    }

    #[test]
    fn no_events_matches_base_price() {
        let s = EventPricing.suggest(10.0, &window(), &SuggestionContext::default());
        assert_eq!(s.suggested_price, 10.0);
        assert_eq!(s.factors.events, Some(1.0));
        assert!((s.confidence - 0.72).abs() < 1e-9);
        assert!(s.events.is_empty());
    }

    #[test]
    fn relevant_concert_raises_price() {
        let ctx = SuggestionContext {
            events: vec![
                big_concert(NOON + HOUR_MS, NOON + 4 * HOUR_MS),
                big_concert(NOON + 20 * HOUR_MS, NOON + 23 * HOUR_MS),
            ],
            ..SuggestionContext::default()
        };
        let s = EventPricing.suggest(10.0, &window(), &ctx);
        assert_eq!(s.factors.events, Some(2.5));
        assert_eq!(s.suggested_price, 25.0);
        assert_eq!(s.events.len(), 1);
    }
}
