use chrono::Datelike;

use crate::calendar::LocalWindow;
use crate::model::*;

use super::store::PriceRuleStore;

/// Whether a rule's condition holds for the window. Time-based conditions are
/// tested against the window's start only.
pub fn rule_applies(kind: &PriceRuleKind, window: &LocalWindow) -> bool {
    match kind {
        PriceRuleKind::TimeOfDay { hours } => hours.contains(window.start_time()),
        PriceRuleKind::DayOfWeek { days } => {
            let day = window.start.weekday().num_days_from_sunday() as u8;
            days.contains(&day)
        }
        PriceRuleKind::DateRange { from, until } => {
            *from <= window.span.start && window.span.start <= *until
        }
        PriceRuleKind::Duration | PriceRuleKind::Discount => true,
    }
}

/// Hourly price × duration, then every applicable active rule multiplied in,
/// in store order. Each step records the absolute change it caused, so the
/// trace depends on order even where the product does not.
pub fn compute_price(rules: &impl PriceRuleStore, window: &LocalWindow) -> PriceQuote {
    let base_price = rules.hourly_price() * window.span.duration_hours();
    let mut running = base_price;
    let mut applied_rules = Vec::new();

    for rule in rules.active_rules() {
        if !rule_applies(&rule.kind, window) {
            continue;
        }
        let before = running;
        running *= rule.factor;
        applied_rules.push(AppliedRule {
            rule_id: rule.id,
            rule_name: rule.display_name(),
            rule_type: rule.kind.rule_type(),
            factor: rule.factor,
            price_effect: running - before,
        });
    }

    PriceQuote {
        base_price,
        final_price: running,
        applied_rules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;
    use ulid::Ulid;

    // Monday 2024-01-15 00:00 UTC.
    const MON: Ms = 1_705_276_800_000;

    fn window(start: Ms, end: Ms) -> LocalWindow {
        LocalWindow::resolve(Span::new(start, end), Tz::UTC).unwrap()
    }

    fn spot(base: f64) -> SpotState {
        SpotState::new(Ulid::new(), Ulid::new(), base, "EUR".into())
    }

    fn add(rs: &mut SpotState, kind: PriceRuleKind, factor: f64, created_at: Ms) -> Ulid {
        let id = Ulid::new();
        rs.insert_rule(PriceRule {
            id,
            spot_id: rs.id,
            kind,
            factor,
            name: None,
            is_active: true,
            seq: rs.next_rule_seq(),
            created_at,
        });
        id
    }

    fn evening() -> PriceRuleKind {
        PriceRuleKind::TimeOfDay {
            hours: "17:00-19:00".parse().unwrap(),
        }
    }

    #[test]
    fn no_rules_is_hourly_times_duration() {
        let rs = spot(10.0);
        let quote = compute_price(&rs, &window(MON + 16 * HOUR_MS, MON + 18 * HOUR_MS));
        assert_eq!(quote.base_price, 20.0);
        assert_eq!(quote.final_price, 20.0);
        assert!(quote.applied_rules.is_empty());
    }

    #[test]
    fn fractional_hours() {
        let rs = spot(10.0);
        let quote = compute_price(&rs, &window(MON, MON + 90 * MINUTE_MS));
        assert_eq!(quote.base_price, 15.0);
    }

    #[test]
    fn time_of_day_tests_start_only() {
        let mut rs = spot(10.0);
        add(&mut rs, evening(), 1.3, 1);
        // Starts 16:00, runs into the window: not applied.
        let quote = compute_price(&rs, &window(MON + 16 * HOUR_MS, MON + 18 * HOUR_MS));
        assert_eq!(quote.final_price, 20.0);
        assert!(quote.applied_rules.is_empty());

        // Starts 17:00: applied.
        let quote = compute_price(&rs, &window(MON + 17 * HOUR_MS, MON + 19 * HOUR_MS));
        assert!((quote.final_price - 26.0).abs() < 1e-9);
        assert_eq!(quote.applied_rules.len(), 1);
        assert_eq!(quote.applied_rules[0].rule_type, PriceRuleType::TimeOfDay);
    }

    #[test]
    fn time_of_day_bounds_are_inclusive() {
        let mut rs = spot(10.0);
        add(&mut rs, evening(), 2.0, 1);
        let quote = compute_price(&rs, &window(MON + 19 * HOUR_MS, MON + 20 * HOUR_MS));
        assert_eq!(quote.final_price, 20.0);
    }

    #[test]
    fn day_of_week_counts_from_sunday() {
        let mut rs = spot(10.0);
        add(&mut rs, PriceRuleKind::DayOfWeek { days: vec![1] }, 1.5, 1);
        let monday = compute_price(&rs, &window(MON + 10 * HOUR_MS, MON + 11 * HOUR_MS));
        assert_eq!(monday.final_price, 15.0);
        let tuesday = compute_price(
            &rs,
            &window(MON + 34 * HOUR_MS, MON + 35 * HOUR_MS),
        );
        assert_eq!(tuesday.final_price, 10.0);
    }

    #[test]
    fn date_range_is_inclusive_on_start() {
        let mut rs = spot(10.0);
        let start = MON + 10 * HOUR_MS;
        add(&mut rs, PriceRuleKind::DateRange { from: start, until: start }, 2.0, 1);
        assert_eq!(compute_price(&rs, &window(start, start + HOUR_MS)).final_price, 20.0);
        assert_eq!(
            compute_price(&rs, &window(start + 1, start + HOUR_MS)).final_price,
            10.0
        );
    }

    #[test]
    fn unconditional_kinds_always_apply() {
        let mut rs = spot(10.0);
        add(&mut rs, PriceRuleKind::Duration, 0.9, 1);
        add(&mut rs, PriceRuleKind::Discount, 0.5, 2);
        let quote = compute_price(&rs, &window(MON, MON + HOUR_MS));
        assert!((quote.final_price - 4.5).abs() < 1e-9);
        assert_eq!(quote.applied_rules.len(), 2);
    }

    #[test]
    fn inactive_rule_is_skipped() {
        let mut rs = spot(10.0);
        let id = add(&mut rs, PriceRuleKind::Discount, 0.5, 1);
        let mut rule = rs.rules[0].clone();
        rule.is_active = false;
        assert!(rs.replace_rule(rule));
        let quote = compute_price(&rs, &window(MON, MON + HOUR_MS));
        assert_eq!(quote.final_price, 10.0);
        assert!(quote.applied_rules.iter().all(|r| r.rule_id != id));
    }

    #[test]
    fn order_changes_the_trace() {
        let win = window(MON + 17 * HOUR_MS, MON + 19 * HOUR_MS);

        let mut a = spot(10.0);
        add(&mut a, evening(), 1.5, 1);
        add(&mut a, PriceRuleKind::Discount, 0.8, 2);
        let qa = compute_price(&a, &win);

        let mut b = spot(10.0);
        add(&mut b, PriceRuleKind::Discount, 0.8, 1);
        add(&mut b, evening(), 1.5, 2);
        let qb = compute_price(&b, &win);

        let effects = |q: &PriceQuote| -> Vec<f64> {
            q.applied_rules.iter().map(|r| (r.price_effect * 100.0).round() / 100.0).collect()
        };
        assert_eq!(effects(&qa), vec![10.0, -6.0]);
        assert_eq!(effects(&qb), vec![-4.0, 8.0]);
        assert!((qa.final_price - 24.0).abs() < 1e-9);
        assert!((qb.final_price - 24.0).abs() < 1e-9);
    }

    #[test]
    fn unnamed_rule_uses_type_label() {
        let mut rs = spot(10.0);
        add(&mut rs, PriceRuleKind::Discount, 0.5, 1);
        let quote = compute_price(&rs, &window(MON, MON + HOUR_MS));
        assert!(!quote.applied_rules[0].rule_name.is_empty());
    }
}
