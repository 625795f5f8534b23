use std::fmt;

use tracing::warn;

use crate::calendar::LocalWindow;
use crate::model::PriceFactors;

use super::base::BasePricing;
use super::context::{SuggestionContext, Weather};
use super::event::EventPricing;
use super::{PricingAlgorithm, Suggestion, round_cents};

const BASE_CONFIDENCE: f64 = 0.7;
const SIGNAL_CONFIDENCE: f64 = 0.05;
const EVENTS_CONFIDENCE: f64 = 0.1;

/// Weights of the combined score; they sum to 1.0.
const WEIGHTS: PriceFactors = PriceFactors {
    time_of_day: Some(0.15),
    day_of_week: Some(0.15),
    seasonality: Some(0.10),
    events: Some(0.25),
    occupancy: Some(0.15),
    demand: Some(0.10),
    competition: Some(0.05),
    weather: Some(0.05),
};

#[derive(Debug, Clone, PartialEq)]
pub enum SuggestError {
    BasePrice(f64),
    /// Signal that is not a finite number.
    Signal(&'static str, f64),
}

impl fmt::Display for SuggestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuggestError::BasePrice(p) => write!(f, "unusable base price {p}"),
            SuggestError::Signal(name, v) => write!(f, "{name} is not a finite number: {v}"),
        }
    }
}

impl std::error::Error for SuggestError {}

/// Weighted blend of calendar, event and market signals.
///
/// `suggest` never fails: bad input degrades to [`BasePricing`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiFactorPricing;

/// Values past the nominal 0..=1 range still land in the outer bands.
fn finite_signal(name: &'static str, v: Option<f64>) -> Result<Option<f64>, SuggestError> {
    match v {
        Some(x) if !x.is_finite() => Err(SuggestError::Signal(name, x)),
        other => Ok(other),
    }
}

pub fn occupancy_factor(rate: Option<f64>) -> f64 {
    match rate {
        None => 1.0,
        Some(r) if r > 0.9 => 1.5,
        Some(r) if r > 0.7 => 1.3,
        Some(r) if r > 0.5 => 1.1,
        Some(r) if r < 0.3 => 0.9,
        Some(_) => 1.0,
    }
}

pub fn demand_factor(score: Option<f64>) -> f64 {
    score.map_or(1.0, |s| 0.8 + s * 0.4)
}

pub fn competition_factor(nearby_availability: Option<f64>) -> f64 {
    match nearby_availability {
        None => 1.0,
        Some(a) if a < 0.1 => 1.2,
        Some(a) if a < 0.3 => 1.1,
        Some(a) if a > 0.7 => 0.9,
        Some(_) => 1.0,
    }
}

pub fn weather_factor(weather: Option<&Weather>) -> f64 {
    let Some(w) = weather else { return 1.0 };
    match w.condition.as_str() {
        "rain" | "snow" => 1.2,
        "sunny" if w.temperature_c.is_some_and(|t| t > 25.0) => 0.9,
        _ => 1.0,
    }
}

/// 0.7, plus 0.05 per market signal present and 0.1 when any events were supplied.
pub fn confidence(ctx: &SuggestionContext) -> f64 {
    let signals = [
        ctx.occupancy_rate.is_some(),
        ctx.demand_score.is_some(),
        ctx.nearby_availability.is_some(),
        ctx.weather.is_some(),
    ]
    .into_iter()
    .filter(|present| *present)
    .count();
    let mut score = BASE_CONFIDENCE + SIGNAL_CONFIDENCE * signals as f64;
    if !ctx.events.is_empty() {
        score += EVENTS_CONFIDENCE;
    }
    score.min(1.0)
}

fn weighted_sum(factors: &PriceFactors) -> f64 {
    let weights = WEIGHTS.entries();
    factors
        .entries()
        .into_iter()
        .map(|(name, value)| {
            let weight = weights
                .iter()
                .find(|(w, _)| *w == name)
                .map_or(0.0, |(_, w)| *w);
            value * weight
        })
        .sum()
}

impl MultiFactorPricing {
    pub fn try_suggest(
        &self,
        base_price: f64,
        window: &LocalWindow,
        ctx: &SuggestionContext,
    ) -> Result<Suggestion, SuggestError> {
        if !base_price.is_finite() || base_price < 0.0 {
            return Err(SuggestError::BasePrice(base_price));
        }
        let occupancy = finite_signal("occupancy_rate", ctx.occupancy_rate)?;
        let demand = finite_signal("demand_score", ctx.demand_score)?;
        let nearby = finite_signal("nearby_availability", ctx.nearby_availability)?;
        if let Some(t) = ctx.weather.as_ref().and_then(|w| w.temperature_c)
            && !t.is_finite()
        {
            return Err(SuggestError::Signal("temperature_c", t));
        }

        let base = BasePricing.suggest(base_price, window, ctx);
        let with_events = EventPricing.suggest(base_price, window, ctx);

        let factors = PriceFactors {
            time_of_day: base.factors.time_of_day.or(Some(1.0)),
            day_of_week: base.factors.day_of_week.or(Some(1.0)),
            seasonality: base.factors.seasonality.or(Some(1.0)),
            events: with_events.factors.events.or(Some(1.0)),
            occupancy: Some(occupancy_factor(occupancy)),
            demand: Some(demand_factor(demand)),
            competition: Some(competition_factor(nearby)),
            weather: Some(weather_factor(ctx.weather.as_ref())),
        };

        Ok(Suggestion {
            suggested_price: round_cents(base_price * weighted_sum(&factors)),
            confidence: confidence(ctx),
            factors,
            events: with_events.events,
        })
    }
}

impl PricingAlgorithm for MultiFactorPricing {
    fn suggest(&self, base_price: f64, window: &LocalWindow, ctx: &SuggestionContext) -> Suggestion {
        self.try_suggest(base_price, window, ctx)
            .unwrap_or_else(|e| {
                warn!("multi-factor pricing failed, using base pricing: {e}");
                metrics::counter!(crate::observability::SUGGESTION_FALLBACKS_TOTAL).increment(1);
                BasePricing.suggest(base_price, window, ctx)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HOUR_MS, Ms, NearbyEvent, Span};
    use chrono_tz::Tz;

    // Wednesday 2024-04-17 12:00 UTC: every calendar factor is 1.0.
    const NOON: Ms = 1_713_355_200_000;

    fn window() -> LocalWindow {
        LocalWindow::resolve(Span::new(NOON, NOON + HOUR_MS), Tz::UTC).unwrap()
    }

    #[test]
    fn weights_sum_to_one() {
        let total: f64 = WEIGHTS.entries().iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn no_context_is_neutral() {
        let s = MultiFactorPricing
            .try_suggest(10.0, &window(), &SuggestionContext::default())
            .unwrap();
        assert_eq!(s.confidence, 0.7);
        assert_eq!(s.factors.occupancy, Some(1.0));
        assert_eq!(s.factors.demand, Some(1.0));
        assert_eq!(s.factors.competition, Some(1.0));
        assert_eq!(s.factors.weather, Some(1.0));
        assert_eq!(s.factors.events, Some(1.0));
        assert_eq!(s.suggested_price, 10.0);
    }

    #[test]
    fn signal_bands() {
        assert_eq!(occupancy_factor(Some(0.95)), 1.5);
        assert_eq!(occupancy_factor(Some(0.8)), 1.3);
        assert_eq!(occupancy_factor(Some(0.6)), 1.1);
        assert_eq!(occupancy_factor(Some(0.4)), 1.0);
        assert_eq!(occupancy_factor(Some(0.1)), 0.9);
        assert!((demand_factor(Some(1.0)) - 1.2).abs() < 1e-12);
        assert!((demand_factor(Some(0.0)) - 0.8).abs() < 1e-12);
        assert_eq!(competition_factor(Some(0.05)), 1.2);
        assert_eq!(competition_factor(Some(0.2)), 1.1);
        assert_eq!(competition_factor(Some(0.5)), 1.0);
        assert_eq!(competition_factor(Some(0.9)), 0.9);
    }

    #[test]
    fn weather_bands() {
        let w = |condition: &str, t: Option<f64>| Weather {
            condition: condition.into(),
            temperature_c: t,
        };
        assert_eq!(weather_factor(Some(&w("rain", None))), 1.2);
        assert_eq!(weather_factor(Some(&w("Rain", None))), 1.0);
        assert_eq!(weather_factor(Some(&w("snow", Some(-3.0)))), 1.2);
        assert_eq!(weather_factor(Some(&w("sunny", Some(30.0)))), 0.9);
        assert_eq!(weather_factor(Some(&w("sunny", Some(20.0)))), 1.0);
        assert_eq!(weather_factor(Some(&w("sunny", None))), 1.0);
        assert_eq!(weather_factor(None), 1.0);
    }

    #[test]
    fn full_context_raises_confidence_to_cap() {
        let ctx = SuggestionContext {
            events: vec![NearbyEvent {
                name: None,
                event_type: None,
                distance_m: None,
                expected_attendance: None,
                start: 0,
                end: 1,
            }],
            occupancy_rate: Some(0.95),
            demand_score: Some(1.0),
            nearby_availability: Some(0.05),
            weather: Some(Weather {
                condition: "rain".into(),
                temperature_c: None,
            }),
        };
        assert!((confidence(&ctx) - 1.0).abs() < 1e-9);
        assert!(confidence(&ctx) <= 1.0);

        let s = MultiFactorPricing.try_suggest(10.0, &window(), &ctx).unwrap();
        // Irrelevant event: events factor stays 1.0.
        // 0.15 + 0.15 + 0.10 + 0.25 + 1.5×0.15 + 1.2×0.10 + 1.2×0.05 + 1.2×0.05
        assert_eq!(s.suggested_price, 11.15);
        assert!(s.events.is_empty());
    }

    #[test]
    fn signals_past_unit_range_use_outer_bands() {
        let ctx = SuggestionContext {
            occupancy_rate: Some(1.7),
            demand_score: Some(2.0),
            nearby_availability: Some(-0.5),
            ..SuggestionContext::default()
        };
        let s = MultiFactorPricing.try_suggest(10.0, &window(), &ctx).unwrap();
        assert_eq!(s.factors.occupancy, Some(1.5));
        assert!((s.factors.demand.unwrap() - 1.6).abs() < 1e-12);
        assert_eq!(s.factors.competition, Some(1.2));
        // 0.65 + 1.5×0.15 + 1.6×0.10 + 1.2×0.05 + 0.05
        assert_eq!(s.suggested_price, 11.45);
    }

    #[test]
    fn nan_signal_falls_back() {
        let ctx = SuggestionContext {
            demand_score: Some(f64::NAN),
            ..SuggestionContext::default()
        };
        assert!(matches!(
            MultiFactorPricing.try_suggest(10.0, &window(), &ctx),
            Err(SuggestError::Signal("demand_score", _))
        ));
        let s = MultiFactorPricing.suggest(10.0, &window(), &ctx);
        assert_eq!(s.confidence, super::super::base::BASE_CONFIDENCE);
        assert_eq!(s.factors.demand, None);
        assert!(MultiFactorPricing.try_suggest(f64::INFINITY, &window(), &SuggestionContext::default()).is_err());
    }
}
