use chrono::{Datelike, Timelike, Weekday};

use crate::calendar::LocalWindow;
use crate::model::PriceFactors;

use super::context::SuggestionContext;
use super::{PricingAlgorithm, Suggestion, round_cents};

pub const BASE_CONFIDENCE: f64 = 0.8;

/// Calendar-only pricing: rush hours, weekends and season, all read from the
/// window's start.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasePricing;

pub fn time_of_day_factor(hour: u32) -> f64 {
    match hour {
        7..=8 | 17..=18 => 1.3,
        22.. | 0..=5 => 0.8,
        _ => 1.0,
    }
}

pub fn day_of_week_factor(day: Weekday) -> f64 {
    match day {
        Weekday::Sat | Weekday::Sun => 1.2,
        _ => 1.0,
    }
}

/// `month` is 1-based.
pub fn seasonality_factor(month: u32) -> f64 {
    match month {
        6..=8 => 1.2,
        12 | 1 | 2 => 0.9,
        _ => 1.0,
    }
}

impl PricingAlgorithm for BasePricing {
    fn suggest(&self, base_price: f64, window: &LocalWindow, _: &SuggestionContext) -> Suggestion {
        let time_of_day = time_of_day_factor(window.start.hour());
        let day_of_week = day_of_week_factor(window.start.weekday());
        let seasonality = seasonality_factor(window.start.month());

        Suggestion {
            suggested_price: round_cents(base_price * time_of_day * day_of_week * seasonality),
            confidence: BASE_CONFIDENCE,
            factors: PriceFactors {
                time_of_day: Some(time_of_day),
                day_of_week: Some(day_of_week),
                seasonality: Some(seasonality),
                ..PriceFactors::default()
            },
            events: Vec::new(),
        }
    }
}
