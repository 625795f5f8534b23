//! Advisory price suggestions.
//!
//! Three interchangeable strategies behind [`PricingAlgorithm`]. None of them
//! touches stored state; the engine records the result and only changes a
//! spot's price when a suggestion is explicitly applied.

pub mod base;
pub mod context;
pub mod event;
pub mod multi_factor;

pub use base::BasePricing;
pub use context::{SuggestionContext, Weather};
pub use event::EventPricing;
pub use multi_factor::{MultiFactorPricing, SuggestError};

use crate::calendar::LocalWindow;
use crate::model::{NearbyEvent, PriceFactors, SuggestionAlgorithm};

/// One strategy's answer for a window.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    /// Rounded to cents.
    pub suggested_price: f64,
    /// In `0.0..=1.0`.
    pub confidence: f64,
    pub factors: PriceFactors,
    /// Context events that influenced the price.
    pub events: Vec<NearbyEvent>,
}

pub trait PricingAlgorithm {
    /// `base_price` is the spot's hourly price.
    fn suggest(&self, base_price: f64, window: &LocalWindow, ctx: &SuggestionContext) -> Suggestion;
}

pub fn suggest(
    algorithm: SuggestionAlgorithm,
    base_price: f64,
    window: &LocalWindow,
    ctx: &SuggestionContext,
) -> Suggestion {
    match algorithm {
        SuggestionAlgorithm::Base => BasePricing.suggest(base_price, window, ctx),
        SuggestionAlgorithm::EventAware => EventPricing.suggest(base_price, window, ctx),
        SuggestionAlgorithm::MultiFactor => MultiFactorPricing.suggest(base_price, window, ctx),
    }
}

pub(crate) fn round_cents(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}
