use serde::{Deserialize, Serialize};

use crate::model::NearbyEvent;

/// Optional market signals supplied with a suggestion request.
///
/// Every field may be absent; absent signals count as neutral (1.0) and lower
/// the multi-factor confidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestionContext {
    #[serde(default)]
    pub events: Vec<NearbyEvent>,
    /// Share of comparable spots currently booked, nominally 0..=1.
    #[serde(default)]
    pub occupancy_rate: Option<f64>,
    /// Normalised demand, nominally 0..=1.
    #[serde(default)]
    pub demand_score: Option<f64>,
    /// Share of nearby spots still free, nominally 0..=1.
    #[serde(default)]
    pub nearby_availability: Option<f64>,
    #[serde(default)]
    pub weather: Option<Weather>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    /// Free-form condition, matched exactly: `rain`, `snow`, `sunny`, ...
    pub condition: String,
    #[serde(default)]
    pub temperature_c: Option<f64>,
}

impl SuggestionContext {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
