use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{free_windows, is_available};
use super::conflict::{find_conflict, validate_window};
use super::pricing::compute_price;
use super::{Engine, EngineError, SharedSpotState};

/// Share of a suggestion's price increase assumed to turn into revenue.
const REVENUE_REALIZATION: f64 = 0.8;

fn spot_info(rs: &SpotState) -> SpotInfo {
    SpotInfo {
        id: rs.id,
        owner_id: rs.owner_id,
        base_price: rs.base_price,
        currency: rs.currency.clone(),
        rule_count: rs.rules.len(),
        booking_count: rs.bookings.len(),
    }
}

fn tally<'a>(bookings: impl Iterator<Item = &'a Booking>, now: Ms) -> BookingStats {
    let mut stats = BookingStats::default();
    for b in bookings {
        stats.total += 1;
        match b.status {
            BookingStatus::Completed => {
                stats.completed += 1;
                stats.completed_revenue += b.total_price;
            }
            BookingStatus::Canceled => stats.canceled += 1,
            BookingStatus::Confirmed if b.span.start >= now => stats.upcoming += 1,
            _ => {}
        }
    }
    stats
}

impl Engine {
    async fn read_spot(
        &self,
        spot_id: Ulid,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<SpotState>, EngineError> {
        let rs = self.get_spot(&spot_id).ok_or(EngineError::NotFound(spot_id))?;
        Ok(rs.read_owned().await)
    }

    fn all_spots(&self) -> Vec<SharedSpotState> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }

    // ── Availability & price ─────────────────────────────

    /// Whether the spot's schedule opens for the whole window. Bookings are not
    /// considered; see [`Engine::is_bookable`].
    pub async fn check_availability(&self, spot_id: Ulid, start: Ms, end: Ms) -> Result<bool, EngineError> {
        let window = self.localize(validate_window(start, end)?)?;
        let guard = self.read_spot(spot_id).await?;
        Ok(is_available(&*guard, &window))
    }

    /// Open per schedule and free of active bookings.
    pub async fn is_bookable(&self, spot_id: Ulid, start: Ms, end: Ms) -> Result<bool, EngineError> {
        let span = validate_window(start, end)?;
        let window = self.localize(span)?;
        let guard = self.read_spot(spot_id).await?;
        Ok(is_available(&*guard, &window) && find_conflict(&*guard, &span, None).is_none())
    }

    /// Bookable spans on a local date, earliest first.
    pub async fn free_windows(&self, spot_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let guard = self.read_spot(spot_id).await?;
        Ok(free_windows(&*guard, date, self.tz))
    }

    pub async fn compute_price(&self, spot_id: Ulid, start: Ms, end: Ms) -> Result<PriceQuote, EngineError> {
        let window = self.localize(validate_window(start, end)?)?;
        let guard = self.read_spot(spot_id).await?;
        metrics::counter!(crate::observability::PRICE_COMPUTATIONS_TOTAL).increment(1);
        Ok(compute_price(&*guard, &window))
    }

    // ── Spots ────────────────────────────────────────────

    pub async fn get_spot_info(&self, spot_id: Ulid) -> Result<SpotInfo, EngineError> {
        Ok(spot_info(&*self.read_spot(spot_id).await?))
    }

    /// All spots ordered by id.
    pub async fn list_spots(&self) -> Vec<SpotInfo> {
        let mut out = Vec::with_capacity(self.state.len());
        for rs in self.all_spots() {
            out.push(spot_info(&*rs.read().await));
        }
        out.sort_by_key(|s| s.id);
        out
    }

    pub async fn get_schedule(&self, spot_id: Ulid) -> Result<WeeklySchedule, EngineError> {
        Ok(self.read_spot(spot_id).await?.schedule.clone())
    }

    /// Exceptions ordered by date.
    pub async fn list_exceptions(&self, spot_id: Ulid) -> Result<Vec<AvailabilityException>, EngineError> {
        let guard = self.read_spot(spot_id).await?;
        Ok(guard.exceptions.values().cloned().collect())
    }

    /// Every rule, active or not, in evaluation order.
    pub async fn list_price_rules(&self, spot_id: Ulid) -> Result<Vec<PriceRule>, EngineError> {
        Ok(self.read_spot(spot_id).await?.rules.clone())
    }

    // ── Bookings ─────────────────────────────────────────

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let guard = self.resolve_entity_read(&id).await?;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Matching bookings, most recently created first.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let spots = match filter.spot_id {
            Some(id) => self.get_spot(&id).into_iter().collect(),
            None => self.all_spots(),
        };
        let mut out = Vec::new();
        for rs in spots {
            let guard = rs.read().await;
            out.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    pub async fn spot_stats(&self, spot_id: Ulid) -> Result<BookingStats, EngineError> {
        let guard = self.read_spot(spot_id).await?;
        Ok(tally(guard.bookings.iter(), self.clock.now_ms()))
    }

    pub async fn user_stats(&self, user_id: Ulid) -> BookingStats {
        let filter = BookingFilter {
            user_id: Some(user_id),
            ..BookingFilter::default()
        };
        let bookings = self.list_bookings(&filter).await;
        tally(bookings.iter(), self.clock.now_ms())
    }

    // ── Suggestions ──────────────────────────────────────

    pub fn get_suggestion(&self, id: Ulid) -> Result<PriceSuggestion, EngineError> {
        self.suggestions
            .get(&id)
            .map(|s| s.clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Suggestions for a spot, newest first.
    pub fn list_suggestions(&self, spot_id: Ulid) -> Vec<PriceSuggestion> {
        let mut out: Vec<PriceSuggestion> = self
            .suggestions
            .iter()
            .filter(|e| e.spot_id == spot_id)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    /// How applied suggestions moved the spot's price, and which factors
    /// pushed hardest.
    pub fn suggestion_performance(&self, spot_id: Ulid) -> SuggestionPerformance {
        let applied: Vec<PriceSuggestion> = self
            .list_suggestions(spot_id)
            .into_iter()
            .filter(|s| s.applied)
            .collect();
        if applied.is_empty() {
            return SuggestionPerformance::default();
        }

        let total_increase: f64 = applied.iter().map(|s| s.suggested_price - s.base_price).sum();

        let mut per_factor: HashMap<&'static str, (f64, usize)> = HashMap::new();
        for (name, value) in applied.iter().flat_map(|s| s.factors.entries()) {
            let slot = per_factor.entry(name).or_default();
            slot.0 += value;
            slot.1 += 1;
        }
        let mut top_factors: Vec<(&'static str, f64)> = per_factor
            .into_iter()
            .map(|(name, (sum, n))| (name, sum / n as f64))
            .collect();
        top_factors.sort_by(|a, b| {
            (b.1 - 1.0)
                .abs()
                .total_cmp(&(a.1 - 1.0).abs())
                .then(a.0.cmp(b.0))
        });

        SuggestionPerformance {
            applied_count: applied.len(),
            average_price_increase: total_increase / applied.len() as f64,
            estimated_revenue_increase: total_increase * REVENUE_REALIZATION,
            top_factors,
        }
    }
}
