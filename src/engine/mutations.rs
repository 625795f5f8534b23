use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{RwLock, oneshot};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::suggest::{self, SuggestionContext};

use super::availability::is_available;
use super::conflict::{check_no_conflict, validate_window};
use super::lifecycle::{self, Step};
use super::pricing::compute_price;
use super::{Engine, EngineError, WalCommand, apply_to_suggestions};

/// Partial booking update. `None` leaves a field as it is; `notes: Some(None)`
/// clears the notes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingUpdate {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub notes: Option<Option<String>>,
}

// ── Input validation ─────────────────────────────────────

fn validate_price(price: f64) -> Result<(), EngineError> {
    if !price.is_finite() || price < 0.0 {
        return Err(EngineError::Validation("price must be a non-negative number"));
    }
    Ok(())
}

fn validate_event(event: &NearbyEvent) -> Result<(), EngineError> {
    let in_range = |t: Ms| (MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t);
    if !in_range(event.start) || !in_range(event.end) {
        return Err(EngineError::Validation("event time out of range"));
    }
    if event.start > event.end {
        return Err(EngineError::Validation("event must not end before it starts"));
    }
    Ok(())
}

fn validate_currency(currency: &str) -> Result<(), EngineError> {
    if currency.is_empty() {
        return Err(EngineError::Validation("currency is required"));
    }
    if currency.len() > MAX_CURRENCY_LEN {
        return Err(EngineError::LimitExceeded("currency code too long"));
    }
    Ok(())
}

fn validate_slots(slots: &[TimeRange]) -> Result<(), EngineError> {
    if slots.len() > MAX_SLOTS_PER_DAY {
        return Err(EngineError::LimitExceeded("too many slots in a day"));
    }
    if slots.iter().any(|s| s.start >= s.end) {
        return Err(EngineError::Validation("slot must start before it ends"));
    }
    Ok(())
}

fn validate_schedule(schedule: &WeeklySchedule) -> Result<(), EngineError> {
    use chrono::Weekday::*;
    [Mon, Tue, Wed, Thu, Fri, Sat, Sun]
        .into_iter()
        .try_for_each(|day| validate_slots(schedule.slots(day)))
}

fn validate_rule(kind: &PriceRuleKind, factor: f64, name: Option<&str>) -> Result<(), EngineError> {
    if !factor.is_finite() || factor <= 0.0 {
        return Err(EngineError::Validation("factor must be a positive number"));
    }
    if name.is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("rule name too long"));
    }
    match kind {
        PriceRuleKind::TimeOfDay { hours } if hours.start > hours.end => {
            Err(EngineError::Validation("hours range is inverted"))
        }
        PriceRuleKind::DayOfWeek { days } if days.is_empty() || days.len() > MAX_DAYS_PER_RULE => {
            Err(EngineError::Validation("day list must name one to seven days"))
        }
        PriceRuleKind::DayOfWeek { days } if days.iter().any(|d| *d > 6) => {
            Err(EngineError::Validation("days are numbered 0 (Sunday) to 6"))
        }
        PriceRuleKind::DateRange { from, until } if from > until => {
            Err(EngineError::Validation("date range is inverted"))
        }
        _ => Ok(()),
    }
}

fn validate_notes(notes: Option<&str>) -> Result<(), EngineError> {
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

impl Engine {
    // ── Spots ────────────────────────────────────────────

    pub async fn create_spot(
        &self,
        id: Ulid,
        owner_id: Ulid,
        base_price: f64,
        currency: String,
    ) -> Result<(), EngineError> {
        validate_price(base_price)?;
        validate_currency(&currency)?;
        let _gate = self.commit_gate.read().await;
        if self.state.len() >= MAX_SPOTS {
            return Err(EngineError::LimitExceeded("too many spots"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::SpotCreated {
            id,
            owner_id,
            base_price,
            currency: currency.clone(),
        };
        self.wal_append(&event).await?;
        let rs = SpotState::new(id, owner_id, base_price, currency);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        metrics::gauge!(observability::SPOTS_ACTIVE).set(self.state.len() as f64);
        debug!(%id, base_price, "spot created");
        Ok(())
    }

    pub async fn update_spot(
        &self,
        id: Ulid,
        base_price: f64,
        currency: String,
    ) -> Result<(), EngineError> {
        validate_price(base_price)?;
        validate_currency(&currency)?;
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_spot_write(id).await?;
        let event = Event::SpotUpdated {
            id,
            base_price,
            currency,
        };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Refused while the spot has pending or confirmed bookings.
    pub async fn delete_spot(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let guard = self.lock_spot_write(id).await?;
        if guard.active_booking_count() > 0 {
            return Err(EngineError::HasActiveBookings(id));
        }

        let event = Event::SpotDeleted { id };
        self.wal_append(&event).await?;
        self.drop_spot(&guard);
        apply_to_suggestions(&self.suggestions, &event);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        metrics::gauge!(observability::SPOTS_ACTIVE).set(self.state.len() as f64);
        debug!(%id, "spot deleted");
        Ok(())
    }

    pub async fn set_schedule(
        &self,
        spot_id: Ulid,
        schedule: WeeklySchedule,
    ) -> Result<(), EngineError> {
        validate_schedule(&schedule)?;
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_spot_write(spot_id).await?;
        let event = Event::ScheduleSet { spot_id, schedule };
        self.persist_and_apply(spot_id, &mut guard, &event).await
    }

    /// Insert or replace the exception for `exception.date`.
    pub async fn set_exception(
        &self,
        spot_id: Ulid,
        exception: AvailabilityException,
    ) -> Result<(), EngineError> {
        validate_slots(&exception.slots)?;
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_spot_write(spot_id).await?;
        if !guard.exceptions.contains_key(&exception.date)
            && guard.exceptions.len() >= MAX_EXCEPTIONS_PER_SPOT
        {
            return Err(EngineError::LimitExceeded("too many exceptions"));
        }
        let event = Event::ExceptionSet { spot_id, exception };
        self.persist_and_apply(spot_id, &mut guard, &event).await
    }

    /// Returns whether an exception existed for `date`.
    pub async fn remove_exception(&self, spot_id: Ulid, date: NaiveDate) -> Result<bool, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_spot_write(spot_id).await?;
        if !guard.exceptions.contains_key(&date) {
            return Ok(false);
        }
        let event = Event::ExceptionRemoved { spot_id, date };
        self.persist_and_apply(spot_id, &mut guard, &event).await?;
        Ok(true)
    }

    // ── Price rules ──────────────────────────────────────

    pub async fn add_price_rule(
        &self,
        id: Ulid,
        spot_id: Ulid,
        kind: PriceRuleKind,
        factor: f64,
        name: Option<String>,
    ) -> Result<PriceRule, EngineError> {
        validate_rule(&kind, factor, name.as_deref())?;
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_spot_write(spot_id).await?;
        if guard.rules.len() >= MAX_RULES_PER_SPOT {
            return Err(EngineError::LimitExceeded("too many price rules"));
        }
        if self.entity_to_spot.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rule = PriceRule {
            id,
            spot_id,
            kind,
            factor,
            name,
            is_active: true,
            seq: guard.next_rule_seq(),
            created_at: self.clock.now_ms(),
        };
        let event = Event::PriceRuleAdded { rule: rule.clone() };
        self.persist_and_apply(spot_id, &mut guard, &event).await?;
        debug!(%id, %spot_id, rule_type = rule.kind.rule_type().label(), factor, "price rule added");
        Ok(rule)
    }

    /// Replace a rule's condition, factor, name and active flag. The rule keeps
    /// its place in evaluation order.
    pub async fn update_price_rule(
        &self,
        id: Ulid,
        kind: PriceRuleKind,
        factor: f64,
        name: Option<String>,
        is_active: bool,
    ) -> Result<PriceRule, EngineError> {
        validate_rule(&kind, factor, name.as_deref())?;
        let _gate = self.commit_gate.read().await;
        let (spot_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .rules
            .iter()
            .find(|r| r.id == id)
            .ok_or(EngineError::NotFound(id))?;

        let rule = PriceRule {
            kind,
            factor,
            name,
            is_active,
            ..current.clone()
        };
        let event = Event::PriceRuleUpdated { rule: rule.clone() };
        self.persist_and_apply(spot_id, &mut guard, &event).await?;
        Ok(rule)
    }

    pub async fn set_price_rule_active(&self, id: Ulid, is_active: bool) -> Result<PriceRule, EngineError> {
        let _gate = self.commit_gate.read().await;
        let (spot_id, mut guard) = self.resolve_entity_write(&id).await?;
        let mut rule = guard
            .rules
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if rule.is_active == is_active {
            return Ok(rule);
        }
        rule.is_active = is_active;
        let event = Event::PriceRuleUpdated { rule: rule.clone() };
        self.persist_and_apply(spot_id, &mut guard, &event).await?;
        Ok(rule)
    }

    pub async fn remove_price_rule(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let (spot_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.rules.iter().any(|r| r.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::PriceRuleRemoved { id, spot_id };
        self.persist_and_apply(spot_id, &mut guard, &event).await
    }

    // ── Bookings ─────────────────────────────────────────

    /// Validate, check the schedule, check overlaps, price, then record the
    /// booking as pending. The spot stays write-locked throughout, so two
    /// requests for the same window cannot both pass the overlap check.
    pub async fn create_booking(
        &self,
        id: Ulid,
        spot_id: Ulid,
        user_id: Ulid,
        start: Ms,
        end: Ms,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        let span = validate_window(start, end)?;
        let now = self.clock.now_ms();
        if span.start < now {
            return Err(EngineError::Validation("start must not be in the past"));
        }
        validate_notes(notes.as_deref())?;
        let window = self.localize(span)?;

        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_spot_write(spot_id).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SPOT {
            return Err(EngineError::LimitExceeded("too many bookings for spot"));
        }
        if self.entity_to_spot.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        if !is_available(&*guard, &window) {
            metrics::counter!(observability::BOOKINGS_UNAVAILABLE_TOTAL).increment(1);
            return Err(EngineError::Unavailable(span));
        }
        if let Err(e) = check_no_conflict(&*guard, &span, None) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }
        let quote = compute_price(&*guard, &window);
        metrics::counter!(observability::PRICE_COMPUTATIONS_TOTAL).increment(1);

        let booking = Booking {
            id,
            spot_id,
            user_id,
            span,
            status: BookingStatus::Pending,
            total_price: quote.final_price,
            applied_rules: quote.applied_rules,
            checked_in: false,
            checked_in_at: None,
            checked_out: false,
            checked_out_at: None,
            access_code: None,
            notes,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(spot_id, &mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        debug!(%id, %spot_id, total_price = booking.total_price, "booking created");
        Ok(booking)
    }

    /// Move a booking and/or change its notes. A new window is checked for
    /// overlaps (ignoring the booking itself) and repriced from scratch; the
    /// schedule is not consulted again.
    pub async fn update_booking(&self, id: Ulid, update: BookingUpdate) -> Result<Booking, EngineError> {
        if let Some(Some(notes)) = &update.notes {
            validate_notes(Some(notes))?;
        }
        let _gate = self.commit_gate.read().await;
        let (spot_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        lifecycle::check_updatable(current)?;
        let now = self.clock.now_ms();

        let event = if update.start.is_some() || update.end.is_some() {
            let start = update.start.unwrap_or(current.span.start);
            let end = update.end.unwrap_or(current.span.end);
            let span = validate_window(start, end)?;
            if span.start < now && span.start != current.span.start {
                return Err(EngineError::Validation("start must not be in the past"));
            }
            let window = self.localize(span)?;
            if let Err(e) = check_no_conflict(&*guard, &span, Some(id)) {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(e);
            }
            let quote = compute_price(&*guard, &window);
            metrics::counter!(observability::PRICE_COMPUTATIONS_TOTAL).increment(1);
            Some(Event::BookingRescheduled {
                id,
                spot_id,
                span,
                total_price: quote.final_price,
                applied_rules: quote.applied_rules,
                notes: update.notes.clone(),
                at: now,
            })
        } else {
            update.notes.clone().map(|notes| Event::BookingNotesChanged {
                id,
                spot_id,
                notes,
                at: now,
            })
        };

        if let Some(event) = event {
            self.persist_and_apply(spot_id, &mut guard, &event).await?;
        }
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Drive the booking state machine.
    pub async fn transition_booking(&self, id: Ulid, action: BookingAction) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate.read().await;
        let (spot_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        let at = self.clock.now_ms();

        let event = match lifecycle::plan(booking, action, at)? {
            Step::SetStatus(status) => Event::BookingStatusChanged {
                id,
                spot_id,
                status,
                at,
            },
            Step::CheckIn => Event::BookingCheckedIn { id, spot_id, at },
            Step::CheckOut => Event::BookingCheckedOut { id, spot_id, at },
            Step::IssueAccessCode => Event::AccessCodeIssued {
                id,
                spot_id,
                code: lifecycle::generate_access_code(),
                at,
            },
        };
        self.persist_and_apply(spot_id, &mut guard, &event).await?;
        metrics::counter!(
            observability::BOOKING_TRANSITIONS_TOTAL,
            "action" => observability::action_label(action)
        )
        .increment(1);
        debug!(%id, action = action.label(), "booking transitioned");
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Set any status on a pending or confirmed booking. Authorization is the
    /// caller's business.
    pub async fn update_booking_status(&self, id: Ulid, status: BookingStatus) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate.read().await;
        let (spot_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        lifecycle::check_status_update(booking)?;
        let event = Event::BookingStatusChanged {
            id,
            spot_id,
            status,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(spot_id, &mut guard, &event).await?;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn remove_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let (spot_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        lifecycle::check_removable(booking)?;
        let event = Event::BookingRemoved { id, spot_id };
        self.persist_and_apply(spot_id, &mut guard, &event).await
    }

    // ── Suggestions ──────────────────────────────────────

    /// Run a suggestion strategy against the spot's current hourly price and
    /// record the result. The spot's price is left alone.
    pub async fn suggest_price(
        &self,
        spot_id: Ulid,
        start: Ms,
        end: Ms,
        algorithm: SuggestionAlgorithm,
        context: &SuggestionContext,
    ) -> Result<PriceSuggestion, EngineError> {
        let span = validate_window(start, end)?;
        if context.events.len() > MAX_CONTEXT_EVENTS {
            return Err(EngineError::LimitExceeded("too many context events"));
        }
        for event in &context.events {
            validate_event(event)?;
        }
        let window = self.localize(span)?;

        let _gate = self.commit_gate.read().await;
        let guard = self.lock_spot_write(spot_id).await?;
        let outcome = suggest::suggest(algorithm, guard.base_price, &window, context);
        let suggestion = PriceSuggestion {
            id: Ulid::new(),
            spot_id,
            algorithm,
            base_price: guard.base_price,
            suggested_price: outcome.suggested_price,
            confidence: outcome.confidence,
            span,
            factors: outcome.factors,
            events: outcome.events,
            applied: false,
            applied_at: None,
            created_at: self.clock.now_ms(),
        };

        let event = Event::SuggestionRecorded {
            suggestion: suggestion.clone(),
        };
        self.wal_append(&event).await?;
        apply_to_suggestions(&self.suggestions, &event);
        self.notify.send(spot_id, &event);
        metrics::counter!(observability::SUGGESTIONS_TOTAL, "algorithm" => algorithm.label())
            .increment(1);
        debug!(
            %spot_id,
            algorithm = algorithm.label(),
            suggested = suggestion.suggested_price,
            confidence = suggestion.confidence,
            "price suggested"
        );
        Ok(suggestion)
    }

    /// Adopt a suggestion as the spot's hourly price.
    pub async fn apply_suggestion(&self, id: Ulid) -> Result<PriceSuggestion, EngineError> {
        let _gate = self.commit_gate.read().await;
        let spot_id = self
            .suggestions
            .get(&id)
            .map(|s| s.spot_id)
            .ok_or(EngineError::NotFound(id))?;
        let mut guard = self.lock_spot_write(spot_id).await?;
        let suggested_price = self
            .suggestions
            .get(&id)
            .map(|s| s.suggested_price)
            .ok_or(EngineError::NotFound(id))?;

        let event = Event::SuggestionApplied {
            id,
            spot_id,
            base_price: suggested_price,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(spot_id, &mut guard, &event).await?;
        debug!(%id, %spot_id, base_price = suggested_price, "suggestion applied");
        self.suggestions
            .get(&id)
            .map(|s| s.clone())
            .ok_or(EngineError::NotFound(id))
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL as the minimal event list that rebuilds current state.
    /// Mutations wait while it runs.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let spots: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(spots.len());
        for rs in spots {
            guards.push(rs.read_owned().await);
        }
        guards.sort_by_key(|g| g.id);

        let mut events = Vec::new();
        for rs in &guards {
            events.push(Event::SpotCreated {
                id: rs.id,
                owner_id: rs.owner_id,
                base_price: rs.base_price,
                currency: rs.currency.clone(),
            });
            if rs.schedule != WeeklySchedule::default() {
                events.push(Event::ScheduleSet {
                    spot_id: rs.id,
                    schedule: rs.schedule.clone(),
                });
            }
            events.extend(rs.exceptions.values().map(|e| Event::ExceptionSet {
                spot_id: rs.id,
                exception: e.clone(),
            }));
            events.extend(rs.rules.iter().map(|r| Event::PriceRuleAdded { rule: r.clone() }));
            events.extend(rs.bookings.iter().map(|b| Event::BookingCreated { booking: b.clone() }));
        }

        let mut suggestions: Vec<PriceSuggestion> =
            self.suggestions.iter().map(|e| e.value().clone()).collect();
        suggestions.sort_by_key(|s| s.id);
        events.extend(
            suggestions
                .into_iter()
                .map(|suggestion| Event::SuggestionRecorded { suggestion }),
        );

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
