mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod pricing;
mod queries;
mod store;

pub use availability::{free_windows, is_available, merge_spans, open_windows, subtract_spans};
pub use conflict::find_conflict;
pub use error::EngineError;
pub use lifecycle::{Step, generate_access_code};
pub use mutations::BookingUpdate;
pub use pricing::{compute_price, rule_applies};
pub use store::{BookingStore, PriceRuleStore, ScheduleStore};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono_tz::Tz;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::calendar::LocalWindow;
use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSpotState = Arc<RwLock<SpotState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Each wakeup takes every append already queued, writes them
/// as one batch with a single fsync, then answers all callers.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written frames don't sit in the
    // buffer and land in front of the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            if result.is_ok() {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct EngineOptions {
    /// Zone used for every wall-clock reading (dates, weekdays, "HH:MM").
    pub timezone: Tz,
    pub clock: Arc<dyn Clock>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedSpotState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Booking and rule id → owning spot id.
    pub(super) entity_to_spot: DashMap<Ulid, Ulid>,
    pub(super) suggestions: DashMap<Ulid, PriceSuggestion>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) tz: Tz,
    /// Mutations hold it shared from first lock to apply; compaction holds it
    /// exclusively so its snapshot and the log swap see the same state.
    pub(super) commit_gate: RwLock<()>,
}

/// Apply an event to a spot. Caller holds the spot's write lock.
fn apply_to_spot(rs: &mut SpotState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SpotUpdated {
            base_price,
            currency,
            ..
        } => {
            rs.base_price = *base_price;
            rs.currency = currency.clone();
        }
        Event::ScheduleSet { schedule, .. } => rs.schedule = schedule.clone(),
        Event::ExceptionSet { exception, .. } => {
            rs.exceptions.insert(exception.date, exception.clone());
        }
        Event::ExceptionRemoved { date, .. } => {
            rs.exceptions.remove(date);
        }
        Event::PriceRuleAdded { rule } => {
            rs.insert_rule(rule.clone());
            entity_map.insert(rule.id, rule.spot_id);
        }
        Event::PriceRuleUpdated { rule } => {
            rs.replace_rule(rule.clone());
        }
        Event::PriceRuleRemoved { id, .. } => {
            rs.remove_rule(*id);
            entity_map.remove(id);
        }
        Event::BookingCreated { booking } => {
            rs.insert_booking(booking.clone());
            entity_map.insert(booking.id, booking.spot_id);
        }
        Event::BookingRescheduled {
            id,
            span,
            total_price,
            applied_rules,
            notes,
            at,
            ..
        } => {
            if let Some(mut booking) = rs.remove_booking(*id) {
                booking.span = *span;
                booking.total_price = *total_price;
                booking.applied_rules = applied_rules.clone();
                if let Some(notes) = notes {
                    booking.notes = notes.clone();
                }
                booking.updated_at = *at;
                rs.insert_booking(booking);
            }
        }
        Event::BookingNotesChanged { id, .. }
        | Event::BookingStatusChanged { id, .. }
        | Event::BookingCheckedIn { id, .. }
        | Event::BookingCheckedOut { id, .. }
        | Event::AccessCodeIssued { id, .. } => {
            if let Some(booking) = rs.booking_mut(*id) {
                lifecycle::apply(booking, event);
            }
        }
        Event::BookingRemoved { id, .. } => {
            rs.remove_booking(*id);
            entity_map.remove(id);
        }
        Event::SuggestionApplied { base_price, .. } => rs.base_price = *base_price,
        // Spot create/delete happen at the map level; recorded suggestions
        // live outside the spot.
        Event::SpotCreated { .. } | Event::SpotDeleted { .. } | Event::SuggestionRecorded { .. } => {}
    }
}

/// Suggestion-map side of an event.
fn apply_to_suggestions(suggestions: &DashMap<Ulid, PriceSuggestion>, event: &Event) {
    match event {
        Event::SuggestionRecorded { suggestion } => {
            suggestions.insert(suggestion.id, suggestion.clone());
        }
        Event::SuggestionApplied { id, at, .. } => {
            if let Some(mut s) = suggestions.get_mut(id) {
                s.applied = true;
                s.applied_at = Some(*at);
            }
        }
        Event::SpotDeleted { id } => suggestions.retain(|_, s| s.spot_id != *id),
        _ => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        options: EngineOptions,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_spot: DashMap::new(),
            suggestions: DashMap::new(),
            clock: options.clock,
            tz: options.timezone,
            commit_gate: RwLock::new(()),
        };

        // Nothing else holds these Arcs yet, so try_write never contends.
        // Blocking lock calls are off-limits: this may run on a runtime thread.
        for event in &events {
            match event {
                Event::SpotCreated {
                    id,
                    owner_id,
                    base_price,
                    currency,
                } => {
                    let rs = SpotState::new(*id, *owner_id, *base_price, currency.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::SpotDeleted { id } => {
                    if let Some(rs) = engine.get_spot(id)
                        && let Ok(guard) = rs.try_read()
                    {
                        engine.drop_spot(&guard);
                    }
                }
                other => {
                    if let Some(spot_id) = event_spot_id(other)
                        && let Some(rs) = engine.get_spot(&spot_id)
                        && let Ok(mut guard) = rs.try_write()
                    {
                        apply_to_spot(&mut guard, other, &engine.entity_to_spot);
                    }
                }
            }
            apply_to_suggestions(&engine.suggestions, event);
        }

        metrics::gauge!(crate::observability::SPOTS_ACTIVE).set(engine.state.len() as f64);
        info!(
            events = events.len(),
            spots = engine.state.len(),
            wal = %wal_path.display(),
            "engine loaded"
        );
        Ok(engine)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn get_spot(&self, id: &Ulid) -> Option<SharedSpotState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn spot_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_spot.get(entity_id).map(|e| *e.value())
    }

    /// Remove a spot and everything indexed under it.
    pub(super) fn drop_spot(&self, rs: &SpotState) {
        self.state.remove(&rs.id);
        for entity in store::owned_entity_ids(rs) {
            self.entity_to_spot.remove(&entity);
        }
    }

    /// Write lock on a spot that is still registered once the lock is held.
    /// A delete that won the race leaves the caller with `NotFound`.
    pub(super) async fn lock_spot_write(
        &self,
        spot_id: Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<SpotState>, EngineError> {
        let rs = self.get_spot(&spot_id).ok_or(EngineError::NotFound(spot_id))?;
        let guard = rs.clone().write_owned().await;
        match self.get_spot(&spot_id) {
            Some(current) if Arc::ptr_eq(&current, &rs) => Ok(guard),
            _ => Err(EngineError::NotFound(spot_id)),
        }
    }

    /// Attach wall-clock endpoints to a validated window.
    pub(super) fn localize(&self, span: Span) -> Result<LocalWindow, EngineError> {
        LocalWindow::resolve(span, self.tz).ok_or(EngineError::Validation("timestamp out of range"))
    }

    /// WAL append, apply, notify. Caller holds the spot's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        spot_id: Ulid,
        rs: &mut SpotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_spot(rs, event, &self.entity_to_spot);
        apply_to_suggestions(&self.suggestions, event);
        self.notify.send(spot_id, event);
        Ok(())
    }

    /// Entity → spot, then the spot's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SpotState>), EngineError> {
        let spot_id = self
            .spot_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        Ok((spot_id, self.lock_spot_write(spot_id).await?))
    }

    /// Entity → spot, then the spot's read lock.
    pub(super) async fn resolve_entity_read(
        &self,
        entity_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<SpotState>, EngineError> {
        let spot_id = self
            .spot_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self.get_spot(&spot_id).ok_or(EngineError::NotFound(spot_id))?;
        Ok(rs.read_owned().await)
    }
}

/// Spot an event belongs to, for everything but spot create/delete and
/// suggestion records.
fn event_spot_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SpotUpdated { id, .. } => Some(*id),
        Event::ScheduleSet { spot_id, .. }
        | Event::ExceptionSet { spot_id, .. }
        | Event::ExceptionRemoved { spot_id, .. }
        | Event::PriceRuleRemoved { spot_id, .. }
        | Event::BookingRescheduled { spot_id, .. }
        | Event::BookingNotesChanged { spot_id, .. }
        | Event::BookingStatusChanged { spot_id, .. }
        | Event::BookingCheckedIn { spot_id, .. }
        | Event::BookingCheckedOut { spot_id, .. }
        | Event::AccessCodeIssued { spot_id, .. }
        | Event::BookingRemoved { spot_id, .. }
        | Event::SuggestionApplied { spot_id, .. } => Some(*spot_id),
        Event::PriceRuleAdded { rule } | Event::PriceRuleUpdated { rule } => Some(rule.spot_id),
        Event::BookingCreated { booking } => Some(booking.spot_id),
        Event::SpotCreated { .. } | Event::SpotDeleted { .. } | Event::SuggestionRecorded { .. } => {
            None
        }
    }
}
