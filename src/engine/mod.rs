mod booking;
mod error;
mod holds;
mod queries;
mod sweep;

pub use error::{BookingError, ErrorKind};

use std::collections::HashSet;
use std::sync::Arc;

use ulid::Ulid;

use crate::audit::{AuditEntry, AuditSink, TracingAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::limits::*;
use crate::model::*;
use crate::notify::{publish_released, NotificationSink, NotifyHub};
use crate::store::{BookingGateway, SeatGateway};

use error::*;

/// Everything the engine needs from storage.
pub trait BookingStore: SeatGateway + BookingGateway + 'static {}

impl<S: SeatGateway + BookingGateway + 'static> BookingStore for S {}

/// Seat allocation and hold state machine.
///
/// Each public operation runs in its own transaction: seat and booking rows
/// are locked before they are read for a decision, and every guard failure
/// rolls the transaction back before the error is returned. Lock order is
/// always bookings, then seats, each set in ascending id order.
pub struct BookingEngine<S> {
    store: Arc<S>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    notify: Arc<dyn NotificationSink>,
}

impl<S: BookingStore> BookingEngine<S> {
    /// Engine on the system clock, auditing to `tracing`, with a fresh notification hub.
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            audit: Arc::new(TracingAuditSink),
            notify: Arc::new(NotifyHub::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_notifier(mut self, notify: Arc<dyn NotificationSink>) -> Self {
        self.notify = notify;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Arc<dyn NotificationSink> {
        &self.notify
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    /// Commit on success, roll back on failure. The only way a transaction ends.
    async fn finish<T>(&self, tx: S::Tx, result: Result<T, BookingError>) -> Result<T, BookingError> {
        match result {
            Ok(value) => {
                self.store.commit(tx).await?;
                Ok(value)
            }
            Err(e) => {
                self.store.rollback(tx).await;
                Err(e)
            }
        }
    }

    fn audit(&self, entry: AuditEntry) {
        self.audit.record(&entry);
    }

    fn publish_released(&self, released: &[Booking]) {
        publish_released(self.notify.as_ref(), &seats_by_train(released));
    }

    async fn active_train(&self, tx: &mut S::Tx, train_id: Ulid) -> Result<Train, BookingError> {
        let train = self
            .store
            .train(tx, train_id)
            .await?
            .ok_or_else(|| BookingError::train_not_found(train_id))?;
        if !train.is_active() {
            return Err(BookingError::invalid(TRAIN_NOT_ACTIVE));
        }
        Ok(train)
    }

    /// Lock the whole requested set at once, then check it belongs to the
    /// train and is free. Reports every taken seat, not just the first.
    async fn lock_free_seats(
        &self,
        tx: &mut S::Tx,
        train_id: Ulid,
        seat_ids: &[Ulid],
    ) -> Result<Vec<Seat>, BookingError> {
        let mut seats = self.store.lock_seats(tx, seat_ids).await?;
        if seats.len() != seat_ids.len() {
            let missing = seat_ids
                .iter()
                .find(|id| !seats.iter().any(|s| s.id == **id))
                .copied()
                .unwrap_or(Ulid::nil());
            return Err(BookingError::seat_not_found(missing));
        }
        if seats.iter().any(|s| s.train_id != train_id) {
            return Err(BookingError::invalid(SEAT_TRAIN_MISMATCH));
        }
        let mut taken: Vec<&str> = seats
            .iter()
            .filter(|s| !s.is_available)
            .map(|s| s.seat_number.as_str())
            .collect();
        if !taken.is_empty() {
            taken.sort_unstable();
            return Err(BookingError::invalid(format!(
                "Seats already booked: {}.",
                taken.join(", ")
            )));
        }
        seats.sort_by(|a, b| a.seat_number.cmp(&b.seat_number));
        Ok(seats)
    }
}

/// Checks that need no store access: non-empty, within the batch cap, no repeats.
fn validate_seat_request(seat_ids: &[Ulid]) -> Result<(), BookingError> {
    if seat_ids.is_empty() {
        return Err(BookingError::invalid(NO_SEATS_REQUESTED));
    }
    if seat_ids.len() > MAX_BATCH_SIZE {
        return Err(BookingError::invalid(format!(
            "Maximum {MAX_BATCH_SIZE} seats per request."
        )));
    }
    if has_duplicates(seat_ids) {
        return Err(BookingError::invalid(DUPLICATE_SEATS));
    }
    Ok(())
}

fn validate_booking_ids(booking_ids: &[Ulid]) -> Result<(), BookingError> {
    if booking_ids.is_empty() {
        return Err(BookingError::invalid(NO_BOOKINGS_SPECIFIED));
    }
    if booking_ids.len() > MAX_IDS_PER_REQUEST {
        return Err(BookingError::invalid(format!(
            "Maximum {MAX_IDS_PER_REQUEST} bookings per request."
        )));
    }
    if has_duplicates(booking_ids) {
        return Err(BookingError::invalid(DUPLICATE_BOOKINGS));
    }
    Ok(())
}

fn has_duplicates(ids: &[Ulid]) -> bool {
    let mut seen = HashSet::with_capacity(ids.len());
    !ids.iter().all(|id| seen.insert(id))
}

fn seat_numbers(seats: &[Seat]) -> Vec<String> {
    let mut numbers: Vec<String> = seats.iter().map(|s| s.seat_number.clone()).collect();
    numbers.sort();
    numbers
}
