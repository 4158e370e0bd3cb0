use tracing::debug;
use ulid::Ulid;

use crate::audit::{AuditAction, AuditEntry};
use crate::model::*;

use super::error::*;
use super::{seat_numbers, validate_booking_ids, validate_seat_request, BookingEngine, BookingStore};

impl<S: BookingStore> BookingEngine<S> {
    /// Reserve seats temporarily. The holds expire `hold_timeout_ms` from now
    /// unless confirmed, and count against the per-user hold cap.
    pub async fn hold_seats(
        &self,
        user_id: Ulid,
        train_id: Ulid,
        seat_ids: &[Ulid],
    ) -> Result<HoldReceipt, BookingError> {
        validate_seat_request(seat_ids)?;
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let result = self.hold_tx(&mut tx, user_id, train_id, seat_ids, now).await;
        let receipt = self.finish(tx, result).await?;

        debug!(
            "user {user_id} holds {} seats on train {train_id} until {}",
            receipt.booking_ids.len(),
            receipt.expires_at
        );
        self.audit(AuditEntry {
            action: AuditAction::HoldPlaced,
            user_id,
            train_id: Some(train_id),
            booking_ids: receipt.booking_ids.clone(),
            seat_numbers: receipt.seat_numbers.clone(),
            amount: None,
            at: now,
        });
        Ok(receipt)
    }

    async fn hold_tx(
        &self,
        tx: &mut S::Tx,
        user_id: Ulid,
        train_id: Ulid,
        seat_ids: &[Ulid],
        now: Ms,
    ) -> Result<HoldReceipt, BookingError> {
        self.store.lock_user_holds(tx, user_id).await?;
        let train = self.active_train(tx, train_id).await?;

        let max = self.config.max_holds_per_user;
        let existing = self.store.count_live_holds(tx, user_id, now).await?;
        if existing + seat_ids.len() > max {
            return Err(BookingError::invalid(format!(
                "Maximum {max} active holds allowed per user."
            )));
        }

        let seats = self.lock_free_seats(tx, train_id, seat_ids).await?;
        let expires_at = now + self.config.hold_timeout_ms;
        let holds: Vec<Booking> = seats
            .iter()
            .map(|seat| Booking::hold(user_id, seat, train.ticket_price, now, expires_at))
            .collect();
        let booking_ids = holds.iter().map(|b| b.id).collect();
        let locked: Vec<Ulid> = seats.iter().map(|s| s.id).collect();
        self.store.insert_bookings(tx, holds).await?;
        self.store.set_seat_availability(tx, &locked, false).await?;

        Ok(HoldReceipt {
            booking_ids,
            seat_numbers: seat_numbers(&seats),
            expires_at,
        })
    }

    /// Turn the caller's holds into paid bookings, all or nothing.
    ///
    /// A hold is still confirmable until `hold_expires_at + hold_grace_ms`
    /// inclusive, even if the sweep has not yet run.
    pub async fn confirm_held_seats(
        &self,
        user_id: Ulid,
        booking_ids: &[Ulid],
    ) -> Result<ConfirmationSummary, BookingError> {
        validate_booking_ids(booking_ids)?;
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let result = self.confirm_tx(&mut tx, user_id, booking_ids, now).await;
        let summary = self.finish(tx, result).await?;

        debug!(
            "user {user_id} confirmed {} holds on train {}",
            summary.booking_ids.len(),
            summary.train_id
        );
        self.audit(AuditEntry {
            action: AuditAction::HoldConfirmed,
            user_id,
            train_id: Some(summary.train_id),
            booking_ids: summary.booking_ids.clone(),
            seat_numbers: summary.seat_numbers.clone(),
            amount: Some(summary.total_amount),
            at: now,
        });
        Ok(summary)
    }

    async fn confirm_tx(
        &self,
        tx: &mut S::Tx,
        user_id: Ulid,
        booking_ids: &[Ulid],
        now: Ms,
    ) -> Result<ConfirmationSummary, BookingError> {
        let locked = self.store.lock_bookings(tx, booking_ids).await?;

        let mut holds = Vec::with_capacity(booking_ids.len());
        for id in booking_ids {
            let booking = locked
                .iter()
                .find(|b| b.id == *id)
                .ok_or_else(|| BookingError::booking_not_found(*id))?;
            if booking.user_id != user_id {
                return Err(BookingError::Unauthorized(*id));
            }
            if !booking.is_pending() {
                return Err(BookingError::invalid(format!(
                    "Booking {id} is not a pending hold."
                )));
            }
            if let Some(expires_at) = booking.hold_expires_at
                && now > expires_at + self.config.hold_grace_ms
            {
                return Err(BookingError::Expired(*id));
            }
            holds.push(booking.clone());
        }

        let train_id = holds[0].train_id;
        if holds.iter().any(|b| b.train_id != train_id) {
            return Err(BookingError::invalid(MIXED_TRAINS));
        }

        for hold in &mut holds {
            hold.confirm();
        }
        self.store.update_bookings(tx, &holds).await?;

        // Summary from fresh rows, not from the request.
        let train = self
            .store
            .train(tx, train_id)
            .await?
            .ok_or_else(|| BookingError::train_not_found(train_id))?;
        let seat_ids: Vec<Ulid> = holds.iter().map(|b| b.seat_id).collect();
        let seats = self.store.read_seats(tx, &seat_ids).await?;

        Ok(ConfirmationSummary {
            train_id,
            train_number: train.number,
            train_name: train.name,
            booking_ids: holds.iter().map(|b| b.id).collect(),
            seat_numbers: seat_numbers(&seats),
            total_amount: holds.iter().map(|b| b.total_amount).sum(),
            confirmed_at: now,
        })
    }

    /// Give back the caller's pending holds. Unknown ids and ids that are no
    /// longer pending are skipped; fails only if nothing is left to release.
    /// Returns the number of holds released.
    pub async fn release_held_seats(&self, user_id: Ulid, booking_ids: &[Ulid]) -> Result<usize, BookingError> {
        if booking_ids.is_empty() {
            return Err(BookingError::invalid(NO_VALID_PENDING));
        }
        if booking_ids.len() > crate::limits::MAX_IDS_PER_REQUEST {
            return Err(BookingError::invalid(format!(
                "Maximum {} bookings per request.",
                crate::limits::MAX_IDS_PER_REQUEST
            )));
        }
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let result = self.release_tx(&mut tx, user_id, booking_ids, now).await;
        let (released, seats) = self.finish(tx, result).await?;

        debug!("user {user_id} released {} holds", released.len());
        self.audit(AuditEntry {
            action: AuditAction::HoldReleased,
            user_id,
            train_id: released.first().map(|b| b.train_id),
            booking_ids: released.iter().map(|b| b.id).collect(),
            seat_numbers: seat_numbers(&seats),
            amount: None,
            at: now,
        });
        self.publish_released(&released);
        Ok(released.len())
    }

    async fn release_tx(
        &self,
        tx: &mut S::Tx,
        user_id: Ulid,
        booking_ids: &[Ulid],
        now: Ms,
    ) -> Result<(Vec<Booking>, Vec<Seat>), BookingError> {
        let mut ids = booking_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let locked = self.store.lock_bookings(tx, &ids).await?;
        if let Some(foreign) = locked.iter().find(|b| b.user_id != user_id) {
            return Err(BookingError::Unauthorized(foreign.id));
        }

        let mut released: Vec<Booking> = locked.into_iter().filter(|b| b.is_pending()).collect();
        if released.is_empty() {
            return Err(BookingError::invalid(NO_VALID_PENDING));
        }
        let seats = self.free_seats_of(tx, &mut released, now).await?;
        Ok((released, seats))
    }

    /// Cancel locked pending bookings and make their seats available again.
    pub(super) async fn free_seats_of(
        &self,
        tx: &mut S::Tx,
        bookings: &mut [Booking],
        now: Ms,
    ) -> Result<Vec<Seat>, BookingError> {
        for booking in bookings.iter_mut() {
            booking.cancel(now);
        }
        self.store.update_bookings(tx, bookings).await?;

        let seat_ids: Vec<Ulid> = bookings.iter().map(|b| b.seat_id).collect();
        let seats = self.store.lock_seats(tx, &seat_ids).await?;
        let found: Vec<Ulid> = seats.iter().map(|s| s.id).collect();
        self.store.set_seat_availability(tx, &found, true).await?;
        Ok(seats)
    }
}
