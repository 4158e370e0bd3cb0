use tracing::debug;
use ulid::Ulid;

use crate::audit::{AuditAction, AuditEntry};
use crate::model::*;

use super::error::*;
use super::{seat_numbers, validate_seat_request, BookingEngine, BookingStore};

impl<S: BookingStore> BookingEngine<S> {
    /// Book one seat outright: confirmed and paid at the train's ticket price.
    pub async fn book_single(&self, user_id: Ulid, train_id: Ulid, seat_id: Ulid) -> Result<Ulid, BookingError> {
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let result = self.book_single_tx(&mut tx, user_id, train_id, seat_id, now).await;
        let (booking, seat) = self.finish(tx, result).await?;

        debug!("user {user_id} booked seat {} on train {train_id}", seat.seat_number);
        self.audit(AuditEntry {
            action: AuditAction::Booked,
            user_id,
            train_id: Some(train_id),
            booking_ids: vec![booking.id],
            seat_numbers: vec![seat.seat_number],
            amount: Some(booking.total_amount),
            at: now,
        });
        Ok(booking.id)
    }

    async fn book_single_tx(
        &self,
        tx: &mut S::Tx,
        user_id: Ulid,
        train_id: Ulid,
        seat_id: Ulid,
        now: Ms,
    ) -> Result<(Booking, Seat), BookingError> {
        let train = self.active_train(tx, train_id).await?;
        let seat = self
            .store
            .lock_seat(tx, seat_id)
            .await?
            .ok_or_else(|| BookingError::seat_not_found(seat_id))?;
        if seat.train_id != train_id {
            return Err(BookingError::invalid(SEAT_TRAIN_MISMATCH));
        }
        if !seat.is_available {
            return Err(BookingError::invalid(SEAT_ALREADY_BOOKED));
        }

        let booking = Booking::confirmed(user_id, &seat, train.ticket_price, now);
        self.store.insert_bookings(tx, vec![booking.clone()]).await?;
        self.store.set_seat_availability(tx, &[seat.id], false).await?;
        Ok((booking, seat))
    }

    /// Book several seats on one train, all or nothing.
    pub async fn book_batch(
        &self,
        user_id: Ulid,
        train_id: Ulid,
        seat_ids: &[Ulid],
    ) -> Result<BatchReceipt, BookingError> {
        validate_seat_request(seat_ids)?;
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let result = self.book_batch_tx(&mut tx, user_id, train_id, seat_ids, now).await;
        let receipt = self.finish(tx, result).await?;

        debug!(
            "user {user_id} booked {} seats on train {train_id}",
            receipt.booking_ids.len()
        );
        self.audit(AuditEntry {
            action: AuditAction::BatchBooked,
            user_id,
            train_id: Some(train_id),
            booking_ids: receipt.booking_ids.clone(),
            seat_numbers: receipt.seat_numbers.clone(),
            amount: Some(receipt.total_amount),
            at: now,
        });
        Ok(receipt)
    }

    async fn book_batch_tx(
        &self,
        tx: &mut S::Tx,
        user_id: Ulid,
        train_id: Ulid,
        seat_ids: &[Ulid],
        now: Ms,
    ) -> Result<BatchReceipt, BookingError> {
        let train = self.active_train(tx, train_id).await?;
        let seats = self.lock_free_seats(tx, train_id, seat_ids).await?;

        let bookings: Vec<Booking> = seats
            .iter()
            .map(|seat| Booking::confirmed(user_id, seat, train.ticket_price, now))
            .collect();
        let booking_ids = bookings.iter().map(|b| b.id).collect();
        let locked: Vec<Ulid> = seats.iter().map(|s| s.id).collect();
        self.store.insert_bookings(tx, bookings).await?;
        self.store.set_seat_availability(tx, &locked, false).await?;

        Ok(BatchReceipt {
            booking_ids,
            seat_numbers: seat_numbers(&seats),
            total_amount: train.ticket_price * seats.len() as Amount,
        })
    }

    /// Cancel a booking (or an outstanding hold) and free its seat.
    /// Admins may cancel anyone's booking.
    pub async fn cancel_booking(
        &self,
        booking_id: Ulid,
        requester_id: Ulid,
        is_admin: bool,
    ) -> Result<Booking, BookingError> {
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let result = self.cancel_tx(&mut tx, booking_id, requester_id, is_admin, now).await;
        let (booking, seat) = self.finish(tx, result).await?;

        debug!("booking {booking_id} cancelled by {requester_id}");
        self.audit(AuditEntry {
            action: AuditAction::Cancelled,
            user_id: requester_id,
            train_id: Some(booking.train_id),
            booking_ids: vec![booking.id],
            seat_numbers: vec![seat.seat_number],
            amount: Some(booking.total_amount),
            at: now,
        });
        self.publish_released(std::slice::from_ref(&booking));
        Ok(booking)
    }

    async fn cancel_tx(
        &self,
        tx: &mut S::Tx,
        booking_id: Ulid,
        requester_id: Ulid,
        is_admin: bool,
        now: Ms,
    ) -> Result<(Booking, Seat), BookingError> {
        let mut booking = self
            .store
            .lock_bookings(tx, &[booking_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BookingError::booking_not_found(booking_id))?;
        if !is_admin && booking.user_id != requester_id {
            return Err(BookingError::Unauthorized(booking_id));
        }
        if !booking.is_active() {
            return Err(BookingError::invalid(ALREADY_CANCELLED));
        }

        booking.cancel(now);
        self.store.update_bookings(tx, std::slice::from_ref(&booking)).await?;
        let seat = self
            .store
            .lock_seat(tx, booking.seat_id)
            .await?
            .ok_or_else(|| BookingError::seat_not_found(booking.seat_id))?;
        self.store.set_seat_availability(tx, &[seat.id], true).await?;
        Ok((booking, seat))
    }
}
