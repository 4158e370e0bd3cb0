use ulid::Ulid;

use crate::model::*;

use super::error::BookingError;
use super::{BookingEngine, BookingStore};

// Read-only views of committed state. No row locks are taken, so a result
// may be stale by the time the caller acts on it.

impl<S: BookingStore> BookingEngine<S> {
    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, BookingError> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::booking_not_found(booking_id))
    }

    /// All of a user's bookings, oldest first, cancelled ones included.
    pub async fn user_bookings(&self, user_id: Ulid) -> Result<Vec<Booking>, BookingError> {
        let mut bookings = self.store.bookings_for_user(user_id).await?;
        bookings.sort_by_key(|b| (b.booking_date, b.id));
        Ok(bookings)
    }

    /// Every seat of the train, sorted by seat number.
    pub async fn seat_map(&self, train_id: Ulid) -> Result<Vec<Seat>, BookingError> {
        self.known_train(train_id).await?;
        Ok(self.store.seats_for_train(train_id).await?)
    }

    pub async fn available_seat_count(&self, train_id: Ulid) -> Result<usize, BookingError> {
        self.known_train(train_id).await?;
        let seats = self.store.seats_for_train(train_id).await?;
        Ok(seats.iter().filter(|s| s.is_available).count())
    }

    async fn known_train(&self, train_id: Ulid) -> Result<Train, BookingError> {
        let mut tx = self.store.begin().await?;
        let train = self.store.train(&mut tx, train_id).await;
        self.store.rollback(tx).await;
        train?.ok_or_else(|| BookingError::train_not_found(train_id))
    }
}
