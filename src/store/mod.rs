//! Transactional storage seams used by the booking engine.
//!
//! Every gateway call takes the transaction handle explicitly. A row locked
//! through a handle stays locked until that handle is committed or rolled back.
//! Locks are taken user first, then bookings, then seats.

mod error;
mod memory;

pub use error::StoreError;
pub use memory::{MemStore, MemTx};

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[async_trait]
pub trait TransactionalStore: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Make every staged write durable and visible, then release the handle's locks.
    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    /// Discard staged writes and release the handle's locks.
    async fn rollback(&self, tx: Self::Tx);
}

#[async_trait]
pub trait SeatGateway: TransactionalStore {
    async fn train(&self, tx: &mut Self::Tx, train_id: Ulid) -> Result<Option<Train>, StoreError>;

    /// Exclusively lock every listed seat row, in ascending id order, and
    /// return the fresh rows. Ids with no row are left out of the result.
    async fn lock_seats(&self, tx: &mut Self::Tx, seat_ids: &[Ulid]) -> Result<Vec<Seat>, StoreError>;

    async fn lock_seat(&self, tx: &mut Self::Tx, seat_id: Ulid) -> Result<Option<Seat>, StoreError> {
        Ok(self.lock_seats(tx, &[seat_id]).await?.into_iter().next())
    }

    /// Stage an availability flip on seats already locked by `tx`.
    async fn set_seat_availability(
        &self,
        tx: &mut Self::Tx,
        seat_ids: &[Ulid],
        available: bool,
    ) -> Result<(), StoreError>;

    /// Non-locking read of immutable seat details (numbers, train).
    async fn read_seats(&self, tx: &mut Self::Tx, seat_ids: &[Ulid]) -> Result<Vec<Seat>, StoreError>;

    async fn seats_for_train(&self, train_id: Ulid) -> Result<Vec<Seat>, StoreError>;
}

#[async_trait]
pub trait BookingGateway: TransactionalStore {
    /// Stage new rows. They are locked by `tx` until it ends.
    async fn insert_bookings(&self, tx: &mut Self::Tx, bookings: Vec<Booking>) -> Result<(), StoreError>;

    /// Exclusively lock the listed booking rows in ascending id order.
    /// Ids with no row are left out of the result.
    async fn lock_bookings(&self, tx: &mut Self::Tx, booking_ids: &[Ulid]) -> Result<Vec<Booking>, StoreError>;

    /// Stage new images of rows locked or inserted by `tx`.
    async fn update_bookings(&self, tx: &mut Self::Tx, bookings: &[Booking]) -> Result<(), StoreError>;

    /// Serialize hold placement for `user_id` until `tx` ends. Must come
    /// before any booking or seat lock in the same transaction.
    async fn lock_user_holds(&self, tx: &mut Self::Tx, user_id: Ulid) -> Result<(), StoreError>;

    /// Unexpired Pending bookings for `user_id`, as seen by `tx`. Requires
    /// the user's hold lock.
    async fn count_live_holds(&self, tx: &mut Self::Tx, user_id: Ulid, now: Ms) -> Result<usize, StoreError>;

    /// Committed Pending bookings with `hold_expires_at < now`.
    async fn expired_holds(&self, now: Ms) -> Result<Vec<Booking>, StoreError>;

    async fn get_booking(&self, booking_id: Ulid) -> Result<Option<Booking>, StoreError>;

    async fn bookings_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, StoreError>;
}
