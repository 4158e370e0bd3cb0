use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only time type.
pub type Ms = i64;

/// Money in minor currency units.
pub type Amount = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainStatus {
    Active,
    Cancelled,
    Completed,
}

/// Reference data. Read-only to the booking engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Train {
    pub id: Ulid,
    pub number: String,
    pub name: String,
    pub status: TrainStatus,
    pub ticket_price: Amount,
    pub total_seats: u32,
}

impl Train {
    pub fn is_active(&self) -> bool {
        self.status == TrainStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: Ulid,
    pub train_id: Ulid,
    pub seat_number: String,
    pub is_available: bool,
    /// Bumped on every availability flip.
    pub version: u64,
}

impl Seat {
    pub fn new(id: Ulid, train_id: Ulid, seat_number: impl Into<String>) -> Self {
        Self {
            id,
            train_id,
            seat_number: seat_number.into(),
            is_available: true,
            version: 0,
        }
    }

    pub fn set_available(&mut self, available: bool) {
        if self.is_available != available {
            self.is_available = available;
            self.version += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    /// A hold: reserved until `hold_expires_at`.
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub train_id: Ulid,
    pub seat_id: Ulid,
    pub status: BookingStatus,
    pub total_amount: Amount,
    pub payment_status: PaymentStatus,
    pub booking_date: Ms,
    pub cancelled_at: Option<Ms>,
    pub hold_expires_at: Option<Ms>,
}

impl Booking {
    /// Immediate booking: confirmed and paid at creation.
    pub fn confirmed(user_id: Ulid, seat: &Seat, amount: Amount, now: Ms) -> Self {
        Self {
            id: Ulid::new(),
            user_id,
            train_id: seat.train_id,
            seat_id: seat.id,
            status: BookingStatus::Confirmed,
            total_amount: amount,
            payment_status: PaymentStatus::Paid,
            booking_date: now,
            cancelled_at: None,
            hold_expires_at: None,
        }
    }

    /// Temporary hold, reclaimable after `expires_at`.
    pub fn hold(user_id: Ulid, seat: &Seat, amount: Amount, now: Ms, expires_at: Ms) -> Self {
        Self {
            id: Ulid::new(),
            user_id,
            train_id: seat.train_id,
            seat_id: seat.id,
            status: BookingStatus::Pending,
            total_amount: amount,
            payment_status: PaymentStatus::Pending,
            booking_date: now,
            cancelled_at: None,
            hold_expires_at: Some(expires_at),
        }
    }

    /// Holds the seat (Pending or Confirmed).
    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }

    pub fn is_pending(&self) -> bool {
        self.status == BookingStatus::Pending
    }

    /// Counts against the per-user hold cap.
    pub fn is_live_hold(&self, now: Ms) -> bool {
        self.is_pending() && self.hold_expires_at.is_some_and(|t| t > now)
    }

    /// Reclaimable by the sweep. No grace period.
    pub fn is_expired_hold(&self, now: Ms) -> bool {
        self.is_pending() && self.hold_expires_at.is_some_and(|t| t < now)
    }

    /// Pending → Confirmed.
    pub fn confirm(&mut self) {
        debug_assert!(self.is_pending());
        self.status = BookingStatus::Confirmed;
        self.payment_status = PaymentStatus::Paid;
        self.hold_expires_at = None;
    }

    /// Pending/Confirmed → Cancelled. Paid bookings are refunded; an unpaid
    /// hold keeps its `Pending` payment label.
    pub fn cancel(&mut self, now: Ms) {
        debug_assert!(self.is_active());
        self.status = BookingStatus::Cancelled;
        if self.payment_status == PaymentStatus::Paid {
            self.payment_status = PaymentStatus::Refunded;
        }
        self.cancelled_at = Some(now);
    }
}

/// WAL record format: a full row image per changed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TrainPut(Train),
    SeatPut(Seat),
    BookingPut(Booking),
}

// ── Operation result types ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReceipt {
    pub booking_ids: Vec<Ulid>,
    pub seat_numbers: Vec<String>,
    pub total_amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldReceipt {
    pub booking_ids: Vec<Ulid>,
    pub seat_numbers: Vec<String>,
    /// UTC.
    pub expires_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationSummary {
    pub train_id: Ulid,
    pub train_number: String,
    pub train_name: String,
    pub booking_ids: Vec<Ulid>,
    /// Sorted.
    pub seat_numbers: Vec<String>,
    pub total_amount: Amount,
    pub confirmed_at: Ms,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub released: usize,
    pub by_train: BTreeMap<Ulid, Vec<Ulid>>,
}

impl SweepReport {
    pub fn record(&mut self, bookings: &[Booking]) {
        self.released += bookings.len();
        for b in bookings {
            self.by_train.entry(b.train_id).or_default().push(b.seat_id);
        }
    }
}

/// Group released bookings into seat ids per train.
pub fn seats_by_train(bookings: &[Booking]) -> BTreeMap<Ulid, Vec<Ulid>> {
    let mut map: BTreeMap<Ulid, Vec<Ulid>> = BTreeMap::new();
    for b in bookings {
        map.entry(b.train_id).or_default().push(b.seat_id);
    }
    map
}
