use serde::Serialize;
use tracing::info;
use ulid::Ulid;

use crate::model::{Amount, Ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditAction {
    Booked,
    BatchBooked,
    Cancelled,
    HoldPlaced,
    HoldConfirmed,
    HoldReleased,
    HoldExpired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Booked => "booked",
            AuditAction::BatchBooked => "batch_booked",
            AuditAction::Cancelled => "cancelled",
            AuditAction::HoldPlaced => "hold_placed",
            AuditAction::HoldConfirmed => "hold_confirmed",
            AuditAction::HoldReleased => "hold_released",
            AuditAction::HoldExpired => "hold_expired",
        }
    }
}

/// One committed state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    /// The acting user; the booking owner for sweeps.
    pub user_id: Ulid,
    pub train_id: Option<Ulid>,
    pub booking_ids: Vec<Ulid>,
    pub seat_numbers: Vec<String>,
    pub amount: Option<Amount>,
    pub at: Ms,
}

/// Fire-and-forget sink called after each commit. Must not block or fail the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Writes audit entries as structured `tracing` events under the `audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: &AuditEntry) {
        info!(
            target: "audit",
            action = entry.action.as_str(),
            user_id = %entry.user_id,
            train_id = ?entry.train_id,
            bookings = entry.booking_ids.len(),
            seats = %entry.seat_numbers.join(","),
            amount = ?entry.amount,
            at = entry.at,
            "booking transition"
        );
    }
}
