use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::audit::{AuditAction, AuditEntry};
use crate::model::*;
use crate::observability::{HOLDS_SWEPT_TOTAL, SWEEP_DURATION_SECONDS, SWEEP_GROUP_FAILURES_TOTAL};

use super::error::BookingError;
use super::{seat_numbers, BookingEngine, BookingStore};

impl<S: BookingStore> BookingEngine<S> {
    /// Reclaim every hold whose expiry has passed, one transaction per user.
    ///
    /// A failing group is rolled back and logged; the remaining groups still
    /// run. The grace period does not apply here: a hold past its expiry is
    /// reclaimable even while it is still confirmable, and whichever side
    /// locks the row first wins.
    ///
    /// The returned report is not published; callers forward it to the
    /// notification sink.
    pub async fn sweep_expired_holds(&self) -> Result<SweepReport, BookingError> {
        let started = Instant::now();
        let now = self.now();
        let candidates = self.store.expired_holds(now).await?;

        let mut by_user: BTreeMap<Ulid, Vec<Ulid>> = BTreeMap::new();
        for hold in &candidates {
            by_user.entry(hold.user_id).or_default().push(hold.id);
        }

        let mut report = SweepReport::default();
        for (user_id, booking_ids) in by_user {
            match self.release_expired_group(&booking_ids, now).await {
                Ok((released, _)) if released.is_empty() => {}
                Ok((released, seats)) => {
                    report.record(&released);
                    self.audit(AuditEntry {
                        action: AuditAction::HoldExpired,
                        user_id,
                        train_id: released.first().map(|b| b.train_id),
                        booking_ids: released.iter().map(|b| b.id).collect(),
                        seat_numbers: seat_numbers(&seats),
                        amount: None,
                        at: now,
                    });
                }
                Err(e) => {
                    warn!("expiry sweep for user {user_id} rolled back: {e}");
                    metrics::counter!(SWEEP_GROUP_FAILURES_TOTAL).increment(1);
                }
            }
        }

        metrics::counter!(HOLDS_SWEPT_TOTAL).increment(report.released as u64);
        metrics::histogram!(SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if report.released > 0 {
            info!(
                "expiry sweep released {} holds across {} trains",
                report.released,
                report.by_train.len()
            );
        } else {
            debug!("expiry sweep found nothing to release");
        }
        Ok(report)
    }

    async fn release_expired_group(
        &self,
        booking_ids: &[Ulid],
        now: Ms,
    ) -> Result<(Vec<Booking>, Vec<Seat>), BookingError> {
        let mut tx = self.store.begin().await?;
        let result = self.release_expired_tx(&mut tx, booking_ids, now).await;
        self.finish(tx, result).await
    }

    async fn release_expired_tx(
        &self,
        tx: &mut S::Tx,
        booking_ids: &[Ulid],
        now: Ms,
    ) -> Result<(Vec<Booking>, Vec<Seat>), BookingError> {
        // Re-check under the lock: a confirm or release may have won the race.
        let mut expired: Vec<Booking> = self
            .store
            .lock_bookings(tx, booking_ids)
            .await?
            .into_iter()
            .filter(|b| b.is_expired_hold(now))
            .collect();
        if expired.is_empty() {
            return Ok((expired, Vec::new()));
        }
        let seats = self.free_seats_of(tx, &mut expired, now).await?;
        Ok((expired, seats))
    }
}
