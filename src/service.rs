use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info};
use ulid::Ulid;

use crate::engine::{BookingEngine, BookingError, BookingStore, ErrorKind};
use crate::model::*;
use crate::notify::publish_released;
use crate::observability::{outcome_label, OPERATIONS_TOTAL, OPERATION_DURATION_SECONDS};

/// Outcome of a service call: `(success, message, data)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Reply<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeldSeats {
    pub booking_ids: Vec<Ulid>,
    pub expires_at: Ms,
}

/// Caller-facing surface over the engine: converts results into replies
/// with user-safe messages and records per-operation metrics.
pub struct BookingService<S> {
    engine: Arc<BookingEngine<S>>,
}

impl<S: BookingStore> BookingService<S> {
    pub fn new(engine: Arc<BookingEngine<S>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<BookingEngine<S>> {
        &self.engine
    }

    pub async fn book_single(&self, user_id: Ulid, train_id: Ulid, seat_id: Ulid) -> Reply<Ulid> {
        let result = measured("book_single", self.engine.book_single(user_id, train_id, seat_id)).await;
        reply(result, |_| "Seat booked successfully.".to_string())
    }

    pub async fn book_batch(&self, user_id: Ulid, train_id: Ulid, seat_ids: &[Ulid]) -> Reply<Vec<Ulid>> {
        let result = measured("book_batch", self.engine.book_batch(user_id, train_id, seat_ids)).await;
        let result = result.map(|r| {
            let msg = format!(
                "Booked {} seats: {}. Total: {}.",
                r.booking_ids.len(),
                r.seat_numbers.join(", "),
                r.total_amount
            );
            (msg, r.booking_ids)
        });
        reply_with_message(result)
    }

    pub async fn cancel_booking(&self, booking_id: Ulid, user_id: Ulid, is_admin: bool) -> Reply<()> {
        let result = measured(
            "cancel_booking",
            self.engine.cancel_booking(booking_id, user_id, is_admin),
        )
        .await;
        reply(result.map(|_| ()), |_| "Booking cancelled successfully.".to_string())
    }

    pub async fn hold_seats(&self, user_id: Ulid, train_id: Ulid, seat_ids: &[Ulid]) -> Reply<HeldSeats> {
        let result = measured("hold_seats", self.engine.hold_seats(user_id, train_id, seat_ids)).await;
        let result = result.map(|r| {
            let msg = format!("Held {} seats: {}.", r.booking_ids.len(), r.seat_numbers.join(", "));
            (
                msg,
                HeldSeats {
                    booking_ids: r.booking_ids,
                    expires_at: r.expires_at,
                },
            )
        });
        reply_with_message(result)
    }

    pub async fn confirm_held(&self, user_id: Ulid, booking_ids: &[Ulid]) -> Reply<ConfirmationSummary> {
        let result = measured("confirm_held", self.engine.confirm_held_seats(user_id, booking_ids)).await;
        reply(result, |s| format!("Confirmed {} seats.", s.booking_ids.len()))
    }

    pub async fn release_held(&self, user_id: Ulid, booking_ids: &[Ulid]) -> Reply<usize> {
        let result = measured("release_held", self.engine.release_held_seats(user_id, booking_ids)).await;
        reply(result, |n| format!("Released {n} held seats."))
    }

    /// Run one sweep and forward the released seats to the notification sink.
    pub async fn sweep_expired_holds(&self) -> Reply<SweepReport> {
        let result = measured("sweep_expired_holds", self.engine.sweep_expired_holds()).await;
        if let Ok(report) = &result {
            publish_released(self.engine.notifier().as_ref(), &report.by_train);
        }
        reply(result, |r| format!("Released {} expired holds.", r.released))
    }
}

async fn measured<T>(
    operation: &'static str,
    fut: impl Future<Output = Result<T, BookingError>>,
) -> Result<T, BookingError> {
    let started = Instant::now();
    let result = fut.await;
    let kind = result.as_ref().err().map(BookingError::kind);
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "outcome" => outcome_label(kind))
        .increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
    match &result {
        Err(e) if kind == Some(ErrorKind::StoreFailure) => error!("{operation} failed: {e}"),
        Err(e) => info!("{operation} rejected: {e}"),
        Ok(_) => {}
    }
    result
}

fn reply<T>(result: Result<T, BookingError>, message: impl FnOnce(&T) -> String) -> Reply<T> {
    match result {
        Ok(value) => Reply::ok(message(&value), value),
        Err(e) => Reply::fail(e.user_message()),
    }
}

fn reply_with_message<T>(result: Result<(String, T), BookingError>) -> Reply<T> {
    match result {
        Ok((message, value)) => Reply::ok(message, value),
        Err(e) => Reply::fail(e.user_message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::MemStore;

    async fn service() -> (BookingService<MemStore>, Train, Vec<Seat>) {
        let store = Arc::new(MemStore::ephemeral());
        let train = Train {
            id: Ulid::new(),
            number: "EC 9".into(),
            name: "Alpine".into(),
            status: TrainStatus::Active,
            ticket_price: 250,
            total_seats: 3,
        };
        store.put_train(train.clone()).await.unwrap();
        let mut seats = Vec::new();
        for n in ["1A", "1B", "1C"] {
            let seat = Seat::new(Ulid::new(), train.id, n);
            store.put_seat(seat.clone()).await.unwrap();
            seats.push(seat);
        }
        let engine = Arc::new(BookingEngine::new(store, EngineConfig::default()));
        (BookingService::new(engine), train, seats)
    }

    #[tokio::test]
    async fn successful_booking_reply() {
        let (svc, train, seats) = service().await;
        let reply = svc.book_single(Ulid::new(), train.id, seats[0].id).await;
        assert!(reply.success);
        assert_eq!(reply.message, "Seat booked successfully.");
        assert!(reply.data.is_some());
    }

    #[tokio::test]
    async fn failed_booking_reply_carries_reason() {
        let (svc, train, seats) = service().await;
        svc.book_single(Ulid::new(), train.id, seats[0].id).await;
        let reply = svc.book_single(Ulid::new(), train.id, seats[0].id).await;
        assert!(!reply.success);
        assert_eq!(reply.message, "Seat is already booked.");
        assert_eq!(reply.data, None);
    }

    #[tokio::test]
    async fn batch_reply_lists_seats_and_total() {
        let (svc, train, seats) = service().await;
        let ids = [seats[1].id, seats[0].id];
        let reply = svc.book_batch(Ulid::new(), train.id, &ids).await;
        assert!(reply.success);
        assert_eq!(reply.message, "Booked 2 seats: 1A, 1B. Total: 500.");
        assert_eq!(reply.data.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn hold_confirm_release_replies() {
        let (svc, train, seats) = service().await;
        let user = Ulid::new();
        let held = svc.hold_seats(user, train.id, &[seats[0].id, seats[1].id]).await;
        assert!(held.success);
        let held = held.data.unwrap();
        assert_eq!(held.booking_ids.len(), 2);

        let release = svc.release_held(user, &held.booking_ids[..1]).await;
        assert_eq!(release.data, Some(1));

        let confirm = svc.confirm_held(user, &held.booking_ids[1..]).await;
        assert!(confirm.success);
        assert_eq!(confirm.data.unwrap().seat_numbers, vec!["1B"]);

        let again = svc.release_held(user, &held.booking_ids).await;
        assert!(!again.success);
        assert_eq!(again.message, "No valid pending bookings to release.");
    }

    #[tokio::test]
    async fn reply_serializes_without_empty_data() {
        let (svc, _, _) = service().await;
        let reply = svc.cancel_booking(Ulid::new(), Ulid::new(), false).await;
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("data").is_none());
        assert!(json["message"].as_str().unwrap().ends_with("not found."));
    }

    #[tokio::test]
    async fn sweep_reply_reports_nothing_when_idle() {
        let (svc, _, _) = service().await;
        let reply = svc.sweep_expired_holds().await;
        assert!(reply.success);
        assert_eq!(reply.data.unwrap().released, 0);
    }
}
