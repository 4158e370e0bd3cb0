use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// Payload delivered to subscribers of a train's channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatsReleased {
    pub train_id: Ulid,
    pub seat_ids: Vec<Ulid>,
}

#[derive(Debug)]
pub enum NotifyError {
    Encode(String),
    Delivery(String),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Encode(e) => write!(f, "notification encode failed: {e}"),
            NotifyError::Delivery(e) => write!(f, "notification delivery failed: {e}"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Receiver of "seats released" events. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn on_seats_released(&self, train_id: Ulid, seat_ids: &[Ulid]) -> Result<(), NotifyError>;
}

/// One call per train. Failures are logged and dropped; the release already committed.
pub fn publish_released(sink: &dyn NotificationSink, by_train: &BTreeMap<Ulid, Vec<Ulid>>) {
    for (train_id, seat_ids) in by_train {
        if let Err(e) = sink.on_seats_released(*train_id, seat_ids) {
            metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
            warn!("seat release notification for train {train_id} dropped: {e}");
        }
    }
}

/// Broadcast hub with one channel per train. Payloads are JSON-encoded `SeatsReleased`.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<String>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a train. Creates the channel if needed.
    pub fn subscribe(&self, train_id: Ulid) -> broadcast::Receiver<String> {
        let sender = self
            .channels
            .entry(train_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Drop a train's channel (e.g. when the train completes).
    pub fn remove(&self, train_id: &Ulid) {
        self.channels.remove(train_id);
    }
}

impl NotificationSink for NotifyHub {
    /// No-op if nobody is listening.
    fn on_seats_released(&self, train_id: Ulid, seat_ids: &[Ulid]) -> Result<(), NotifyError> {
        let Some(sender) = self.channels.get(&train_id) else {
            return Ok(());
        };
        let payload = serde_json::to_string(&SeatsReleased {
            train_id,
            seat_ids: seat_ids.to_vec(),
        })
        .map_err(|e| NotifyError::Encode(e.to_string()))?;
        // Err here only means every receiver is gone.
        let _ = sender.send(payload);
        Ok(())
    }
}
