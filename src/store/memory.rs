use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::wal::Wal;

use super::{BookingGateway, SeatGateway, StoreError, TransactionalStore};

type RowLock = Arc<Mutex<()>>;

/// Pending holds ordered by `(hold_expires_at, booking id)`.
type HoldIndex = BTreeSet<(Ms, Ulid)>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Commit {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        rows: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    CommitsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingCommit = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Every commit already queued when one arrives shares its fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Commit { events, response } = cmd else {
            handle_command(&mut wal, cmd);
            continue;
        };
        let mut group = vec![(events, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Commit { events, response }) => group.push((events, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        write_group(&mut wal, group);
        if let Some(cmd) = deferred {
            handle_command(&mut wal, cmd);
        }
    }
}

fn write_group(wal: &mut Wal, group: Vec<PendingCommit>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(group.len() as f64);
    let started = std::time::Instant::now();
    let results = wal.write_commits(group.iter().map(|(events, _)| events.as_slice()));
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for ((_, response), result) in group.into_iter().zip(results) {
        let _ = response.send(result);
    }
}

fn handle_command(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Commit { events, response } => write_group(wal, vec![(events, response)]),
        WalCommand::Compact { rows, response } => {
            let result = Wal::write_snapshot(wal.path(), &rows).and_then(|()| wal.install_snapshot());
            let _ = response.send(result);
        }
        WalCommand::CommitsSinceCompact { response } => {
            let _ = response.send(wal.commits_since_compact());
        }
    }
}

// ── Transaction handle ───────────────────────────────────

/// A row image owned by a transaction together with its exclusive lock.
struct Locked<T> {
    row: T,
    dirty: bool,
    /// Lock of a row inserted by this transaction; published on commit.
    fresh: Option<RowLock>,
    _guard: OwnedMutexGuard<()>,
}

impl<T> Locked<T> {
    fn existing(row: T, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            row,
            dirty: false,
            fresh: None,
            _guard: guard,
        }
    }
}

/// Transaction handle for [`MemStore`]. Dropping it without commit rolls back.
pub struct MemTx {
    id: Ulid,
    /// Per-user hold-placement locks, taken before any booking or seat row.
    users: BTreeMap<Ulid, OwnedMutexGuard<()>>,
    seats: BTreeMap<Ulid, Locked<Seat>>,
    bookings: BTreeMap<Ulid, Locked<Booking>>,
}

impl MemTx {
    pub fn holds_seat_lock(&self, seat_id: &Ulid) -> bool {
        self.seats.contains_key(seat_id)
    }

    pub fn holds_user_lock(&self, user_id: &Ulid) -> bool {
        self.users.contains_key(user_id)
    }

    fn dirty_events(&self) -> Vec<Event> {
        let seats = self
            .seats
            .values()
            .filter(|l| l.dirty)
            .map(|l| Event::SeatPut(l.row.clone()));
        let bookings = self
            .bookings
            .values()
            .filter(|l| l.dirty)
            .map(|l| Event::BookingPut(l.row.clone()));
        seats.chain(bookings).collect()
    }
}

async fn lock_row(locks: &DashMap<Ulid, RowLock>, id: Ulid) -> Option<OwnedMutexGuard<()>> {
    let lock = locks.get(&id).map(|e| e.value().clone())?;
    Some(lock.lock_owned().await)
}

fn hold_key(b: &Booking) -> Option<(Ms, Ulid)> {
    b.hold_expires_at.filter(|_| b.is_pending()).map(|t| (t, b.id))
}

// ── Store ────────────────────────────────────────────────

/// In-memory tables with per-row exclusive locks, made durable by a group-commit WAL.
pub struct MemStore {
    trains: DashMap<Ulid, Train>,
    seats: DashMap<Ulid, Seat>,
    seat_locks: DashMap<Ulid, RowLock>,
    /// Train → seat ids.
    train_seats: DashMap<Ulid, Vec<Ulid>>,
    bookings: DashMap<Ulid, Booking>,
    booking_locks: DashMap<Ulid, RowLock>,
    /// User → booking ids.
    user_bookings: DashMap<Ulid, Vec<Ulid>>,
    /// Serializes hold placement per user.
    user_hold_locks: DashMap<Ulid, RowLock>,
    hold_index: Mutex<HoldIndex>,
    /// Shared by commits from WAL append through apply; exclusive for compaction.
    commit_gate: RwLock<()>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

impl MemStore {
    fn with_wal(wal_tx: Option<mpsc::Sender<WalCommand>>) -> Self {
        Self {
            trains: DashMap::new(),
            seats: DashMap::new(),
            seat_locks: DashMap::new(),
            train_seats: DashMap::new(),
            bookings: DashMap::new(),
            booking_locks: DashMap::new(),
            user_bookings: DashMap::new(),
            user_hold_locks: DashMap::new(),
            hold_index: Mutex::new(HoldIndex::new()),
            commit_gate: RwLock::new(()),
            wal_tx,
        }
    }

    /// Open a durable store, replaying the WAL at `wal_path`. Must run inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, commits) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut store = Self::with_wal(Some(wal_tx));
        let mut index = HoldIndex::new();
        let replayed = commits.len();
        for event in commits.into_iter().flatten() {
            store.apply(event, &mut index);
        }
        *store.hold_index.get_mut() = index;
        debug!(
            "replayed {replayed} commits from {}: {} seats, {} bookings",
            wal_path.display(),
            store.seats.len(),
            store.bookings.len()
        );
        Ok(store)
    }

    /// A store without a WAL. Nothing survives the process.
    pub fn ephemeral() -> Self {
        Self::with_wal(None)
    }

    /// Apply a committed row image. No locking: caller holds the row lock or owns the store.
    fn apply(&self, event: Event, index: &mut HoldIndex) {
        match event {
            Event::TrainPut(train) => {
                self.trains.insert(train.id, train);
            }
            Event::SeatPut(seat) => {
                let (id, train_id) = (seat.id, seat.train_id);
                self.seat_locks.entry(id).or_default();
                if self.seats.insert(id, seat).is_none() {
                    self.train_seats.entry(train_id).or_default().push(id);
                }
            }
            Event::BookingPut(booking) => {
                let (id, user_id) = (booking.id, booking.user_id);
                let new_key = hold_key(&booking);
                self.booking_locks.entry(id).or_default();
                match self.bookings.insert(id, booking) {
                    Some(old) => {
                        if let Some(old_key) = hold_key(&old) {
                            index.remove(&old_key);
                        }
                    }
                    None => self.user_bookings.entry(user_id).or_default().push(id),
                }
                if let Some(key) = new_key {
                    index.insert(key);
                }
            }
        }
    }

    async fn wal_append(&self, events: Vec<Event>) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Commit { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    /// Log then apply, under the shared commit gate.
    async fn persist(&self, events: Vec<Event>) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(events.clone()).await?;
        let mut index = self.hold_index.lock().await;
        for event in events {
            self.apply(event, &mut index);
        }
        Ok(())
    }

    // ── Reference data ───────────────────────────────────

    pub async fn put_train(&self, train: Train) -> Result<(), StoreError> {
        if train.number.len() > MAX_TRAIN_LABEL_LEN || train.name.len() > MAX_TRAIN_LABEL_LEN {
            return Err(StoreError::LimitExceeded("train label too long"));
        }
        self.persist(vec![Event::TrainPut(train)]).await
    }

    /// Insert or replace a seat row. Waits for the row lock if the seat exists.
    pub async fn put_seat(&self, seat: Seat) -> Result<(), StoreError> {
        if seat.seat_number.len() > MAX_SEAT_NUMBER_LEN {
            return Err(StoreError::LimitExceeded("seat number too long"));
        }
        let _guard = lock_row(&self.seat_locks, seat.id).await;
        self.persist(vec![Event::SeatPut(seat)]).await
    }

    // ── Committed-state reads ────────────────────────────

    pub fn seat(&self, seat_id: &Ulid) -> Option<Seat> {
        self.seats.get(seat_id).map(|e| e.value().clone())
    }

    pub fn all_bookings(&self) -> Vec<Booking> {
        self.bookings.iter().map(|e| e.value().clone()).collect()
    }

    pub fn all_seats(&self) -> Vec<Seat> {
        self.seats.iter().map(|e| e.value().clone()).collect()
    }

    // ── Compaction ───────────────────────────────────────

    /// Rewrite the WAL as one row image per live row.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _gate = self.commit_gate.write().await;
        let mut rows: Vec<Event> = self
            .trains
            .iter()
            .map(|e| Event::TrainPut(e.value().clone()))
            .collect();
        rows.extend(self.seats.iter().map(|e| Event::SeatPut(e.value().clone())));
        rows.extend(self.bookings.iter().map(|e| Event::BookingPut(e.value().clone())));

        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { rows, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub async fn wal_commits_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::CommitsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl TransactionalStore for MemStore {
    type Tx = MemTx;

    async fn begin(&self) -> Result<MemTx, StoreError> {
        Ok(MemTx {
            id: Ulid::new(),
            users: BTreeMap::new(),
            seats: BTreeMap::new(),
            bookings: BTreeMap::new(),
        })
    }

    async fn commit(&self, tx: MemTx) -> Result<(), StoreError> {
        let events = tx.dirty_events();
        if events.is_empty() {
            return Ok(());
        }
        let _gate = self.commit_gate.read().await;
        self.wal_append(events.clone()).await?;
        for (id, locked) in &tx.bookings {
            if let Some(lock) = &locked.fresh {
                self.booking_locks.insert(*id, lock.clone());
            }
        }
        let mut index = self.hold_index.lock().await;
        for event in events {
            self.apply(event, &mut index);
        }
        drop(index);
        debug!("committed tx {}", tx.id);
        // Row locks are released here, after the new images are visible.
        drop(tx);
        Ok(())
    }

    async fn rollback(&self, tx: MemTx) {
        debug!("rolled back tx {}", tx.id);
        drop(tx);
    }
}

#[async_trait]
impl SeatGateway for MemStore {
    async fn train(&self, _tx: &mut MemTx, train_id: Ulid) -> Result<Option<Train>, StoreError> {
        Ok(self.trains.get(&train_id).map(|e| e.value().clone()))
    }

    async fn lock_seats(&self, tx: &mut MemTx, seat_ids: &[Ulid]) -> Result<Vec<Seat>, StoreError> {
        let mut ids = seat_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(locked) = tx.seats.get(&id) {
                out.push(locked.row.clone());
                continue;
            }
            let Some(guard) = lock_row(&self.seat_locks, id).await else {
                continue;
            };
            // Read only after the lock is ours: the previous holder may have just committed.
            let Some(row) = self.seat(&id) else {
                continue;
            };
            tx.seats.insert(id, Locked::existing(row.clone(), guard));
            out.push(row);
        }
        Ok(out)
    }

    async fn set_seat_availability(
        &self,
        tx: &mut MemTx,
        seat_ids: &[Ulid],
        available: bool,
    ) -> Result<(), StoreError> {
        for id in seat_ids {
            let locked = tx.seats.get_mut(id).ok_or(StoreError::NotLocked(*id))?;
            locked.row.set_available(available);
            locked.dirty = true;
        }
        Ok(())
    }

    async fn read_seats(&self, tx: &mut MemTx, seat_ids: &[Ulid]) -> Result<Vec<Seat>, StoreError> {
        Ok(seat_ids
            .iter()
            .filter_map(|id| match tx.seats.get(id) {
                Some(locked) => Some(locked.row.clone()),
                None => self.seat(id),
            })
            .collect())
    }

    async fn seats_for_train(&self, train_id: Ulid) -> Result<Vec<Seat>, StoreError> {
        let ids = self
            .train_seats
            .get(&train_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut seats: Vec<Seat> = ids.iter().filter_map(|id| self.seat(id)).collect();
        seats.sort_by(|a, b| a.seat_number.cmp(&b.seat_number));
        Ok(seats)
    }
}

#[async_trait]
impl BookingGateway for MemStore {
    async fn insert_bookings(&self, tx: &mut MemTx, bookings: Vec<Booking>) -> Result<(), StoreError> {
        for booking in bookings {
            let id = booking.id;
            if self.booking_locks.contains_key(&id) || tx.bookings.contains_key(&id) {
                return Err(StoreError::DuplicateKey(id));
            }
            let lock = RowLock::default();
            let guard = lock
                .clone()
                .try_lock_owned()
                .map_err(|_| StoreError::DuplicateKey(id))?;
            tx.bookings.insert(
                id,
                Locked {
                    row: booking,
                    dirty: true,
                    fresh: Some(lock),
                    _guard: guard,
                },
            );
        }
        Ok(())
    }

    async fn lock_bookings(&self, tx: &mut MemTx, booking_ids: &[Ulid]) -> Result<Vec<Booking>, StoreError> {
        let mut ids = booking_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(locked) = tx.bookings.get(&id) {
                out.push(locked.row.clone());
                continue;
            }
            let Some(guard) = lock_row(&self.booking_locks, id).await else {
                continue;
            };
            let Some(row) = self.bookings.get(&id).map(|e| e.value().clone()) else {
                continue;
            };
            tx.bookings.insert(id, Locked::existing(row.clone(), guard));
            out.push(row);
        }
        Ok(out)
    }

    async fn update_bookings(&self, tx: &mut MemTx, bookings: &[Booking]) -> Result<(), StoreError> {
        for booking in bookings {
            let locked = tx
                .bookings
                .get_mut(&booking.id)
                .ok_or(StoreError::NotLocked(booking.id))?;
            locked.row = booking.clone();
            locked.dirty = true;
        }
        Ok(())
    }

    async fn lock_user_holds(&self, tx: &mut MemTx, user_id: Ulid) -> Result<(), StoreError> {
        if tx.users.contains_key(&user_id) {
            return Ok(());
        }
        if !tx.seats.is_empty() || !tx.bookings.is_empty() {
            return Err(StoreError::LockOrder("user hold lock requested after row locks"));
        }
        let lock = self.user_hold_locks.entry(user_id).or_default().value().clone();
        tx.users.insert(user_id, lock.lock_owned().await);
        Ok(())
    }

    async fn count_live_holds(&self, tx: &mut MemTx, user_id: Ulid, now: Ms) -> Result<usize, StoreError> {
        if !tx.users.contains_key(&user_id) {
            return Err(StoreError::NotLocked(user_id));
        }
        let staged = tx
            .bookings
            .values()
            .filter(|l| l.row.user_id == user_id && l.row.is_live_hold(now))
            .count();
        let committed = self.user_bookings.get(&user_id).map_or(0, |ids| {
            ids.iter()
                .filter(|id| !tx.bookings.contains_key(*id))
                .filter(|id| self.bookings.get(*id).is_some_and(|b| b.is_live_hold(now)))
                .count()
        });
        Ok(staged + committed)
    }

    async fn expired_holds(&self, now: Ms) -> Result<Vec<Booking>, StoreError> {
        let ids: Vec<Ulid> = {
            let index = self.hold_index.lock().await;
            index
                .range(..(now, Ulid::nil()))
                .map(|(_, id)| *id)
                .collect()
        };
        Ok(ids
            .into_iter()
            .filter_map(|id| self.bookings.get(&id).map(|e| e.value().clone()))
            .filter(|b| b.is_expired_hold(now))
            .collect())
    }

    async fn get_booking(&self, booking_id: Ulid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&booking_id).map(|e| e.value().clone()))
    }

    async fn bookings_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, StoreError> {
        let ids = self
            .user_bookings
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.bookings.get(id).map(|e| e.value().clone()))
            .collect())
    }
}
