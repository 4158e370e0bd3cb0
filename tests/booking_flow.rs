use std::path::PathBuf;
use std::sync::Arc;

use ulid::Ulid;

use berth::clock::ManualClock;
use berth::config::EngineConfig;
use berth::engine::{BookingEngine, ErrorKind};
use berth::model::*;
use berth::service::BookingService;
use berth::store::MemStore;

const T0: Ms = 1_750_000_000_000;
const SECOND: Ms = 1_000;
const MINUTE: Ms = 60 * SECOND;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("berth_test_flow");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

async fn seed(store: &MemStore, seats: &[&str]) -> (Train, Vec<Seat>) {
    let train = Train {
        id: Ulid::new(),
        number: "T1".into(),
        name: "Riverside".into(),
        status: TrainStatus::Active,
        ticket_price: 100,
        total_seats: seats.len() as u32,
    };
    store.put_train(train.clone()).await.unwrap();
    let mut out = Vec::new();
    for number in seats {
        let seat = Seat::new(Ulid::new(), train.id, *number);
        store.put_seat(seat.clone()).await.unwrap();
        out.push(seat);
    }
    (train, out)
}

fn engine(store: Arc<MemStore>, clock: Arc<ManualClock>) -> Arc<BookingEngine<MemStore>> {
    Arc::new(BookingEngine::new(store, EngineConfig::default()).with_clock(clock))
}

#[tokio::test]
async fn immediate_booking_through_service() {
    let store = Arc::new(MemStore::ephemeral());
    let (train, seats) = seed(&store, &["S1"]).await;
    let clock = Arc::new(ManualClock::new(T0));
    let svc = BookingService::new(engine(store.clone(), clock));

    let reply = svc.book_single(Ulid::new(), train.id, seats[0].id).await;

    assert!(reply.success);
    let booking = svc.engine().get_booking(reply.data.unwrap()).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert!(!store.seat(&seats[0].id).unwrap().is_available);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_users_racing_for_one_seat() {
    let store = Arc::new(MemStore::ephemeral());
    let (train, seats) = seed(&store, &["S2"]).await;
    let clock = Arc::new(ManualClock::new(T0));
    let svc = Arc::new(BookingService::new(engine(store.clone(), clock)));
    let (train_id, seat_id) = (train.id, seats[0].id);

    let a = {
        let svc = svc.clone();
        tokio::spawn(async move { svc.book_single(Ulid::new(), train_id, seat_id).await })
    };
    let b = {
        let svc = svc.clone();
        tokio::spawn(async move { svc.book_single(Ulid::new(), train_id, seat_id).await })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert!(a.success ^ b.success);
    let loser = if a.success { b } else { a };
    assert_eq!(loser.message, "Seat is already booked.");
}

#[tokio::test]
async fn hold_confirm_and_late_confirm() {
    let store = Arc::new(MemStore::ephemeral());
    let (train, seats) = seed(&store, &["S3", "S4", "S5", "S6"]).await;
    let clock = Arc::new(ManualClock::new(T0));
    let engine = engine(store.clone(), clock.clone());
    let user = Ulid::new();

    let on_time = engine
        .hold_seats(user, train.id, &[seats[0].id, seats[1].id])
        .await
        .unwrap();
    assert_eq!(on_time.expires_at, T0 + 5 * MINUTE);
    let summary = engine.confirm_held_seats(user, &on_time.booking_ids).await.unwrap();
    assert_eq!(summary.seat_numbers, vec!["S3", "S4"]);
    assert_eq!(summary.total_amount, 200);

    let late = engine
        .hold_seats(user, train.id, &[seats[2].id, seats[3].id])
        .await
        .unwrap();
    clock.set(T0 + 5 * MINUTE + 11 * SECOND);
    let err = engine.confirm_held_seats(user, &late.booking_ids).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expired);
    assert!(err.to_string().starts_with("Hold has expired for booking "));
}

#[tokio::test]
async fn eleventh_hold_is_refused() {
    let store = Arc::new(MemStore::ephemeral());
    let numbers: Vec<String> = (1..=11).map(|n| format!("H{n:02}")).collect();
    let refs: Vec<&str> = numbers.iter().map(String::as_str).collect();
    let (train, seats) = seed(&store, &refs).await;
    let clock = Arc::new(ManualClock::new(T0));
    let svc = BookingService::new(engine(store.clone(), clock));
    let user = Ulid::new();

    for seat in &seats[..10] {
        assert!(svc.hold_seats(user, train.id, &[seat.id]).await.success);
    }
    let reply = svc.hold_seats(user, train.id, &[seats[10].id]).await;

    assert!(!reply.success);
    assert_eq!(reply.message, "Maximum 10 active holds allowed per user.");
    let last = store.seat(&seats[10].id).unwrap();
    assert!(last.is_available);
    assert_eq!(last.version, 0);
}

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("state_survives_restart.wal");
    let user = Ulid::new();
    let (train, seats, booked, held) = {
        let store = Arc::new(MemStore::open(path.clone()).unwrap());
        let (train, seats) = seed(&store, &["R1", "R2", "R3"]).await;
        let engine = engine(store, Arc::new(ManualClock::new(T0)));
        let booked = engine.book_single(user, train.id, seats[0].id).await.unwrap();
        let held = engine.hold_seats(user, train.id, &[seats[1].id]).await.unwrap();
        (train, seats, booked, held.booking_ids[0])
    };

    let store = Arc::new(MemStore::open(path).unwrap());
    let clock = Arc::new(ManualClock::new(T0 + MINUTE));
    let engine = engine(store.clone(), clock);

    assert_eq!(engine.get_booking(booked).await.unwrap().status, BookingStatus::Confirmed);
    assert_eq!(engine.get_booking(held).await.unwrap().status, BookingStatus::Pending);
    assert_eq!(engine.available_seat_count(train.id).await.unwrap(), 1);
    assert!(store.seat(&seats[2].id).unwrap().is_available);

    let summary = engine.confirm_held_seats(user, &[held]).await.unwrap();
    assert_eq!(summary.seat_numbers, vec!["R2"]);
    assert_eq!(engine.user_bookings(user).await.unwrap().len(), 2);
}

#[tokio::test]
async fn compaction_keeps_live_rows() {
    let path = test_wal_path("compaction_keeps_live_rows.wal");
    let user = Ulid::new();
    let train_id = {
        let store = Arc::new(MemStore::open(path.clone()).unwrap());
        let (train, seats) = seed(&store, &["C1", "C2"]).await;
        let engine = engine(store.clone(), Arc::new(ManualClock::new(T0)));
        let id = engine.book_single(user, train.id, seats[0].id).await.unwrap();
        engine.cancel_booking(id, user, false).await.unwrap();
        engine.book_single(user, train.id, seats[1].id).await.unwrap();
        store.compact_wal().await.unwrap();
        assert_eq!(store.wal_commits_since_compact().await, 0);
        train.id
    };

    let store = Arc::new(MemStore::open(path).unwrap());
    let engine = engine(store, Arc::new(ManualClock::new(T0)));
    let bookings = engine.user_bookings(user).await.unwrap();
    assert_eq!(bookings.len(), 2);
    assert_eq!(
        bookings.iter().filter(|b| b.status == BookingStatus::Cancelled).count(),
        1
    );
    assert_eq!(engine.available_seat_count(train_id).await.unwrap(), 1);
}
