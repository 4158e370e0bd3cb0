//! Random operation sequences against one train must never break the
//! seat/booking correspondence: a seat is unavailable exactly when one
//! active booking references it.

use std::sync::Arc;

use proptest::prelude::*;
use ulid::Ulid;

use berth::clock::ManualClock;
use berth::config::EngineConfig;
use berth::engine::BookingEngine;
use berth::model::*;
use berth::store::MemStore;

const SEATS: usize = 6;
const USERS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    Book { user: usize, seat: usize },
    Batch { user: usize, seats: Vec<usize> },
    Hold { user: usize, seats: Vec<usize> },
    Confirm { user: usize, pick: usize },
    Release { user: usize, pick: usize },
    Cancel { user: usize, pick: usize, admin: bool },
    Advance { secs: i64 },
    Sweep,
}

fn seat_set() -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::btree_set(0..SEATS, 1..=3).prop_map(|s| s.into_iter().collect())
}

fn op() -> impl Strategy<Value = Op> {
    let user = 0..USERS;
    prop_oneof![
        (user.clone(), 0..SEATS).prop_map(|(user, seat)| Op::Book { user, seat }),
        (user.clone(), seat_set()).prop_map(|(user, seats)| Op::Batch { user, seats }),
        (user.clone(), seat_set()).prop_map(|(user, seats)| Op::Hold { user, seats }),
        (user.clone(), any::<usize>()).prop_map(|(user, pick)| Op::Confirm { user, pick }),
        (user.clone(), any::<usize>()).prop_map(|(user, pick)| Op::Release { user, pick }),
        (user, any::<usize>(), any::<bool>()).prop_map(|(user, pick, admin)| Op::Cancel { user, pick, admin }),
        (1i64..400).prop_map(|secs| Op::Advance { secs }),
        Just(Op::Sweep),
    ]
}

fn check_invariant(store: &MemStore) -> Result<(), TestCaseError> {
    let bookings = store.all_bookings();
    for seat in store.all_seats() {
        let active = bookings
            .iter()
            .filter(|b| b.seat_id == seat.id && b.is_active())
            .count();
        let expected = if seat.is_available { 0 } else { 1 };
        prop_assert_eq!(active, expected, "seat {} out of sync", seat.seat_number);
    }
    for b in &bookings {
        match b.status {
            BookingStatus::Pending => prop_assert!(b.hold_expires_at.is_some()),
            BookingStatus::Confirmed => {
                prop_assert_eq!(b.payment_status, PaymentStatus::Paid);
                prop_assert!(b.hold_expires_at.is_none());
            }
            BookingStatus::Cancelled => prop_assert!(b.cancelled_at.is_some()),
        }
    }
    Ok(())
}

async fn run(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let store = Arc::new(MemStore::ephemeral());
    let train = Train {
        id: Ulid::new(),
        number: "P 1".into(),
        name: "Property Express".into(),
        status: TrainStatus::Active,
        ticket_price: 100,
        total_seats: SEATS as u32,
    };
    store.put_train(train.clone()).await.unwrap();
    let mut seats = Vec::new();
    for n in 0..SEATS {
        let seat = Seat::new(Ulid::new(), train.id, format!("{n}"));
        seats.push(seat.id);
        store.put_seat(seat).await.unwrap();
    }
    let users: Vec<Ulid> = (0..USERS).map(|_| Ulid::new()).collect();
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let config = EngineConfig {
        max_holds_per_user: 4,
        ..EngineConfig::default()
    };
    let engine = BookingEngine::new(store.clone(), config).with_clock(clock.clone());
    let mut known: Vec<Ulid> = Vec::new();

    for op in ops {
        match op {
            Op::Book { user, seat } => {
                if let Ok(id) = engine.book_single(users[user], train.id, seats[seat]).await {
                    known.push(id);
                }
            }
            Op::Batch { user, seats: picks } => {
                let ids: Vec<Ulid> = picks.iter().map(|i| seats[*i]).collect();
                if let Ok(r) = engine.book_batch(users[user], train.id, &ids).await {
                    known.extend(r.booking_ids);
                }
            }
            Op::Hold { user, seats: picks } => {
                let ids: Vec<Ulid> = picks.iter().map(|i| seats[*i]).collect();
                if let Ok(r) = engine.hold_seats(users[user], train.id, &ids).await {
                    known.extend(r.booking_ids);
                }
            }
            Op::Confirm { user, pick } if !known.is_empty() => {
                let id = known[pick % known.len()];
                let _ = engine.confirm_held_seats(users[user], &[id]).await;
            }
            Op::Release { user, pick } if !known.is_empty() => {
                let id = known[pick % known.len()];
                let _ = engine.release_held_seats(users[user], &[id]).await;
            }
            Op::Cancel { user, pick, admin } if !known.is_empty() => {
                let id = known[pick % known.len()];
                let _ = engine.cancel_booking(id, users[user], admin).await;
            }
            Op::Advance { secs } => clock.advance(secs * 1_000),
            Op::Sweep => {
                engine.sweep_expired_holds().await.unwrap();
                let now = engine.now();
                prop_assert!(store.all_bookings().iter().all(|b| !b.is_expired_hold(now)));
            }
            _ => {}
        }
        check_invariant(&store)?;
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn seat_state_matches_bookings(ops in proptest::collection::vec(op(), 1..40)) {
        tokio_test::block_on(run(ops))?;
    }
}
