use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use berth::config::EngineConfig;
use berth::engine::BookingEngine;
use berth::model::*;
use berth::store::MemStore;

type Engine = BookingEngine<MemStore>;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn seed(store: &MemStore, seats: u32) -> (Train, Vec<Ulid>) {
    let train = Train {
        id: Ulid::new(),
        number: format!("B {seats}"),
        name: "Bench Line".into(),
        status: TrainStatus::Active,
        ticket_price: 100,
        total_seats: seats,
    };
    store.put_train(train.clone()).await.expect("seed train");
    let mut ids = Vec::with_capacity(seats as usize);
    for n in 0..seats {
        let seat = Seat::new(Ulid::new(), train.id, format!("{:03}", n + 1));
        ids.push(seat.id);
        store.put_seat(seat).await.expect("seed seat");
    }
    (train, ids)
}

async fn durable_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join("berth_bench");
    std::fs::create_dir_all(&dir).expect("bench dir");
    let path = dir.join(format!("{name}_{}.wal", Ulid::new()));
    let store = Arc::new(MemStore::open(path).expect("open store"));
    Arc::new(BookingEngine::new(store, EngineConfig::default()))
}

async fn phase1_sequential() {
    let engine = durable_engine("sequential").await;
    let n = 2000;
    let (train, seats) = seed(engine.store(), n).await;

    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();
    for seat_id in seats {
        let t = Instant::now();
        engine
            .book_single(Ulid::new(), train.id, seat_id)
            .await
            .expect("uncontended booking");
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("book_single latency", &mut latencies);
}

async fn phase2_hot_seat() {
    let engine = durable_engine("hot_seat").await;
    let n_tasks = 64;
    let (train, seats) = seed(engine.store(), 1).await;
    let seat_id = seats[0];
    let train_id = train.id;

    let start = Instant::now();
    let mut handles = Vec::with_capacity(n_tasks);
    for _ in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            let won = engine.book_single(Ulid::new(), train_id, seat_id).await.is_ok();
            (won, t.elapsed())
        }));
    }
    let mut latencies = Vec::with_capacity(n_tasks);
    let mut winners = 0;
    for h in futures::future::join_all(handles).await {
        let (won, latency) = h.expect("task panicked");
        winners += won as usize;
        latencies.push(latency);
    }
    println!(
        "  {n_tasks} tasks on one seat: {winners} winner(s) in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    print_latency("contended book_single latency", &mut latencies);
}

async fn phase3_overlapping_batches() {
    let engine = durable_engine("batches").await;
    let n_tasks = 32;
    let rounds = 20;
    let (train, seats) = seed(engine.store(), 40).await;
    let train_id = train.id;
    let seats = Arc::new(seats);

    let start = Instant::now();
    let mut handles = Vec::with_capacity(n_tasks);
    for i in 0..n_tasks {
        let engine = engine.clone();
        let seats = seats.clone();
        handles.push(tokio::spawn(async move {
            let user = Ulid::new();
            let mut latencies = Vec::with_capacity(rounds);
            let mut held = 0;
            for r in 0..rounds {
                // Windows of 4 seats that overlap with neighbouring tasks.
                let offset = (i * 3 + r) % (seats.len() - 4);
                let window = &seats[offset..offset + 4];
                let t = Instant::now();
                if let Ok(receipt) = engine.hold_seats(user, train_id, window).await {
                    held += 1;
                    let _ = engine.release_held_seats(user, &receipt.booking_ids).await;
                }
                latencies.push(t.elapsed());
            }
            (held, latencies)
        }));
    }

    let mut all = Vec::new();
    let mut held = 0;
    for h in futures::future::join_all(handles).await {
        let (n, latencies) = h.expect("task panicked");
        held += n;
        all.extend(latencies);
    }
    println!(
        "  {n_tasks} tasks x {rounds} hold+release rounds: {held} holds granted in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    print_latency("hold+release latency", &mut all);
}

async fn phase4_sweep() {
    let engine = durable_engine("sweep").await;
    let seats_n = 1000;
    let (train, seats) = seed(engine.store(), seats_n).await;
    for chunk in seats.chunks(10) {
        engine
            .hold_seats(Ulid::new(), train.id, chunk)
            .await
            .expect("hold");
    }

    // Age the holds by sweeping with a clock past their expiry.
    let later = Arc::new(berth::clock::ManualClock::new(
        berth::clock::now_ms() + engine.config().hold_timeout_ms + 1,
    ));
    let sweeper = BookingEngine::new(engine.store().clone(), engine.config().clone()).with_clock(later);
    let t = Instant::now();
    let report = sweeper.sweep_expired_holds().await.expect("sweep");
    println!(
        "  swept {} holds from {} users in {:.2}ms",
        report.released,
        seats_n / 10,
        t.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("=== berth contention benchmark ===\n");

    println!("[phase 1] sequential single bookings");
    phase1_sequential().await;

    println!("\n[phase 2] many tasks racing for one seat");
    phase2_hot_seat().await;

    println!("\n[phase 3] overlapping hold windows");
    phase3_overlapping_batches().await;

    println!("\n[phase 4] expiry sweep");
    phase4_sweep().await;

    println!("\n=== done ===");
}
