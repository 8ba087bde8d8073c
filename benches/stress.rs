//! Booking engine stress: sequential latency, per-slot contention, and
//! cross-slot parallelism. Run with `cargo bench`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Weekday;
use ulid::Ulid;

use classbook::directory::{InMemoryCatalog, InMemoryDirectory, SectionInfo, UserProfile};
use classbook::engine::{Engine, EngineError};
use classbook::model::*;
use classbook::registry::CenterRegistry;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// A month of slots, every day of the week, four hours a day.
fn full_week_pattern(capacity: u32) -> WeeklyPattern {
    let weekdays = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];
    WeeklyPattern {
        days: weekdays
            .iter()
            .map(|&weekday| PatternDay {
                weekday,
                intervals: (9..13)
                    .map(|h| PatternInterval {
                        start_time: chrono::NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
                        end_time: chrono::NaiveTime::from_hms_opt(h + 1, 0, 0).unwrap(),
                        capacity: Some(capacity),
                    })
                    .collect(),
            })
            .collect(),
    }
}

async fn setup_engine(name: &str, capacity: u32) -> (Arc<Engine>, Vec<SlotInfo>) {
    let dir = std::env::temp_dir().join("classbook_bench");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();

    let catalog = Arc::new(InMemoryCatalog::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let section = Ulid::new();
    catalog.insert(SectionInfo {
        id: section,
        name: "Stress section".into(),
    });
    directory.insert(UserProfile {
        id: Ulid::new(),
        display_name: "Bench".into(),
        phone: None,
    });

    let registry = CenterRegistry::new(dir, u64::MAX, catalog, directory);
    let engine = registry.get_or_create(name).unwrap();

    let start = chrono::Local::now().date_naive() + chrono::Duration::days(1);
    let end = start + chrono::Duration::days(29);
    let outcome = engine
        .materialize_slots(section, &full_week_pattern(capacity), start, end)
        .await
        .unwrap();
    println!("  materialized {} slots", outcome.created);

    let slots = engine.list_section_slots(section).await;
    (engine, slots)
}

async fn ready_subscription(engine: &Engine) -> (Ulid, Ulid) {
    let user = Ulid::new();
    let sub = Ulid::new();
    engine
        .purchase_subscription(sub, user, Plan::Days365, chrono::Local::now().naive_local())
        .await
        .unwrap();
    engine.activate_subscription(sub).await.unwrap();
    (user, sub)
}

/// One user per slot, booked back to back.
async fn phase1_sequential(engine: &Arc<Engine>, slots: &[SlotInfo]) {
    println!("phase 1: sequential bookings across {} slots", slots.len());

    let mut latencies = Vec::with_capacity(slots.len());
    let start = Instant::now();
    for slot in slots {
        let (user, sub) = ready_subscription(engine).await;
        let t = Instant::now();
        engine
            .create_reservation(Ulid::new(), user, sub, slot.id)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = slots.len() as f64 / elapsed.as_secs_f64();
    println!(
        "  {} bookings in {:.2}s = {ops:.0} ops/sec",
        slots.len(),
        elapsed.as_secs_f64()
    );
    print_latency("booking latency", &mut latencies);
}

/// Everyone wants the same slot. Exactly `capacity` may win.
async fn phase2_contention(engine: &Arc<Engine>, slot: &SlotInfo, contenders: usize) {
    println!(
        "phase 2: {contenders} contenders for one slot (capacity {})",
        slot.capacity
    );

    let mut ready = Vec::new();
    for _ in 0..contenders {
        ready.push(ready_subscription(engine).await);
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for (user, sub) in ready {
        let engine = engine.clone();
        let slot_id = slot.id;
        handles.push(tokio::spawn(async move {
            engine
                .create_reservation(Ulid::new(), user, sub, slot_id)
                .await
        }));
    }

    let mut won = 0usize;
    let mut full = 0usize;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(EngineError::SlotFull) => full += 1,
            Err(e) => panic!("unexpected rejection: {e}"),
        }
    }
    let elapsed = start.elapsed();

    assert_eq!(won, slot.capacity as usize, "oversold the slot");
    println!(
        "  {won} won, {full} rejected in {:.2}s — reserved stayed at capacity",
        elapsed.as_secs_f64()
    );
}

/// Independent slots in parallel: per-slot locks must not serialize these.
async fn phase3_parallel_slots(engine: &Arc<Engine>, slots: &[SlotInfo], tasks: usize) {
    println!("phase 3: {tasks} parallel bookers on distinct slots");

    let mut ready = Vec::new();
    for _ in 0..tasks {
        ready.push(ready_subscription(engine).await);
    }

    let start = Instant::now();
    let mut handles = Vec::new();
    for (i, (user, sub)) in ready.into_iter().enumerate() {
        let engine = engine.clone();
        let slot_id = slots[i % slots.len()].id;
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            let result = engine.create_reservation(Ulid::new(), user, sub, slot_id).await;
            (result.is_ok(), t.elapsed())
        }));
    }

    let mut latencies = Vec::with_capacity(tasks);
    let mut ok = 0usize;
    for handle in handles {
        let (succeeded, latency) = handle.await.unwrap();
        if succeeded {
            ok += 1;
        }
        latencies.push(latency);
    }
    let elapsed = start.elapsed();
    let ops = tasks as f64 / elapsed.as_secs_f64();
    println!("  {ok}/{tasks} booked in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("booking latency", &mut latencies);
}

async fn run() {
    println!("classbook stress bench");

    let (engine, slots) = setup_engine("bench_seq", 1).await;
    phase1_sequential(&engine, &slots).await;

    let (engine, slots) = setup_engine("bench_contention", 10).await;
    phase2_contention(&engine, &slots[0], 200).await;

    let (engine, slots) = setup_engine("bench_parallel", 1).await;
    phase3_parallel_slots(&engine, &slots, slots.len()).await;
}

fn main() {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(run());
}
