//! Demonstration of a live sync session.
//!
//! This example shows how to:
//! 1. Seed an in-memory store with a week of readings
//! 2. Start a session and load the initial window
//! 3. Stream inserts, updates and deletes into it
//! 4. See foreign and stale events rejected without touching the window
//! 5. Compute averages and a dashboard summary
//!
//! Run with: cargo run --example live_demo

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

use vitals_sync::{
    core::{average, filter_since, SummaryBuilder},
    source::{MemorySource, NewRecord, RawChangeEvent, RecordId, UserId},
    SessionOptions, SyncSession,
};

fn reading(user: &UserId, hours_ago: i64, heart_rate: i32, temperature: f64) -> NewRecord {
    NewRecord {
        user_id: user.clone(),
        heart_rate,
        blood_oxygen: 97,
        temperature,
        activity_level: 45,
        timestamp: Utc::now() - ChronoDuration::hours(hours_ago),
        anomaly: false,
    }
}

fn main() {
    println!("Vitals Sync - Live Demo");
    println!("=======================");
    println!();

    let alice = UserId::from("alice");
    let bob = UserId::from("bob");

    // A mis-scoped store delivers everyone's events to every subscriber
    let store = MemorySource::new().unscoped();
    for hours in (0..7 * 24).step_by(12) {
        store.create(reading(&alice, hours, 62 + (hours % 30) as i32, 36.4));
    }
    store.create(reading(&bob, 1, 88, 36.9));

    let options = SessionOptions {
        capacity: 10,
        fetch_limit: 10,
    };
    let mut session = SyncSession::new(store.clone(), alice.clone(), options);
    session.on_change(Box::new(|records| {
        if let Some(latest) = records.first() {
            println!(
                "  window: {} readings, latest {} bpm at {}",
                records.len(),
                latest.heart_rate,
                latest.timestamp.format("%b %d, %H:%M")
            );
        }
    }));

    println!("Loading initial window (capacity {})...", options.capacity);
    match session.start() {
        Ok(report) => println!("  accepted {}, dropped {}", report.accepted, report.truncated),
        Err(e) => {
            eprintln!("Error loading readings: {e}");
            return;
        }
    }
    println!();

    println!("Streaming changes...");
    let fresh = store.create(reading(&alice, 0, 75, 36.6));
    store.create(reading(&bob, 0, 120, 38.0));
    session.pump_timeout(Duration::from_millis(50));

    let mut corrected = fresh.clone();
    corrected.heart_rate = 78;
    store.update(corrected);

    let ghost = reading(&alice, 0, 70, 36.6).with_id(RecordId::from("not-in-window"));
    store.push_raw(&alice, RawChangeEvent::update(&ghost));
    store.delete(&fresh.id);

    let report = session.pump();
    println!("  applied {}, rejected {}", report.applied, report.rejected);
    println!();

    let now = Utc::now();
    let weekly = filter_since(session.snapshot(), 7, now);
    match average(weekly) {
        Some(avg) => println!(
            "7-day averages: {} bpm, {}% O2, {:.1}°C, {}% activity ({} readings)",
            avg.heart_rate, avg.blood_oxygen, avg.temperature, avg.activity_level, avg.sample_count
        ),
        None => println!("7-day averages: no readings"),
    }
    println!();

    let summary = SummaryBuilder::default().build_json(session.user_id(), session.snapshot(), now);
    println!("Dashboard summary:");
    println!("{summary}");
    println!();

    session.dispose();
    println!("{}", session.stats().summary());
}
