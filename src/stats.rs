//! Counters of what a sync session applied and rejected.
//!
//! Rejected events never surface as failures to the consumer, so these
//! counters are where they become visible. Totals can be persisted across
//! runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sync statistics for the current session.
#[derive(Debug)]
pub struct SyncStats {
    /// Snapshots loaded through initialize
    snapshots_loaded: AtomicU64,
    /// Events that changed the window
    events_applied: AtomicU64,
    /// Records pushed out by the capacity cap
    records_evicted: AtomicU64,
    /// Events for another user
    scope_violations: AtomicU64,
    /// Updates for unknown ids
    stale_events: AtomicU64,
    /// Events that failed validation
    malformed_events: AtomicU64,
    /// Failed bulk fetches
    fetch_failures: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl SyncStats {
    pub fn new() -> Self {
        Self {
            snapshots_loaded: AtomicU64::new(0),
            events_applied: AtomicU64::new(0),
            records_evicted: AtomicU64::new(0),
            scope_violations: AtomicU64::new(0),
            stale_events: AtomicU64::new(0),
            malformed_events: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that load previous totals from and save to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::debug!("Could not load previous sync stats: {}", e);
        }

        stats
    }

    pub fn record_snapshot_loaded(&self) {
        self.snapshots_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_applied(&self) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.records_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_scope_violation(&self) {
        self.scope_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_event(&self) {
        self.stale_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_event(&self) {
        self.malformed_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            snapshots_loaded: self.snapshots_loaded.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            records_evicted: self.records_evicted.load(Ordering::Relaxed),
            scope_violations: self.scope_violations.load(Ordering::Relaxed),
            stale_events: self.stale_events.load(Ordering::Relaxed),
            malformed_events: self.malformed_events.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Total events rejected for any reason.
    pub fn rejected_total(&self) -> u64 {
        let s = self.snapshot();
        s.scope_violations + s.stale_events + s.malformed_events
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Sync Statistics:\n\
             - Snapshots loaded: {}\n\
             - Events applied: {}\n\
             - Records evicted: {}\n\
             - Scope violations: {}\n\
             - Stale events: {}\n\
             - Malformed events: {}\n\
             - Fetch failures: {}\n\
             - Session duration: {} seconds",
            stats.snapshots_loaded,
            stats.events_applied,
            stats.records_evicted,
            stats.scope_violations,
            stats.stale_events,
            stats.malformed_events,
            stats.fetch_failures,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                snapshots_loaded: stats.snapshots_loaded,
                events_applied: stats.events_applied,
                records_evicted: stats.records_evicted,
                scope_violations: stats.scope_violations,
                stale_events: stats.stale_events,
                malformed_events: stats.malformed_events,
                fetch_failures: stats.fetch_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.snapshots_loaded
                    .store(persisted.snapshots_loaded, Ordering::Relaxed);
                self.events_applied
                    .store(persisted.events_applied, Ordering::Relaxed);
                self.records_evicted
                    .store(persisted.records_evicted, Ordering::Relaxed);
                self.scope_violations
                    .store(persisted.scope_violations, Ordering::Relaxed);
                self.stale_events
                    .store(persisted.stale_events, Ordering::Relaxed);
                self.malformed_events
                    .store(persisted.malformed_events, Ordering::Relaxed);
                self.fetch_failures
                    .store(persisted.fetch_failures, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.snapshots_loaded.store(0, Ordering::Relaxed);
        self.events_applied.store(0, Ordering::Relaxed);
        self.records_evicted.store(0, Ordering::Relaxed);
        self.scope_violations.store(0, Ordering::Relaxed);
        self.stale_events.store(0, Ordering::Relaxed);
        self.malformed_events.store(0, Ordering::Relaxed);
        self.fetch_failures.store(0, Ordering::Relaxed);
    }
}

impl Default for SyncStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatsSnapshot {
    pub snapshots_loaded: u64,
    pub events_applied: u64,
    pub records_evicted: u64,
    pub scope_violations: u64,
    pub stale_events: u64,
    pub malformed_events: u64,
    pub fetch_failures: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    snapshots_loaded: u64,
    events_applied: u64,
    records_evicted: u64,
    scope_violations: u64,
    stale_events: u64,
    malformed_events: u64,
    fetch_failures: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats.
pub type SharedSyncStats = Arc<SyncStats>;

pub fn create_shared_stats() -> SharedSyncStats {
    Arc::new(SyncStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedSyncStats {
    Arc::new(SyncStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = SyncStats::new();
        stats.record_event_applied();
        stats.record_event_applied();
        stats.record_scope_violation();
        stats.record_malformed_event();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.events_applied, 2);
        assert_eq!(snapshot.scope_violations, 1);
        assert_eq!(stats.rejected_total(), 2);
    }

    #[test]
    fn test_reset() {
        let stats = SyncStats::new();
        stats.record_evictions(5);
        stats.record_stale_event();
        stats.reset();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.records_evicted, 0);
        assert_eq!(snapshot.stale_events, 0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("vitals-sync-stats-{}", uuid::Uuid::new_v4()))
            .join("sync_stats.json");

        let stats = SyncStats::with_persistence(path.clone());
        stats.record_snapshot_loaded();
        stats.record_event_applied();
        stats.save().unwrap();

        let reloaded = SyncStats::with_persistence(path.clone());
        let snapshot = reloaded.snapshot();
        assert_eq!(snapshot.snapshots_loaded, 1);
        assert_eq!(snapshot.events_applied, 1);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_summary_format() {
        let summary = SyncStats::new().summary();
        assert!(summary.contains("Events applied"));
        assert!(summary.contains("Scope violations"));
    }
}
