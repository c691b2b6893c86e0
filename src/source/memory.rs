//! In-process metric store.
//!
//! Implements [`RemoteSource`] over a shared vector so the sync layer can run
//! without a network: tests, demos and replaying an exported JSON file.
//! Mutations notify matching subscribers synchronously on the caller's
//! thread.

use crate::source::types::{MetricRecord, NewRecord, RawChangeEvent, RawRecord, RecordId, UserId};
use crate::source::{EventSink, FetchError, RemoteSource, SubscriptionHandle};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

struct Subscriber {
    user_id: UserId,
    sink: Arc<EventSink>,
    handle: SubscriptionHandle,
}

#[derive(Default)]
struct Store {
    records: Vec<MetricRecord>,
    subscribers: HashMap<u64, Subscriber>,
    next_subscription: u64,
    unscoped: bool,
    fail_next_fetch: Option<String>,
}

/// A shared in-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<Store>>,
}

impl MemorySource {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given records.
    pub fn from_records(records: Vec<MetricRecord>) -> Self {
        let source = Self::new();
        source.lock().records = records;
        source
    }

    /// Load a JSON array of records, as exported by the store.
    ///
    /// Rows that fail validation are skipped with a warning.
    pub fn load_json(path: &Path) -> Result<Self, FetchError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FetchError::Unavailable(format!("{}: {e}", path.display())))?;
        let rows: Vec<RawRecord> =
            serde_json::from_str(&content).map_err(|e| FetchError::Decode(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_record() {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping row in {}: {}", path.display(), e),
            }
        }

        Ok(Self::from_records(records))
    }

    /// Deliver every event to every subscriber regardless of user.
    ///
    /// Simulates a mis-scoped subscription.
    pub fn unscoped(self) -> Self {
        self.lock().unscoped = true;
        self
    }

    /// Make the next `fetch_recent` fail with [`FetchError::Unavailable`].
    pub fn fail_next_fetch(&self, message: impl Into<String>) {
        self.lock().fail_next_fetch = Some(message.into());
    }

    /// Store a new reading under a generated id and notify subscribers.
    pub fn create(&self, new: NewRecord) -> MetricRecord {
        let record = new.with_id(RecordId::generate());
        self.insert(record.clone());
        record
    }

    /// Store a record as-is and notify subscribers.
    pub fn insert(&self, record: MetricRecord) {
        let user_id = record.user_id.clone();
        let event = RawChangeEvent::insert(&record);
        self.lock().records.push(record);
        self.notify(&user_id, event);
    }

    /// Replace a stored record. Returns `false` if the id is unknown.
    pub fn update(&self, record: MetricRecord) -> bool {
        let replaced = {
            let mut store = self.lock();
            match store.records.iter_mut().find(|r| r.id == record.id) {
                Some(slot) => {
                    *slot = record.clone();
                    true
                }
                None => false,
            }
        };

        if replaced {
            self.notify(&record.user_id, RawChangeEvent::update(&record));
        }
        replaced
    }

    /// Remove a stored record and notify subscribers.
    pub fn delete(&self, id: &RecordId) -> Option<MetricRecord> {
        let removed = {
            let mut store = self.lock();
            let index = store.records.iter().position(|r| &r.id == id)?;
            store.records.remove(index)
        };

        // Like the realtime channel, deletes carry only the key
        self.notify(&removed.user_id, RawChangeEvent::delete(&removed.id, None));
        Some(removed)
    }

    /// Deliver an arbitrary payload to the user's subscribers.
    pub fn push_raw(&self, user_id: &UserId, event: RawChangeEvent) {
        self.notify(user_id, event);
    }

    /// All stored records for a user, in storage order.
    pub fn records_for(&self, user_id: &UserId) -> Vec<MetricRecord> {
        self.lock()
            .records
            .iter()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        // A panicking sink cannot leave the store half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, user_id: &UserId, event: RawChangeEvent) {
        let sinks: Vec<Arc<EventSink>> = {
            let store = self.lock();
            store
                .subscribers
                .values()
                .filter(|s| s.handle.is_active() && (store.unscoped || &s.user_id == user_id))
                .map(|s| Arc::clone(&s.sink))
                .collect()
        };

        // Sinks run without the lock held so they may call back in
        for sink in sinks {
            sink(event.clone());
        }
    }
}

impl RemoteSource for MemorySource {
    fn fetch_recent(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<MetricRecord>, FetchError> {
        let mut store = self.lock();
        if let Some(message) = store.fail_next_fetch.take() {
            return Err(FetchError::Unavailable(message));
        }

        let mut records: Vec<MetricRecord> = store
            .records
            .iter()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        Ok(records)
    }

    fn subscribe(
        &self,
        user_id: &UserId,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, FetchError> {
        let mut store = self.lock();
        store.next_subscription += 1;
        let handle = SubscriptionHandle::new(store.next_subscription);
        store.subscribers.insert(
            handle.id(),
            Subscriber {
                user_id: user_id.clone(),
                sink: Arc::new(sink),
                handle: handle.clone(),
            },
        );
        Ok(handle)
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        handle.release();
        self.lock().subscribers.remove(&handle.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn new_record(user: &str, minutes_ago: i64) -> NewRecord {
        NewRecord {
            user_id: UserId::from(user),
            heart_rate: 72,
            blood_oxygen: 98,
            temperature: 36.6,
            activity_level: 40,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            anomaly: false,
        }
    }

    fn counting_sink(counter: &Arc<AtomicUsize>) -> EventSink {
        let counter = Arc::clone(counter);
        Box::new(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fetch_is_scoped_and_newest_first() {
        let source = MemorySource::new();
        source.create(new_record("a", 30));
        source.create(new_record("a", 10));
        source.create(new_record("b", 5));
        source.create(new_record("a", 20));

        let records = source.fetch_recent(&UserId::from("a"), 2).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].timestamp > records[1].timestamp);
        assert!(records.iter().all(|r| r.user_id.as_str() == "a"));
    }

    #[test]
    fn test_fail_next_fetch_only_once() {
        let source = MemorySource::new();
        source.fail_next_fetch("offline");
        assert!(matches!(
            source.fetch_recent(&UserId::from("a"), 10),
            Err(FetchError::Unavailable(_))
        ));
        assert!(source.fetch_recent(&UserId::from("a"), 10).is_ok());
    }

    #[test]
    fn test_subscription_scoping() {
        let source = MemorySource::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = source
            .subscribe(&UserId::from("a"), counting_sink(&counter))
            .unwrap();

        source.create(new_record("a", 1));
        source.create(new_record("b", 1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        source.unsubscribe(&handle);
        source.unsubscribe(&handle);
        source.create(new_record("a", 1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn test_unscoped_delivers_everything() {
        let source = MemorySource::new().unscoped();
        let counter = Arc::new(AtomicUsize::new(0));
        source
            .subscribe(&UserId::from("a"), counting_sink(&counter))
            .unwrap();

        source.create(new_record("b", 1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_and_delete() {
        let source = MemorySource::new();
        let mut record = source.create(new_record("a", 1));

        record.heart_rate = 90;
        assert!(source.update(record.clone()));
        assert_eq!(source.records_for(&UserId::from("a"))[0].heart_rate, 90);

        assert!(source.delete(&record.id).is_some());
        assert!(source.delete(&record.id).is_none());
        assert!(!source.update(record));
    }

    #[test]
    fn test_load_json_skips_bad_rows() {
        let path = std::env::temp_dir().join(format!("vitals-sync-{}.json", uuid::Uuid::new_v4()));
        let rows = serde_json::json!([
            {
                "id": "r1", "user_id": "a", "heart_rate": 72, "blood_oxygen": 98,
                "temperature": 36.6, "activity_level": "40",
                "timestamp": "2024-01-22T10:00:00Z", "anomaly": "false"
            },
            { "id": "r2", "user_id": "a" }
        ]);
        std::fs::write(&path, rows.to_string()).unwrap();

        let source = MemorySource::load_json(&path).unwrap();
        let records = source.records_for(&UserId::from("a"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].activity_level, 40);

        let _ = std::fs::remove_file(&path);
    }
}
