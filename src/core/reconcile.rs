//! Derive change events from successive fetches of the same page.
//!
//! Adapters without a push channel poll the newest page and diff it against
//! the previous one to produce the events a push channel would have sent.

use crate::source::types::{ChangeEvent, MetricRecord};
use std::collections::HashMap;

/// Events that turn `previous` into `next`.
///
/// Both pages are newest first and were fetched with the same `limit`.
/// A record that vanished from `previous` is deleted unless `next` is a full
/// page and the record is older than its oldest entry, in which case it
/// merely scrolled off the end. Inserts are emitted oldest first.
pub fn diff_pages(
    previous: &[MetricRecord],
    next: &[MetricRecord],
    limit: usize,
) -> Vec<ChangeEvent> {
    let before: HashMap<&str, &MetricRecord> =
        previous.iter().map(|r| (r.id.as_str(), r)).collect();
    let after: HashMap<&str, &MetricRecord> = next.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut events = Vec::new();

    let page_full = !next.is_empty() && next.len() >= limit;
    let oldest_kept = next.iter().map(|r| r.timestamp).min().filter(|_| page_full);
    for record in previous {
        if after.contains_key(record.id.as_str()) {
            continue;
        }
        let inside_page = oldest_kept.map_or(true, |oldest| record.timestamp >= oldest);
        if inside_page {
            events.push(ChangeEvent::Delete {
                id: record.id.clone(),
                user_id: Some(record.user_id.clone()),
            });
        }
    }

    for record in next.iter().rev() {
        match before.get(record.id.as_str()) {
            None => events.push(ChangeEvent::Insert(record.clone())),
            Some(old) if *old != record => events.push(ChangeEvent::Update(record.clone())),
            Some(_) => {}
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::types::{ChangeKind, RecordId, UserId};
    use chrono::{DateTime, Duration, Utc};

    const LIMIT: usize = 10;

    fn record(id: &str, minutes: i64) -> MetricRecord {
        MetricRecord {
            id: RecordId::from(id),
            user_id: UserId::from("a"),
            heart_rate: 70,
            blood_oxygen: 98,
            temperature: 36.6,
            activity_level: 50,
            timestamp: DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc)
                + Duration::minutes(minutes),
            anomaly: false,
        }
    }

    #[test]
    fn test_identical_pages_produce_nothing() {
        let page = vec![record("b", 2), record("a", 1)];
        assert!(diff_pages(&page, &page, 10).is_empty());
    }

    #[test]
    fn test_new_records_are_inserted_oldest_first() {
        let previous = vec![record("a", 1)];
        let next = vec![record("c", 3), record("b", 2), record("a", 1)];
        let events = diff_pages(&previous, &next, LIMIT);

        let ids: Vec<&str> = events.iter().map(|e| e.record_id().as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(events.iter().all(|e| e.kind() == ChangeKind::Insert));
    }

    #[test]
    fn test_changed_payload_is_update() {
        let previous = vec![record("a", 1)];
        let mut changed = record("a", 1);
        changed.heart_rate = 99;
        let events = diff_pages(&previous, &[changed], 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ChangeKind::Update);
    }

    #[test]
    fn test_scrolled_off_is_not_deleted() {
        // Page size two: "a" falls off when "c" arrives
        let previous = vec![record("b", 2), record("a", 1)];
        let next = vec![record("c", 3), record("b", 2)];
        let events = diff_pages(&previous, &next, 2);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ChangeKind::Insert);
    }

    #[test]
    fn test_vanished_inside_page_is_deleted() {
        let previous = vec![record("c", 3), record("b", 2), record("a", 1)];
        let next = vec![record("c", 3), record("a", 1)];
        let events = diff_pages(&previous, &next, LIMIT);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ChangeKind::Delete);
        assert_eq!(events[0].record_id().as_str(), "b");
    }

    #[test]
    fn test_oldest_removed_from_short_page_is_deleted() {
        let previous = vec![record("c", 3), record("b", 2), record("a", 1)];
        let next = vec![record("c", 3), record("b", 2)];
        let events = diff_pages(&previous, &next, LIMIT);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ChangeKind::Delete);
        assert_eq!(events[0].record_id().as_str(), "a");
    }

    #[test]
    fn test_everything_deleted() {
        let previous = vec![record("a", 1)];
        let events = diff_pages(&previous, &[], 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ChangeKind::Delete);
    }
}
