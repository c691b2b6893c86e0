//! Bounded, ordered buffer of one user's metric records.
//!
//! The window is seeded from a bulk fetch and then kept current by applying
//! change events one at a time. Ordering (newest first) and the capacity cap
//! are enforced on every write so reads never sort.
//!
//! A `SyncWindow` is not synchronized. All writes and reads are expected to
//! happen on one execution context; hosts that share it across threads must
//! put a single-writer lock or a channel in front of it.

use crate::core::aggregate::period_start;
use crate::source::types::{
    ChangeEvent, MalformedPayload, MetricRecord, RawChangeEvent, RecordId, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Default number of records kept in a window.
pub const DEFAULT_CAPACITY: usize = 100;

/// Reasons a change event was rejected. None of them mutate the window.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The event belongs to a different user than the window is bound to
    ScopeViolation { expected: UserId, found: UserId },
    /// An update referenced a record the window does not hold
    StaleEvent { id: RecordId },
    /// The event failed shape validation
    MalformedEvent { reason: String },
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::ScopeViolation { expected, found } => {
                write!(f, "Scope violation: event for user {found}, window bound to {expected}")
            }
            SyncError::StaleEvent { id } => write!(f, "Stale event: record {id} not in window"),
            SyncError::MalformedEvent { reason } => write!(f, "Malformed event: {reason}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<MalformedPayload> for SyncError {
    fn from(err: MalformedPayload) -> Self {
        SyncError::MalformedEvent { reason: err.reason }
    }
}

/// What a successful `apply_change` did to the window.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// A new record was added; `evicted` holds records pushed out by the cap
    Inserted { evicted: Vec<RecordId> },
    /// An existing record was replaced wholesale
    Replaced,
    /// A record was removed
    Removed,
    /// Delete of an id the window does not hold
    Unchanged,
    /// The window has been disposed
    Ignored,
}

impl ApplyOutcome {
    /// Whether the buffer changed.
    pub fn mutated(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Inserted { .. } | ApplyOutcome::Replaced | ApplyOutcome::Removed
        )
    }
}

/// Summary of an `initialize` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Records kept in the window
    pub accepted: usize,
    /// Records dropped because they belong to another user
    pub foreign: usize,
    /// Records dropped because their id was already present
    pub duplicates: usize,
    /// Records dropped because they failed shape validation
    pub malformed: usize,
    /// Records dropped by the capacity cap
    pub truncated: usize,
}

/// Ordered, bounded view of one user's records, newest first.
#[derive(Debug, Clone)]
pub struct SyncWindow {
    user_id: UserId,
    capacity: usize,
    records: Vec<MetricRecord>,
    disposed: bool,
}

impl SyncWindow {
    /// Create an empty window. A capacity of zero is raised to one.
    pub fn new(user_id: UserId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            user_id,
            capacity,
            records: Vec::with_capacity(capacity),
            disposed: false,
        }
    }

    /// Create an empty window with the default capacity.
    pub fn with_default_capacity(user_id: UserId) -> Self {
        Self::new(user_id, DEFAULT_CAPACITY)
    }

    /// Replace the buffer wholesale with a fetched snapshot.
    ///
    /// Records are re-sorted newest first, records for other users and
    /// repeated ids are dropped, and the result is truncated to capacity.
    /// Calling this again performs a full resynchronization.
    ///
    /// A snapshot carries no arrival order of its own, so records with equal
    /// timestamps keep the order the source returned them in. Change events
    /// applied afterwards place a record ahead of its equal-timestamp peers.
    pub fn initialize(&mut self, records: Vec<MetricRecord>) -> InitReport {
        let mut report = InitReport::default();
        if self.disposed {
            return report;
        }

        let mut incoming: Vec<MetricRecord> = Vec::with_capacity(records.len());
        for record in records {
            if record.user_id != self.user_id {
                report.foreign += 1;
                continue;
            }
            if record.validate().is_err() {
                report.malformed += 1;
                continue;
            }
            incoming.push(record);
        }

        // Stable: ties keep fetch order
        incoming.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut seen = HashSet::with_capacity(incoming.len());
        incoming.retain(|r| {
            let fresh = seen.insert(r.id.clone());
            if !fresh {
                report.duplicates += 1;
            }
            fresh
        });

        if incoming.len() > self.capacity {
            report.truncated = incoming.len() - self.capacity;
            incoming.truncate(self.capacity);
        }

        report.accepted = incoming.len();
        self.records = incoming;
        report
    }

    /// Apply one change event.
    ///
    /// Either the whole change is applied or the window is left untouched.
    /// After `dispose` every call is a no-op returning [`ApplyOutcome::Ignored`].
    pub fn apply_change(&mut self, event: ChangeEvent) -> Result<ApplyOutcome, SyncError> {
        if self.disposed {
            return Ok(ApplyOutcome::Ignored);
        }

        if let Some(owner) = event.user_id() {
            if *owner != self.user_id {
                return Err(SyncError::ScopeViolation {
                    expected: self.user_id.clone(),
                    found: owner.clone(),
                });
            }
        }

        match event {
            ChangeEvent::Insert(record) => {
                record.validate()?;
                match self.position_of(&record.id) {
                    // Already reflected, e.g. by a later full fetch
                    Some(index) => {
                        self.replace_at(index, record);
                        Ok(ApplyOutcome::Replaced)
                    }
                    None => {
                        let evicted = self.insert_ordered(record);
                        Ok(ApplyOutcome::Inserted { evicted })
                    }
                }
            }
            ChangeEvent::Update(record) => {
                record.validate()?;
                match self.position_of(&record.id) {
                    Some(index) => {
                        self.replace_at(index, record);
                        Ok(ApplyOutcome::Replaced)
                    }
                    None => Err(SyncError::StaleEvent { id: record.id }),
                }
            }
            ChangeEvent::Delete { id, .. } => {
                if id.as_str().trim().is_empty() {
                    return Err(SyncError::MalformedEvent {
                        reason: "missing field `id`".to_string(),
                    });
                }
                match self.position_of(&id) {
                    Some(index) => {
                        self.records.remove(index);
                        Ok(ApplyOutcome::Removed)
                    }
                    None => Ok(ApplyOutcome::Unchanged),
                }
            }
        }
    }

    /// Validate a wire payload and apply it.
    pub fn apply_raw(&mut self, raw: RawChangeEvent) -> Result<ApplyOutcome, SyncError> {
        if self.disposed {
            return Ok(ApplyOutcome::Ignored);
        }
        let event = ChangeEvent::try_from(raw)?;
        self.apply_change(event)
    }

    /// Drop the buffer and make the window inert.
    pub fn dispose(&mut self) {
        self.records = Vec::new();
        self.disposed = true;
    }

    /// Current buffer, newest first.
    pub fn snapshot(&self) -> &[MetricRecord] {
        &self.records
    }

    /// Most recent record, if any.
    pub fn latest(&self) -> Option<&MetricRecord> {
        self.records.first()
    }

    /// Up to `n` most recent records.
    pub fn recent(&self, n: usize) -> &[MetricRecord] {
        &self.records[..n.min(self.records.len())]
    }

    /// Records with `timestamp >= cutoff`, a prefix of the buffer.
    pub fn window_since(&self, cutoff: DateTime<Utc>) -> &[MetricRecord] {
        let end = self.records.partition_point(|r| r.timestamp >= cutoff);
        &self.records[..end]
    }

    /// Records from the trailing `days` days relative to `now`.
    ///
    /// Zero days selects nothing.
    pub fn window_since_days(&self, days: u32, now: DateTime<Utc>) -> &[MetricRecord] {
        if days == 0 {
            return &[];
        }
        self.window_since(period_start(days, now))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn position_of(&self, id: &RecordId) -> Option<usize> {
        self.records.iter().position(|r| &r.id == id)
    }

    fn replace_at(&mut self, index: usize, record: MetricRecord) {
        if self.records[index].timestamp == record.timestamp {
            self.records[index] = record;
        } else {
            self.records.remove(index);
            // Removal freed a slot, nothing can be evicted here
            self.insert_ordered(record);
        }
    }

    /// Insert keeping newest-first order and trim to capacity.
    ///
    /// A record ties ahead of existing records with the same timestamp.
    fn insert_ordered(&mut self, record: MetricRecord) -> Vec<RecordId> {
        let index = self
            .records
            .partition_point(|r| r.timestamp > record.timestamp);
        self.records.insert(index, record);

        if self.records.len() > self.capacity {
            self.records
                .drain(self.capacity..)
                .map(|r| r.id)
                .collect()
        } else {
            Vec::new()
        }
    }
}
