//! Sync session lifecycle.
//!
//! A [`SyncSession`] owns one [`SyncWindow`] and drives it from a
//! [`RemoteSource`]: subscribe, load the initial page, then apply queued
//! change events whenever the host calls [`SyncSession::pump`].
//!
//! The adapter may invoke its sink from any thread. The sink only pushes the
//! payload into a bounded channel; the window is written exclusively by the
//! thread that owns the session.

use crate::core::{ApplyOutcome, InitReport, SyncError, SyncWindow, DEFAULT_CAPACITY};
use crate::source::{
    FetchError, MetricRecord, RawChangeEvent, RemoteSource, SubscriptionHandle, UserId,
};
use crate::stats::{create_shared_stats, SharedSyncStats};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::time::Duration;

/// Maximum number of change events buffered between pumps.
pub const EVENT_QUEUE_CAPACITY: usize = 10_000;

/// Callback invoked with the new buffer after it changed.
pub type ChangeObserver = Box<dyn FnMut(&[MetricRecord]) + Send>;

/// Sizing for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Maximum number of records kept in the window
    pub capacity: usize,
    /// Page size requested from the store
    pub fetch_limit: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            fetch_limit: DEFAULT_CAPACITY,
        }
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing fetched yet
    Idle,
    /// Initial fetch in flight
    Loading,
    /// Window seeded; events are being applied
    Ready,
    /// The last fetch failed; `resync` may be retried
    Failed(String),
    /// Torn down; every further call is a no-op
    Disposed,
}

/// Result of one `pump` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Events that changed the buffer
    pub applied: usize,
    /// Events rejected as foreign, stale or malformed
    pub rejected: usize,
}

/// One user's synchronized view of the remote store.
pub struct SyncSession<S: RemoteSource> {
    source: S,
    window: SyncWindow,
    options: SessionOptions,
    state: SessionState,
    sender: Sender<RawChangeEvent>,
    receiver: Receiver<RawChangeEvent>,
    subscription: Option<SubscriptionHandle>,
    observers: Vec<ChangeObserver>,
    stats: SharedSyncStats,
}

impl<S: RemoteSource> SyncSession<S> {
    pub fn new(source: S, user_id: UserId, options: SessionOptions) -> Self {
        let (sender, receiver) = bounded(EVENT_QUEUE_CAPACITY);

        Self {
            source,
            window: SyncWindow::new(user_id, options.capacity),
            options,
            state: SessionState::Idle,
            sender,
            receiver,
            subscription: None,
            observers: Vec::new(),
            stats: create_shared_stats(),
        }
    }

    /// Use externally owned counters, e.g. ones persisted across runs.
    pub fn with_stats(mut self, stats: SharedSyncStats) -> Self {
        self.stats = stats;
        self
    }

    /// Subscribe to changes and seed the window from the store.
    ///
    /// The subscription is opened first so events committed while the page
    /// is being fetched are queued and applied on the next pump. On a fetch
    /// failure the session enters [`SessionState::Failed`] and the error is
    /// returned; call [`SyncSession::resync`] to retry.
    pub fn start(&mut self) -> Result<InitReport, FetchError> {
        if self.state == SessionState::Disposed {
            return Ok(InitReport::default());
        }

        if self.subscription.is_none() {
            let sender = self.sender.clone();
            let user_id = self.window.user_id().clone();
            let sink = Box::new(move |event: RawChangeEvent| forward_event(&sender, event));

            match self.source.subscribe(&user_id, sink) {
                Ok(handle) => {
                    tracing::debug!("Subscribed to changes for {} (#{})", user_id, handle.id());
                    self.subscription = Some(handle);
                }
                Err(e) => {
                    self.fail(&e);
                    return Err(e);
                }
            }
        }

        self.load_snapshot()
    }

    /// Refetch the page and replace the window wholesale.
    ///
    /// Used after a reconnect or a failed start. Queued events predate the
    /// fetch and are discarded.
    pub fn resync(&mut self) -> Result<InitReport, FetchError> {
        if self.state == SessionState::Disposed {
            return Ok(InitReport::default());
        }
        if self.subscription.is_none() {
            return self.start();
        }
        self.load_snapshot()
    }

    fn load_snapshot(&mut self) -> Result<InitReport, FetchError> {
        self.state = SessionState::Loading;
        while self.receiver.try_recv().is_ok() {}

        let user_id = self.window.user_id().clone();
        let records = match self.source.fetch_recent(&user_id, self.options.fetch_limit) {
            Ok(records) => records,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        let report = self.window.initialize(records);
        self.stats.record_snapshot_loaded();
        if report.foreign > 0 {
            tracing::warn!(
                "Dropped {} fetched records belonging to other users",
                report.foreign
            );
        }
        if report.malformed > 0 {
            tracing::warn!("Dropped {} malformed fetched records", report.malformed);
        }
        tracing::info!(
            "Loaded {} records for {} ({} duplicates, {} over capacity)",
            report.accepted,
            user_id,
            report.duplicates,
            report.truncated
        );

        self.state = SessionState::Ready;
        self.notify_observers();
        Ok(report)
    }

    fn fail(&mut self, error: &FetchError) {
        self.stats.record_fetch_failure();
        tracing::warn!("Sync for {} failed: {}", self.window.user_id(), error);
        self.state = SessionState::Failed(error.to_string());
    }

    /// Apply every queued event without blocking.
    ///
    /// Does nothing unless the session is ready. Events queued meanwhile are
    /// superseded by the page the next load fetches.
    pub fn pump(&mut self) -> PumpReport {
        let mut report = PumpReport::default();
        if self.state != SessionState::Ready {
            return report;
        }

        while let Ok(event) = self.receiver.try_recv() {
            self.apply_one(event, &mut report);
        }

        if report.applied > 0 {
            self.notify_observers();
        }
        report
    }

    /// Wait up to `timeout` for an event, then apply everything queued.
    pub fn pump_timeout(&mut self, timeout: Duration) -> PumpReport {
        let mut report = PumpReport::default();
        if self.state != SessionState::Ready {
            return report;
        }

        match self.receiver.recv_timeout(timeout) {
            Ok(event) => self.apply_one(event, &mut report),
            Err(_) => return report,
        }

        let rest = self.pump();
        if report.applied > 0 && rest.applied == 0 {
            self.notify_observers();
        }

        PumpReport {
            applied: report.applied + rest.applied,
            rejected: report.rejected + rest.rejected,
        }
    }

    fn apply_one(&mut self, event: RawChangeEvent, report: &mut PumpReport) {
        let kind = event.event_type.clone();

        match self.window.apply_raw(event) {
            Ok(outcome) => {
                if let ApplyOutcome::Inserted { evicted } = &outcome {
                    if !evicted.is_empty() {
                        tracing::debug!("Evicted {} records over capacity", evicted.len());
                        self.stats.record_evictions(evicted.len() as u64);
                    }
                }
                if outcome.mutated() {
                    self.stats.record_event_applied();
                    report.applied += 1;
                }
            }
            Err(e) => {
                report.rejected += 1;
                match &e {
                    SyncError::ScopeViolation { .. } => {
                        self.stats.record_scope_violation();
                        tracing::warn!("Rejected {} event: {}", kind, e);
                    }
                    SyncError::MalformedEvent { .. } => {
                        self.stats.record_malformed_event();
                        tracing::warn!("Rejected {} event: {}", kind, e);
                    }
                    SyncError::StaleEvent { .. } => {
                        self.stats.record_stale_event();
                        tracing::debug!("Ignored {} event: {}", kind, e);
                    }
                }
            }
        }
    }

    /// Register a callback run after every change to the buffer.
    pub fn on_change(&mut self, observer: ChangeObserver) {
        self.observers.push(observer);
    }

    fn notify_observers(&mut self) {
        let records = self.window.snapshot();
        for observer in self.observers.iter_mut() {
            observer(records);
        }
    }

    /// Release the subscription and make the session inert.
    pub fn dispose(&mut self) {
        if let Some(handle) = self.subscription.take() {
            self.source.unsubscribe(&handle);
            tracing::debug!("Unsubscribed #{}", handle.id());
        }
        while self.receiver.try_recv().is_ok() {}
        self.window.dispose();
        self.observers.clear();
        self.state = SessionState::Disposed;
    }

    pub fn snapshot(&self) -> &[MetricRecord] {
        self.window.snapshot()
    }

    pub fn latest(&self) -> Option<&MetricRecord> {
        self.window.latest()
    }

    pub fn recent(&self, n: usize) -> &[MetricRecord] {
        self.window.recent(n)
    }

    pub fn window_since(&self, cutoff: DateTime<Utc>) -> &[MetricRecord] {
        self.window.window_since(cutoff)
    }

    pub fn window_since_days(&self, days: u32, now: DateTime<Utc>) -> &[MetricRecord] {
        self.window.window_since_days(days, now)
    }

    pub fn user_id(&self) -> &UserId {
        self.window.user_id()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Number of events waiting to be pumped.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub fn stats(&self) -> &SharedSyncStats {
        &self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: RemoteSource> Drop for SyncSession<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.subscription.take() {
            self.source.unsubscribe(&handle);
        }
    }
}

fn forward_event(sender: &Sender<RawChangeEvent>, event: RawChangeEvent) {
    match sender.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            // A resync recovers anything dropped here
            tracing::warn!(
                "Change queue full, dropping {} event",
                event.event_type
            );
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, NewRecord, RecordId};
    use chrono::Duration as ChronoDuration;
    use std::sync::{Arc, Mutex};

    fn reading(user: &str, minutes_ago: i64) -> NewRecord {
        NewRecord {
            user_id: UserId::from(user),
            heart_rate: 70,
            blood_oxygen: 97,
            temperature: 36.7,
            activity_level: 50,
            timestamp: Utc::now() - ChronoDuration::minutes(minutes_ago),
            anomaly: false,
        }
    }

    fn session(source: &MemorySource, user: &str) -> SyncSession<MemorySource> {
        SyncSession::new(source.clone(), UserId::from(user), SessionOptions::default())
    }

    #[test]
    fn test_start_seeds_window() {
        let source = MemorySource::new();
        source.create(reading("a", 10));
        source.create(reading("a", 5));

        let mut session = session(&source, "a");
        assert_eq!(session.state(), &SessionState::Idle);

        let report = session.start().unwrap();
        assert_eq!(report.accepted, 2);
        assert!(session.is_ready());
        assert_eq!(session.snapshot().len(), 2);
        assert_eq!(source.subscriber_count(), 1);
    }

    #[test]
    fn test_events_wait_for_pump() {
        let source = MemorySource::new();
        let mut session = session(&source, "a");
        session.start().unwrap();

        source.create(reading("a", 0));
        assert_eq!(session.snapshot().len(), 0);
        assert_eq!(session.pending(), 1);

        let report = session.pump();
        assert_eq!(report.applied, 1);
        assert_eq!(session.snapshot().len(), 1);
    }

    #[test]
    fn test_failed_fetch_then_resync() {
        let source = MemorySource::new();
        source.create(reading("a", 1));
        source.fail_next_fetch("connection refused");

        let mut session = session(&source, "a");
        let err = session.start().unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(session.state(), SessionState::Failed(_)));
        assert_eq!(session.stats().snapshot().fetch_failures, 1);

        session.resync().unwrap();
        assert!(session.is_ready());
        assert_eq!(session.snapshot().len(), 1);
    }

    #[test]
    fn test_rejections_are_counted_not_raised() {
        let source = MemorySource::new().unscoped();
        let mut session = session(&source, "a");
        session.start().unwrap();

        source.create(reading("b", 0));
        let ghost = reading("a", 0).with_id(RecordId::from("ghost"));
        source.push_raw(&UserId::from("a"), RawChangeEvent::update(&ghost));
        source.push_raw(
            &UserId::from("a"),
            RawChangeEvent {
                event_type: "INSERT".to_string(),
                new: None,
                old: None,
            },
        );

        let report = session.pump();
        assert_eq!(report.applied, 0);
        assert_eq!(report.rejected, 3);
        assert!(session.snapshot().is_empty());

        let stats = session.stats().snapshot();
        assert_eq!(stats.scope_violations, 1);
        assert_eq!(stats.stale_events, 1);
        assert_eq!(stats.malformed_events, 1);
    }

    #[test]
    fn test_observers_see_changes() {
        let source = MemorySource::new();
        let mut session = session(&source, "a");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.on_change(Box::new(move |records| {
            sink.lock().unwrap().push(records.len());
        }));

        session.start().unwrap();
        source.create(reading("a", 0));
        session.pump();
        // Nothing queued, no notification
        session.pump();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_pump_timeout_applies_queued_events() {
        let source = MemorySource::new();
        let mut session = session(&source, "a");
        session.start().unwrap();

        source.create(reading("a", 2));
        source.create(reading("a", 1));
        let report = session.pump_timeout(Duration::from_millis(10));
        assert_eq!(report.applied, 2);

        let idle = session.pump_timeout(Duration::from_millis(10));
        assert_eq!(idle, PumpReport::default());
    }

    #[test]
    fn test_dispose_unsubscribes_once() {
        let source = MemorySource::new();
        source.create(reading("a", 1));
        let mut session = session(&source, "a");
        session.start().unwrap();

        session.dispose();
        session.dispose();
        assert_eq!(session.state(), &SessionState::Disposed);
        assert_eq!(source.subscriber_count(), 0);
        assert!(session.snapshot().is_empty());

        source.create(reading("a", 0));
        assert_eq!(session.pump(), PumpReport::default());
        assert_eq!(session.resync().unwrap(), InitReport::default());
    }

    #[test]
    fn test_drop_releases_subscription() {
        let source = MemorySource::new();
        {
            let mut session = session(&source, "a");
            session.start().unwrap();
            assert_eq!(source.subscriber_count(), 1);
        }
        assert_eq!(source.subscriber_count(), 0);
    }
}
