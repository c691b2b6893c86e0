//! Vitals Sync - client-side synchronization of personal health telemetry.
//!
//! This library keeps a bounded, newest-first window of one user's health
//! readings (heart rate, blood oxygen, temperature, activity level) in step
//! with a remote store, and derives period statistics from it on demand.
//!
//! # Guarantees
//!
//! - **Ordered**: the window is always newest first, so the latest reading
//!   and recent-N queries never sort
//! - **Bounded**: inserts beyond capacity evict the oldest reading
//! - **Scoped**: events for any other user are rejected, whatever the
//!   subscription delivered
//! - **All or nothing**: a rejected event leaves the window untouched
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        SyncSession                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  fetch   ┌──────────────┐   read  ┌────────┐│
//! │  │ RemoteSource │────────▶│  SyncWindow  │───────▶│Aggregate││
//! │  │ (rest/memory)│  events  │ (newest 100) │        │Summary ││
//! │  └──────────────┘────────▶└──────────────┘        └────────┘│
//! │         │        channel          │                          │
//! │         ▼                         ▼                          │
//! │   poll / push              ┌──────────────┐                  │
//! │                            │  SyncStats   │                  │
//! │                            └──────────────┘                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use vitals_sync::source::{MemorySource, UserId};
//! use vitals_sync::{core, SessionOptions, SyncSession};
//!
//! let source = MemorySource::new();
//! let mut session = SyncSession::new(source, UserId::from("user-1"), SessionOptions::default());
//! session.start().expect("Failed to load readings");
//!
//! // Apply whatever arrived since the last call
//! session.pump();
//! let weekly = core::average(core::filter_since_now(session.snapshot(), 7));
//! ```

pub mod config;
pub mod core;
pub mod session;
pub mod source;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{
    average, filter_since, is_in_range, ApplyOutcome, DashboardSummary, MetricAverages,
    ReferenceRanges, SummaryBuilder, SyncError, SyncWindow,
};
pub use session::{PumpReport, SessionOptions, SessionState, SyncSession};
pub use source::{
    ChangeEvent, FetchError, MemorySource, MetricRecord, RecordId, RemoteSource,
    SubscriptionHandle, UserId,
};
pub use stats::{SharedSyncStats, SyncStats, SyncStatsSnapshot};

// Remote store re-exports (when enabled)
#[cfg(feature = "remote")]
pub use source::{RestClient, RestConfig, RestSource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
