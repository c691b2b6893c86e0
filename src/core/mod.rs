//! Core synchronization and aggregation.
//!
//! This module contains:
//! - The sync window that keeps one user's records ordered and bounded
//! - Pure aggregation over record sequences
//! - Page diffing for polling adapters
//! - The dashboard summary builder

pub mod aggregate;
pub mod reconcile;
pub mod summary;
pub mod window;

// Re-export commonly used types
pub use aggregate::{
    average, field_stats, filter_since, filter_since_now, is_in_range, period_start, trend,
    FieldStats, MetricAverages, Range, ReferenceRanges, Trend,
};
pub use reconcile::diff_pages;
pub use summary::{DashboardSummary, ReadingStatus, SummaryBuilder, PRODUCER_NAME, SUMMARY_VERSION};
pub use window::{ApplyOutcome, InitReport, SyncError, SyncWindow, DEFAULT_CAPACITY};
