//! Dashboard summary builder.
//!
//! A summary is the read model the presentation layer renders: the latest
//! reading checked against reference ranges, trailing averages and the most
//! recent readings for a chart. It is derived from a window snapshot and is
//! never written back.

use crate::core::aggregate::{
    average, field_stats, filter_since, trend, FieldStats, MetricAverages, Range,
    ReferenceRanges, Trend,
};
use crate::source::types::{Metric, MetricRecord, RecordId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The current summary format version.
pub const SUMMARY_VERSION: &str = "1.0";

/// The name of this producer.
pub const PRODUCER_NAME: &str = "vitals-sync";

/// Readings shown for the trend chart.
pub const DEFAULT_RECENT_COUNT: usize = 24;

/// Relative difference from the weekly mean below which a reading is stable.
const TREND_TOLERANCE_RATIO: f64 = 0.02;

/// Whether a reading sits inside its reference range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    Normal,
    Alert,
}

/// One field of the latest reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldReading {
    pub metric: Metric,
    pub value: f64,
    pub unit: String,
    pub healthy_range: Range,
    pub status: ReadingStatus,
    /// Relative to the weekly mean, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

/// The latest reading with per-field checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestReading {
    pub record_id: RecordId,
    pub timestamp: DateTime<Utc>,
    pub anomaly: bool,
    pub fields: Vec<FieldReading>,
}

impl LatestReading {
    /// Whether any field is outside its range.
    pub fn has_alert(&self) -> bool {
        self.fields.iter().any(|f| f.status == ReadingStatus::Alert)
    }
}

/// Spread of one field over a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpread {
    pub metric: Metric,
    #[serde(flatten)]
    pub stats: FieldStats,
}

/// Aggregates for a trailing period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub days: u32,
    pub record_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub averages: Option<MetricAverages>,
    pub spread: Vec<MetricSpread>,
}

/// Everything a dashboard view needs, derived from one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub version: String,
    pub producer: String,
    pub instance_id: String,
    pub generated_at: DateTime<Utc>,
    pub user_id: UserId,
    pub record_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<LatestReading>,
    pub weekly: PeriodSummary,
    pub monthly: PeriodSummary,
    pub recent: Vec<MetricRecord>,
}

/// Builder for dashboard summaries.
pub struct SummaryBuilder {
    instance_id: Uuid,
    ranges: ReferenceRanges,
    recent_count: usize,
}

impl SummaryBuilder {
    pub fn new(ranges: ReferenceRanges) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            ranges,
            recent_count: DEFAULT_RECENT_COUNT,
        }
    }

    /// Set how many recent readings the summary carries.
    pub fn with_recent_count(mut self, count: usize) -> Self {
        self.recent_count = count;
        self
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn ranges(&self) -> &ReferenceRanges {
        &self.ranges
    }

    /// Build a summary from a newest-first snapshot.
    pub fn build(
        &self,
        user_id: &UserId,
        records: &[MetricRecord],
        now: DateTime<Utc>,
    ) -> DashboardSummary {
        let weekly = self.period(records, 7, now);
        let monthly = self.period(records, 30, now);
        let latest = records
            .first()
            .map(|record| self.latest(record, weekly.averages.as_ref()));

        DashboardSummary {
            version: SUMMARY_VERSION.to_string(),
            producer: PRODUCER_NAME.to_string(),
            instance_id: self.instance_id.to_string(),
            generated_at: now,
            user_id: user_id.clone(),
            record_count: records.len(),
            latest,
            weekly,
            monthly,
            recent: records.iter().take(self.recent_count).cloned().collect(),
        }
    }

    /// Build a summary and serialize it to pretty JSON.
    pub fn build_json(
        &self,
        user_id: &UserId,
        records: &[MetricRecord],
        now: DateTime<Utc>,
    ) -> String {
        let summary = self.build(user_id, records, now);
        serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string())
    }

    fn period(&self, records: &[MetricRecord], days: u32, now: DateTime<Utc>) -> PeriodSummary {
        let selected = filter_since(records, days, now);
        let spread = Metric::ALL
            .iter()
            .filter_map(|&metric| {
                field_stats(selected.iter().copied(), metric)
                    .map(|stats| MetricSpread { metric, stats })
            })
            .collect();

        PeriodSummary {
            days,
            record_count: selected.len(),
            averages: average(selected.iter().copied()),
            spread,
        }
    }

    fn latest(&self, record: &MetricRecord, weekly: Option<&MetricAverages>) -> LatestReading {
        let fields = Metric::ALL
            .iter()
            .map(|&metric| {
                let value = record.value(metric);
                let range = self.ranges.for_metric(metric);
                let trend = weekly.map(|avg| {
                    let baseline = averaged_value(avg, metric);
                    trend(value, baseline, baseline.abs() * TREND_TOLERANCE_RATIO)
                });

                FieldReading {
                    metric,
                    value,
                    unit: metric.unit().to_string(),
                    healthy_range: range,
                    status: if range.contains(value) {
                        ReadingStatus::Normal
                    } else {
                        ReadingStatus::Alert
                    },
                    trend,
                }
            })
            .collect();

        LatestReading {
            record_id: record.id.clone(),
            timestamp: record.timestamp,
            anomaly: record.anomaly,
            fields,
        }
    }
}

impl Default for SummaryBuilder {
    fn default() -> Self {
        Self::new(ReferenceRanges::default())
    }
}

fn averaged_value(averages: &MetricAverages, metric: Metric) -> f64 {
    match metric {
        Metric::HeartRate => averages.heart_rate as f64,
        Metric::BloodOxygen => averages.blood_oxygen as f64,
        Metric::Temperature => averages.temperature,
        Metric::ActivityLevel => averages.activity_level as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record(id: &str, heart_rate: i32, days_ago: i64) -> MetricRecord {
        MetricRecord {
            id: RecordId::from(id),
            user_id: UserId::from("a"),
            heart_rate,
            blood_oxygen: 98,
            temperature: 36.6,
            activity_level: 50,
            timestamp: now() - Duration::days(days_ago),
            anomaly: false,
        }
    }

    #[test]
    fn test_builder_instance_id() {
        let a = SummaryBuilder::default();
        let b = SummaryBuilder::default();
        assert_ne!(a.instance_id(), b.instance_id());
    }

    #[test]
    fn test_empty_summary() {
        let summary = SummaryBuilder::default().build(&UserId::from("a"), &[], now());
        assert!(summary.latest.is_none());
        assert!(summary.weekly.averages.is_none());
        assert!(summary.weekly.spread.is_empty());
        assert_eq!(summary.record_count, 0);
    }

    #[test]
    fn test_periods_and_latest() {
        let records = vec![
            record("r1", 110, 0),
            record("r2", 70, 3),
            record("r3", 60, 20),
        ];
        let summary = SummaryBuilder::default().build(&UserId::from("a"), &records, now());

        assert_eq!(summary.weekly.record_count, 2);
        assert_eq!(summary.weekly.averages.as_ref().unwrap().heart_rate, 90);
        assert_eq!(summary.monthly.record_count, 3);
        assert_eq!(summary.monthly.averages.as_ref().unwrap().heart_rate, 80);

        let latest = summary.latest.unwrap();
        assert_eq!(latest.record_id.as_str(), "r1");
        assert!(latest.has_alert());

        let heart = latest
            .fields
            .iter()
            .find(|f| f.metric == Metric::HeartRate)
            .unwrap();
        assert_eq!(heart.status, ReadingStatus::Alert);
        assert_eq!(heart.trend, Some(Trend::Up));

        let oxygen = latest
            .fields
            .iter()
            .find(|f| f.metric == Metric::BloodOxygen)
            .unwrap();
        assert_eq!(oxygen.status, ReadingStatus::Normal);
        assert_eq!(oxygen.trend, Some(Trend::Stable));
    }

    #[test]
    fn test_recent_is_capped() {
        let records: Vec<MetricRecord> = (0..30)
            .map(|i| record(&format!("r{i}"), 70, 0))
            .collect();
        let summary = SummaryBuilder::default()
            .with_recent_count(5)
            .build(&UserId::from("a"), &records, now());
        assert_eq!(summary.recent.len(), 5);
        assert_eq!(summary.recent[0].id.as_str(), "r0");
    }

    #[test]
    fn test_summary_json() {
        let records = vec![record("r1", 72, 0)];
        let json = SummaryBuilder::default().build_json(&UserId::from("a"), &records, now());
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["version"], SUMMARY_VERSION);
        assert_eq!(parsed["producer"], PRODUCER_NAME);
        assert_eq!(parsed["user_id"], "a");
        assert_eq!(parsed["latest"]["fields"][0]["metric"], "heart_rate");
        assert_eq!(parsed["weekly"]["spread"][0]["min"], 72.0);
    }
}
