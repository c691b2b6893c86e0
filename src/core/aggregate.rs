//! Stateless statistics over sequences of metric records.
//!
//! Everything here is a pure function of its inputs. Callers pass `now`
//! explicitly where time matters so results are reproducible.

use crate::source::types::{Metric, MetricRecord};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Rounded per-field means of a set of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAverages {
    pub heart_rate: i32,
    pub blood_oxygen: i32,
    /// Rounded to one decimal place
    pub temperature: f64,
    pub activity_level: i32,
    /// Number of records averaged
    pub sample_count: usize,
}

/// Spread of one field across a set of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
}

/// Direction of the latest reading relative to a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// Inclusive bounds for one field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        is_in_range(value, self.min, self.max)
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Healthy reference ranges used to flag readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRanges {
    pub heart_rate: Range,
    pub blood_oxygen: Range,
    pub temperature: Range,
    pub activity_level: Range,
}

impl Default for ReferenceRanges {
    fn default() -> Self {
        Self {
            heart_rate: Range::new(60.0, 100.0),
            blood_oxygen: Range::new(95.0, 100.0),
            temperature: Range::new(36.1, 37.2),
            activity_level: Range::new(20.0, 80.0),
        }
    }
}

impl ReferenceRanges {
    pub fn for_metric(&self, metric: Metric) -> Range {
        match metric {
            Metric::HeartRate => self.heart_rate,
            Metric::BloodOxygen => self.blood_oxygen,
            Metric::Temperature => self.temperature,
            Metric::ActivityLevel => self.activity_level,
        }
    }

    /// Whether every field of a record falls in its range.
    pub fn all_in_range(&self, record: &MetricRecord) -> bool {
        Metric::ALL
            .iter()
            .all(|&m| self.for_metric(m).contains(record.value(m)))
    }
}

/// Inclusive range check.
pub fn is_in_range<T: PartialOrd>(value: T, min: T, max: T) -> bool {
    value >= min && value <= max
}

/// Start of the trailing `days`-day period ending at `now`.
///
/// A period reaching past the representable range starts at the earliest
/// representable instant, so it selects every record.
pub fn period_start(days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    Duration::try_days(i64::from(days))
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Records with `timestamp >= now - days`. Zero days selects nothing.
pub fn filter_since<'a, I>(records: I, days: u32, now: DateTime<Utc>) -> Vec<&'a MetricRecord>
where
    I: IntoIterator<Item = &'a MetricRecord>,
{
    if days == 0 {
        return Vec::new();
    }

    let cutoff = period_start(days, now);
    records
        .into_iter()
        .filter(|r| r.timestamp >= cutoff)
        .collect()
}

/// [`filter_since`] against the current wall clock.
pub fn filter_since_now<'a, I>(records: I, days: u32) -> Vec<&'a MetricRecord>
where
    I: IntoIterator<Item = &'a MetricRecord>,
{
    filter_since(records, days, Utc::now())
}

/// Per-field arithmetic means, or `None` for empty input.
///
/// Integer fields round half up to the nearest integer; temperature rounds
/// half up to one decimal place.
pub fn average<'a, I>(records: I) -> Option<MetricAverages>
where
    I: IntoIterator<Item = &'a MetricRecord>,
{
    let mut count = 0usize;
    let mut heart_rate = 0i64;
    let mut blood_oxygen = 0i64;
    let mut activity_level = 0i64;
    let mut temperature = 0.0f64;

    for record in records {
        count += 1;
        heart_rate += i64::from(record.heart_rate);
        blood_oxygen += i64::from(record.blood_oxygen);
        activity_level += i64::from(record.activity_level);
        temperature += record.temperature;
    }

    if count == 0 {
        return None;
    }

    let n = count as f64;
    Some(MetricAverages {
        heart_rate: round_half_up(heart_rate as f64 / n) as i32,
        blood_oxygen: round_half_up(blood_oxygen as f64 / n) as i32,
        temperature: round_half_up(temperature / n * 10.0) / 10.0,
        activity_level: round_half_up(activity_level as f64 / n) as i32,
        sample_count: count,
    })
}

/// Min, max, mean and spread of one field, or `None` for empty input.
pub fn field_stats<'a, I>(records: I, metric: Metric) -> Option<FieldStats>
where
    I: IntoIterator<Item = &'a MetricRecord>,
{
    let values: Vec<f64> = records.into_iter().map(|r| r.value(metric)).collect();
    if values.is_empty() {
        return None;
    }

    Some(FieldStats {
        min: Statistics::min(values.iter()),
        max: Statistics::max(values.iter()),
        mean: Statistics::mean(values.iter()),
        std_dev: Statistics::population_std_dev(values.iter()),
    })
}

/// Compare a reading against a baseline, treating differences within
/// `tolerance` as stable.
pub fn trend(latest: f64, baseline: f64, tolerance: f64) -> Trend {
    let delta = latest - baseline;
    if delta > tolerance.abs() {
        Trend::Up
    } else if delta < -tolerance.abs() {
        Trend::Down
    } else {
        Trend::Stable
    }
}

/// Round to the nearest integer, with .5 going up.
fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::types::{RecordId, UserId};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn reading(heart_rate: i32, temperature: f64) -> MetricRecord {
        MetricRecord {
            id: RecordId::generate(),
            user_id: UserId::from("a"),
            heart_rate,
            blood_oxygen: 98,
            temperature,
            activity_level: 50,
            timestamp: now(),
            anomaly: false,
        }
    }

    #[test]
    fn test_average_empty() {
        let empty: Vec<MetricRecord> = Vec::new();
        assert_eq!(average(&empty), None);
    }

    #[test]
    fn test_average_rounds_half_up() {
        let records = vec![reading(70, 36.6), reading(71, 36.6)];
        let avg = average(&records).unwrap();
        assert_eq!(avg.heart_rate, 71);
        assert_eq!(avg.sample_count, 2);
    }

    #[test]
    fn test_average_temperature_one_decimal() {
        let records = vec![reading(70, 36.10), reading(70, 36.14)];
        let avg = average(&records).unwrap();
        assert_eq!(avg.temperature, 36.1);

        // 36.25 is exact in binary, so this is a true half
        let records = vec![reading(70, 36.0), reading(70, 36.5)];
        assert_eq!(average(&records).unwrap().temperature, 36.3);
    }

    #[test]
    fn test_average_of_mixed_fields() {
        let mut a = reading(60, 36.0);
        a.blood_oxygen = 97;
        a.activity_level = 20;
        let mut b = reading(80, 37.0);
        b.blood_oxygen = 99;
        b.activity_level = 41;

        let avg = average([&a, &b]).unwrap();
        assert_eq!(avg.heart_rate, 70);
        assert_eq!(avg.blood_oxygen, 98);
        assert_eq!(avg.activity_level, 31);
        assert_eq!(avg.temperature, 36.5);
    }

    #[test]
    fn test_filter_since_boundaries() {
        let mut recent = reading(70, 36.6);
        recent.timestamp = now() - Duration::days(1);
        let mut edge = reading(70, 36.6);
        edge.timestamp = now() - Duration::days(7);
        let mut old = reading(70, 36.6);
        old.timestamp = now() - Duration::days(10);
        let records = vec![recent, edge, old];

        assert_eq!(filter_since(&records, 7, now()).len(), 2);
        assert_eq!(filter_since(&records, 30, now()).len(), 3);
        assert!(filter_since(&records, 0, now()).is_empty());
    }

    #[test]
    fn test_filter_since_huge_period_selects_everything() {
        let mut old = reading(70, 36.6);
        old.timestamp = now() - Duration::days(365 * 50);
        let records = vec![reading(80, 36.6), old];

        assert_eq!(filter_since(&records, u32::MAX, now()).len(), 2);
        let empty: Vec<MetricRecord> = Vec::new();
        assert!(filter_since(&empty, u32::MAX, now()).is_empty());
        assert_eq!(period_start(u32::MAX, now()), DateTime::<Utc>::MIN_UTC);
        assert_eq!(period_start(7, now()), now() - Duration::days(7));
    }

    #[test]
    fn test_filter_then_average() {
        let mut recent = reading(90, 36.6);
        recent.timestamp = now() - Duration::days(1);
        let mut old = reading(50, 36.6);
        old.timestamp = now() - Duration::days(10);
        let records = vec![recent, old];

        let weekly = average(filter_since(&records, 7, now())).unwrap();
        assert_eq!(weekly.heart_rate, 90);
        assert!(average(filter_since(&records, 0, now())).is_none());
    }

    #[test]
    fn test_is_in_range_inclusive() {
        assert!(is_in_range(60, 60, 100));
        assert!(is_in_range(100, 60, 100));
        assert!(!is_in_range(101, 60, 100));
        assert!(is_in_range(36.1, 36.1, 37.2));
        assert!(!is_in_range(36.0, 36.1, 37.2));
    }

    #[test]
    fn test_reference_ranges() {
        let ranges = ReferenceRanges::default();
        assert!(ranges.all_in_range(&reading(72, 36.6)));
        assert!(!ranges.all_in_range(&reading(130, 36.6)));
        assert_eq!(ranges.heart_rate.to_string(), "60-100");
    }

    #[test]
    fn test_field_stats() {
        let records = vec![reading(60, 36.0), reading(80, 37.0)];
        let stats = field_stats(&records, Metric::HeartRate).unwrap();
        assert_eq!(stats.min, 60.0);
        assert_eq!(stats.max, 80.0);
        assert_eq!(stats.mean, 70.0);
        assert!((stats.std_dev - 10.0).abs() < 1e-9);

        let empty: Vec<MetricRecord> = Vec::new();
        assert!(field_stats(&empty, Metric::Temperature).is_none());
    }

    #[test]
    fn test_trend() {
        assert_eq!(trend(80.0, 70.0, 2.0), Trend::Up);
        assert_eq!(trend(60.0, 70.0, 2.0), Trend::Down);
        assert_eq!(trend(71.0, 70.0, 2.0), Trend::Stable);
    }
}
