//! Metric record types and the wire payloads they arrive in.
//!
//! Records are created by the remote store and reach the client either in a
//! bulk page or inside a change notification. Wire payloads are lenient about
//! field encoding; validation turns them into the strict types the sync
//! window works with.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of the user that owns a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque record identifier assigned by the store; the merge key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh UUID v4 identifier, the way the store does on insert.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One health telemetry reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: RecordId,
    pub user_id: UserId,
    /// Beats per minute
    pub heart_rate: i32,
    /// Blood oxygen saturation, percent
    pub blood_oxygen: i32,
    /// Body temperature, degrees Celsius
    pub temperature: f64,
    /// Activity level, percent
    pub activity_level: i32,
    /// Logical ordering key
    pub timestamp: DateTime<Utc>,
    /// Caller-interpreted anomaly flag
    pub anomaly: bool,
}

impl MetricRecord {
    /// Basic shape validation for records that arrive already typed.
    pub fn validate(&self) -> Result<(), MalformedPayload> {
        if self.id.as_str().trim().is_empty() {
            return Err(MalformedPayload::missing("id"));
        }
        if self.user_id.as_str().trim().is_empty() {
            return Err(MalformedPayload::missing("user_id"));
        }
        if !self.temperature.is_finite() {
            return Err(MalformedPayload::new("temperature is not a finite number"));
        }
        Ok(())
    }

    /// Read one numeric field as `f64`.
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::HeartRate => self.heart_rate as f64,
            Metric::BloodOxygen => self.blood_oxygen as f64,
            Metric::Temperature => self.temperature,
            Metric::ActivityLevel => self.activity_level as f64,
        }
    }
}

/// A reading to be stored; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub user_id: UserId,
    pub heart_rate: i32,
    pub blood_oxygen: i32,
    pub temperature: f64,
    pub activity_level: i32,
    pub timestamp: DateTime<Utc>,
    pub anomaly: bool,
}

impl NewRecord {
    /// Attach a store-assigned id.
    pub fn with_id(self, id: RecordId) -> MetricRecord {
        MetricRecord {
            id,
            user_id: self.user_id,
            heart_rate: self.heart_rate,
            blood_oxygen: self.blood_oxygen,
            temperature: self.temperature,
            activity_level: self.activity_level,
            timestamp: self.timestamp,
            anomaly: self.anomaly,
        }
    }
}

/// The numeric fields of a [`MetricRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HeartRate,
    BloodOxygen,
    Temperature,
    ActivityLevel,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::HeartRate,
        Metric::BloodOxygen,
        Metric::Temperature,
        Metric::ActivityLevel,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Metric::HeartRate => "Heart Rate",
            Metric::BloodOxygen => "Blood Oxygen",
            Metric::Temperature => "Temperature",
            Metric::ActivityLevel => "Activity Level",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::HeartRate => "bpm",
            Metric::BloodOxygen => "%",
            Metric::Temperature => "°C",
            Metric::ActivityLevel => "%",
        }
    }
}

/// Kind of change reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// A validated change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(MetricRecord),
    Update(MetricRecord),
    /// Deletes only carry the key; the owner is present when the store sends it.
    Delete {
        id: RecordId,
        user_id: Option<UserId>,
    },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    pub fn record_id(&self) -> &RecordId {
        match self {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) => &r.id,
            ChangeEvent::Delete { id, .. } => id,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) => Some(&r.user_id),
            ChangeEvent::Delete { user_id, .. } => user_id.as_ref(),
        }
    }
}

/// A payload that failed shape validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedPayload {
    pub reason: String,
}

impl MalformedPayload {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn missing(field: &str) -> Self {
        Self::new(format!("missing field `{field}`"))
    }

    fn invalid(field: &str, value: &Value) -> Self {
        Self::new(format!("invalid value for `{field}`: {value}"))
    }
}

impl fmt::Display for MalformedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed payload: {}", self.reason)
    }
}

impl std::error::Error for MalformedPayload {}

/// A record row as the store sends it.
///
/// Every field is optional. Numeric columns may arrive as numbers or as
/// numeric strings, and `anomaly` may arrive as a bool or as `"true"`/`"false"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub heart_rate: Option<Value>,
    pub blood_oxygen: Option<Value>,
    pub temperature: Option<Value>,
    pub activity_level: Option<Value>,
    pub timestamp: Option<String>,
    pub anomaly: Option<Value>,
}

impl RawRecord {
    /// Validate and convert into a [`MetricRecord`].
    pub fn into_record(self) -> Result<MetricRecord, MalformedPayload> {
        let id = non_empty(self.id, "id")?;
        let user_id = non_empty(self.user_id, "user_id")?;
        let timestamp = parse_timestamp(self.timestamp.as_deref())?;

        Ok(MetricRecord {
            id: RecordId(id),
            user_id: UserId(user_id),
            heart_rate: int_field(self.heart_rate.as_ref(), "heart_rate")?,
            blood_oxygen: int_field(self.blood_oxygen.as_ref(), "blood_oxygen")?,
            temperature: float_field(self.temperature.as_ref(), "temperature")?,
            activity_level: int_field(self.activity_level.as_ref(), "activity_level")?,
            timestamp,
            anomaly: bool_field(self.anomaly.as_ref(), "anomaly")?,
        })
    }
}

impl From<&MetricRecord> for RawRecord {
    fn from(record: &MetricRecord) -> Self {
        Self {
            id: Some(record.id.to_string()),
            user_id: Some(record.user_id.to_string()),
            heart_rate: Some(Value::from(record.heart_rate)),
            blood_oxygen: Some(Value::from(record.blood_oxygen)),
            temperature: Some(Value::from(record.temperature)),
            activity_level: Some(Value::from(record.activity_level)),
            timestamp: Some(record.timestamp.to_rfc3339()),
            anomaly: Some(Value::Bool(record.anomaly)),
        }
    }
}

/// A change notification as the realtime channel delivers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangeEvent {
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// Row after the change (insert and update)
    #[serde(default)]
    pub new: Option<RawRecord>,
    /// Row before the change; at least the key for deletes
    #[serde(default)]
    pub old: Option<RawRecord>,
}

impl RawChangeEvent {
    pub fn insert(record: &MetricRecord) -> Self {
        Self {
            event_type: ChangeKind::Insert.as_str().to_string(),
            new: Some(record.into()),
            old: None,
        }
    }

    pub fn update(record: &MetricRecord) -> Self {
        Self {
            event_type: ChangeKind::Update.as_str().to_string(),
            new: Some(record.into()),
            old: None,
        }
    }

    pub fn delete(id: &RecordId, user_id: Option<&UserId>) -> Self {
        Self {
            event_type: ChangeKind::Delete.as_str().to_string(),
            new: None,
            old: Some(RawRecord {
                id: Some(id.to_string()),
                user_id: user_id.map(|u| u.to_string()),
                ..RawRecord::default()
            }),
        }
    }
}

impl From<&ChangeEvent> for RawChangeEvent {
    fn from(event: &ChangeEvent) -> Self {
        match event {
            ChangeEvent::Insert(r) => Self::insert(r),
            ChangeEvent::Update(r) => Self::update(r),
            ChangeEvent::Delete { id, user_id } => Self::delete(id, user_id.as_ref()),
        }
    }
}

impl TryFrom<RawChangeEvent> for ChangeEvent {
    type Error = MalformedPayload;

    fn try_from(raw: RawChangeEvent) -> Result<Self, Self::Error> {
        match raw.event_type.trim().to_ascii_uppercase().as_str() {
            "INSERT" => {
                let row = raw.new.ok_or_else(|| MalformedPayload::missing("new"))?;
                Ok(ChangeEvent::Insert(row.into_record()?))
            }
            "UPDATE" => {
                let row = raw.new.ok_or_else(|| MalformedPayload::missing("new"))?;
                Ok(ChangeEvent::Update(row.into_record()?))
            }
            "DELETE" => {
                let row = raw.old.ok_or_else(|| MalformedPayload::missing("old"))?;
                let id = non_empty(row.id, "id")?;
                let user_id = row
                    .user_id
                    .filter(|u| !u.trim().is_empty())
                    .map(UserId);
                Ok(ChangeEvent::Delete {
                    id: RecordId(id),
                    user_id,
                })
            }
            other => Err(MalformedPayload::new(format!(
                "unknown event type `{other}`"
            ))),
        }
    }
}

fn non_empty(value: Option<String>, field: &str) -> Result<String, MalformedPayload> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(MalformedPayload::missing(field)),
    }
}

fn parse_timestamp(value: Option<&str>) -> Result<DateTime<Utc>, MalformedPayload> {
    let raw = value.ok_or_else(|| MalformedPayload::missing("timestamp"))?;

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    // Columns without a zone are stored as UTC
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|_| MalformedPayload::new(format!("unparseable timestamp `{raw}`")))
}

fn int_field(value: Option<&Value>, field: &str) -> Result<i32, MalformedPayload> {
    let value = value.ok_or_else(|| MalformedPayload::missing(field))?;
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| MalformedPayload::invalid(field, value))
}

fn float_field(value: Option<&Value>, field: &str) -> Result<f64, MalformedPayload> {
    let value = value.ok_or_else(|| MalformedPayload::missing(field))?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed
        .filter(|f| f.is_finite())
        .ok_or_else(|| MalformedPayload::invalid(field, value))
}

fn bool_field(value: Option<&Value>, field: &str) -> Result<bool, MalformedPayload> {
    let Some(value) = value else {
        return Ok(false);
    };

    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(MalformedPayload::invalid(field, value)),
    }
}
