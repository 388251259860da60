use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::core::time::parse_timestamp;

/// Category of threat an alert describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    SuspiciousLogin,
    AbnormalApiUsage,
    PrivilegeEscalation,
}

impl ThreatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::SuspiciousLogin => "suspicious_login",
            ThreatType::AbnormalApiUsage => "abnormal_api_usage",
            ThreatType::PrivilegeEscalation => "privilege_escalation",
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            ThreatType::SuspiciousLogin => "LOGIN",
            ThreatType::AbnormalApiUsage => "API",
            ThreatType::PrivilegeEscalation => "PRIV",
        }
    }
}

/// Severity mapped for SOC consumption, ordered Low < Critical.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One named, weighted piece of evidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub name: String,
    pub value: Value,
    /// Contribution to alert confidence, 0-100.
    pub weight: u8,
    pub description: String,
}

impl Signal {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<Value>,
        weight: u8,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            weight: weight.min(100),
            description: description.into(),
        }
    }
}

/// Scored, signal-backed hypothesis that a threat is occurring.
///
/// Built only through [`Alert::from_signals`], which refuses an empty signal
/// list and derives `confidence` from the weights.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub threat_type: ThreatType,
    pub severity: Severity,
    pub confidence: u8,
    pub signals: Vec<Signal>,
    pub affected_entities: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub raw_logs: Vec<LogRecord>,
}

impl Alert {
    /// Returns `None` when `signals` is empty.
    pub fn from_signals(
        id: String,
        threat_type: ThreatType,
        severity: Severity,
        signals: Vec<Signal>,
        affected_entities: BTreeMap<String, String>,
        timestamp: DateTime<Utc>,
        raw_logs: Vec<LogRecord>,
    ) -> Option<Self> {
        if signals.is_empty() {
            return None;
        }
        let confidence = confidence_of(&signals);
        Some(Self {
            id,
            threat_type,
            severity,
            confidence,
            signals,
            affected_entities,
            timestamp,
            raw_logs,
        })
    }

    pub fn has_signal(&self, name: &str) -> bool {
        self.signals.iter().any(|s| s.name == name)
    }

    pub fn entity(&self, key: &str) -> Option<&str> {
        self.affected_entities.get(key).map(|s| s.as_str())
    }
}

/// `min(100, sum(weight))`.
pub fn confidence_of(signals: &[Signal]) -> u8 {
    let total: u32 = signals.iter().map(|s| s.weight as u32).sum();
    total.min(100) as u8
}

/// One raw activity record. Field presence depends on the log source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct LogRecord(pub Map<String, Value>);

impl LogRecord {
    /// Accepts only JSON objects.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Non-empty string field.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.str_field("timestamp").and_then(parse_timestamp)
    }
}

impl From<Map<String, Value>> for LogRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Half-open hour-of-day range `[start, end)`; wraps midnight when `start > end`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

impl HourRange {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Behavioral baseline for the subject of a log batch. Every field is
/// optional; a missing field disables the rule that reads it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    #[serde(default, deserialize_with = "lenient")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub typical_countries: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub typical_hours: Option<HourRange>,
    #[serde(default, deserialize_with = "lenient")]
    pub typical_endpoints: Option<Vec<String>>,
}

/// A profile value of the wrong shape is dropped instead of failing the batch.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => {
            tracing::warn!("ignoring malformed profile field: {}", err);
            Ok(None)
        }
    }
}

/// Logs plus the optional profile they are evaluated against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogBatch {
    #[serde(default)]
    pub logs: Vec<LogRecord>,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}
