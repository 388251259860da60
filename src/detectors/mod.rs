//! Rule-based detectors. Each one is pure: the same batch and profile always
//! give the same answer, and a batch with no triggered rule gives `None`.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};

use crate::config::SeverityPolicy;
use crate::core::error::TriageError;
use crate::core::hash::stable_alert_id;
use crate::core::time::now_utc;
use crate::core::types::{confidence_of, Alert, LogRecord, Severity, Signal, ThreatType, UserProfile};

pub mod api;
pub mod login;
pub mod privilege;

pub use api::AbnormalApiDetector;
pub use login::SuspiciousLoginDetector;
pub use privilege::PrivilegeEscalationDetector;

pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;
    fn threat_type(&self) -> ThreatType;
    fn detect(
        &self,
        logs: &[LogRecord],
        profile: Option<&UserProfile>,
    ) -> Result<Option<Alert>, TriageError>;
}

/// Record fields copied from the newest log into `affected_entities`.
const ENTITY_FIELDS: [&str; 6] = ["user_id", "ip", "country", "endpoint", "target_user", "api_key_id"];

impl SeverityPolicy {
    pub fn classify(&self, confidence: u8, signals: &[Signal]) -> Severity {
        let bands = &self.bands;
        let mut severity = if bands.critical_above.map_or(false, |c| confidence > c) {
            Severity::Critical
        } else if confidence > bands.high_above {
            Severity::High
        } else if confidence > bands.medium_above {
            Severity::Medium
        } else {
            Severity::Low
        };
        severity = severity.max(bands.floor);

        for rule in &self.overrides {
            let fired = signals.iter().any(|s| s.name == rule.signal);
            if fired && rule.above.map_or(true, |above| confidence > above) {
                severity = severity.max(rule.severity);
            }
        }
        severity
    }
}

/// Newest parseable timestamp in the batch. Trailing windows are anchored here.
pub(crate) fn newest_timestamp(logs: &[LogRecord]) -> Option<DateTime<FixedOffset>> {
    logs.iter().filter_map(LogRecord::timestamp).max()
}

pub(crate) fn build_alert(
    threat_type: ThreatType,
    severity: &SeverityPolicy,
    signals: Vec<Signal>,
    logs: &[LogRecord],
) -> Option<Alert> {
    if signals.is_empty() {
        return None;
    }
    let confidence = confidence_of(&signals);
    let level = severity.classify(confidence, &signals);

    let mut entities = BTreeMap::new();
    if let Some(last) = logs.last() {
        for field in ENTITY_FIELDS {
            if let Some(value) = last.str_field(field) {
                entities.insert(field.to_string(), value.to_string());
            }
        }
    }

    let timestamp = newest_timestamp(logs)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(now_utc);
    let id = stable_alert_id(threat_type, &signals, logs);

    Alert::from_signals(
        id,
        threat_type,
        level,
        signals,
        entities,
        timestamp,
        logs.to_vec(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SeverityBands, SeverityOverride};

    fn policy() -> SeverityPolicy {
        SeverityPolicy {
            bands: SeverityBands {
                critical_above: None,
                high_above: 70,
                medium_above: 40,
                floor: Severity::Low,
            },
            overrides: vec![SeverityOverride {
                signal: "boom".to_string(),
                above: Some(60),
                severity: Severity::Critical,
            }],
        }
    }

    #[test]
    fn bands_are_exclusive() {
        let p = policy();
        assert_eq!(p.classify(40, &[]), Severity::Low);
        assert_eq!(p.classify(41, &[]), Severity::Medium);
        assert_eq!(p.classify(70, &[]), Severity::Medium);
        assert_eq!(p.classify(71, &[]), Severity::High);
    }

    #[test]
    fn override_needs_signal_and_confidence() {
        let p = policy();
        let boom = vec![Signal::new("boom", 1, 61, "x")];
        assert_eq!(p.classify(61, &boom), Severity::Critical);
        assert_eq!(p.classify(60, &boom), Severity::Medium);
        assert_eq!(p.classify(90, &[]), Severity::High);
    }

    #[test]
    fn no_signals_no_alert() {
        assert!(build_alert(ThreatType::SuspiciousLogin, &policy(), vec![], &[]).is_none());
    }
}
