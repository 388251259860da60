use chrono::{Duration, Timelike};
use serde_json::json;

use crate::config::LoginPolicy;
use crate::core::error::TriageError;
use crate::core::types::{Alert, LogRecord, Signal, ThreatType, UserProfile};
use crate::detectors::{build_alert, newest_timestamp, Detector};

/// Account-takeover patterns in authentication logs.
pub struct SuspiciousLoginDetector {
    policy: LoginPolicy,
}

impl SuspiciousLoginDetector {
    pub fn new(policy: LoginPolicy) -> Self {
        Self { policy }
    }

    fn failed_login_burst(&self, logs: &[LogRecord]) -> Option<Signal> {
        let anchor = newest_timestamp(logs)?;
        let subject = logs.last().and_then(|l| l.str_field("user_id"));
        let window = Duration::try_minutes(self.policy.failed_login_window_minutes)?;
        let cutoff = anchor.checked_sub_signed(window)?;

        let count = logs
            .iter()
            .filter(|l| l.str_field("status") == Some(self.policy.failed_status.as_str()))
            .filter(|l| subject.is_none() || l.str_field("user_id") == subject)
            .filter(|l| l.timestamp().map_or(false, |ts| ts > cutoff))
            .count();

        if count < self.policy.failed_login_threshold {
            return None;
        }
        Some(Signal::new(
            "failed_login_burst",
            count,
            self.policy.weights.failed_login_burst,
            format!(
                "{} failed logins in {} minutes",
                count, self.policy.failed_login_window_minutes
            ),
        ))
    }

    fn anomalous_geography(&self, last: &LogRecord, profile: Option<&UserProfile>) -> Option<Signal> {
        let typical = profile?.typical_countries.as_ref()?;
        let country = last.str_field("country")?;
        if typical.iter().any(|c| c == country) {
            return None;
        }
        Some(Signal::new(
            "anomalous_geography",
            country,
            self.policy.weights.anomalous_geography,
            format!(
                "Login from {}, user typically in [{}]",
                country,
                typical.join(", ")
            ),
        ))
    }

    fn unusual_time(&self, last: &LogRecord, profile: Option<&UserProfile>) -> Option<Signal> {
        let range = profile?.typical_hours?;
        let hour = last.timestamp()?.hour();
        if range.contains(hour) {
            return None;
        }
        Some(Signal::new(
            "unusual_time",
            hour,
            self.policy.weights.unusual_time,
            format!(
                "Login at {:02}:00, user typically active {}-{}",
                hour, range.start, range.end
            ),
        ))
    }

    fn impossible_travel(&self, logs: &[LogRecord]) -> Option<Signal> {
        let [prev, curr] = logs.get(logs.len().checked_sub(2)?..)? else {
            return None;
        };
        let from = prev.str_field("country")?;
        let to = curr.str_field("country")?;
        if from == to {
            return None;
        }
        let delta = curr.timestamp()? - prev.timestamp()?;
        let elapsed = if delta < Duration::zero() { -delta } else { delta };
        let bound = Duration::try_minutes(self.policy.impossible_travel_minutes)?;
        if elapsed >= bound {
            return None;
        }
        let minutes = elapsed.num_minutes();
        Some(Signal::new(
            "impossible_travel",
            json!({ "from": from, "to": to, "minutes": minutes }),
            self.policy.weights.impossible_travel,
            format!("Traveled {} to {} in {} minutes", from, to, minutes),
        ))
    }

    fn bot_user_agent(&self, last: &LogRecord) -> Option<Signal> {
        let agent = last.str_field("user_agent")?;
        let lowered = agent.to_lowercase();
        self.policy
            .bot_user_agents
            .iter()
            .find(|bot| lowered.contains(&bot.to_lowercase()))
            .map(|_| {
                Signal::new(
                    "bot_user_agent",
                    agent,
                    self.policy.weights.bot_user_agent,
                    format!("Headless browser detected: {}", agent),
                )
            })
    }
}

impl Detector for SuspiciousLoginDetector {
    fn name(&self) -> &'static str {
        "suspicious_login"
    }

    fn threat_type(&self) -> ThreatType {
        ThreatType::SuspiciousLogin
    }

    fn detect(
        &self,
        logs: &[LogRecord],
        profile: Option<&UserProfile>,
    ) -> Result<Option<Alert>, TriageError> {
        let Some(last) = logs.last() else {
            return Ok(None);
        };

        let signals: Vec<Signal> = [
            self.failed_login_burst(logs),
            self.anomalous_geography(last, profile),
            self.unusual_time(last, profile),
            self.impossible_travel(logs),
            self.bot_user_agent(last),
        ]
        .into_iter()
        .flatten()
        .collect();

        Ok(build_alert(
            ThreatType::SuspiciousLogin,
            &self.policy.severity,
            signals,
            logs,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{HourRange, Severity};

    fn rec(v: serde_json::Value) -> LogRecord {
        LogRecord::from_value(v).unwrap()
    }

    fn detector() -> SuspiciousLoginDetector {
        SuspiciousLoginDetector::new(LoginPolicy::default())
    }

    #[test]
    fn burst_counts_only_the_newest_subject() {
        let mut logs: Vec<LogRecord> = (0..4)
            .map(|i| {
                rec(json!({"user_id": "other", "status": "failed",
                           "timestamp": format!("2024-03-01T10:0{}:00Z", i)}))
            })
            .collect();
        logs.extend((0..4).map(|i| {
            rec(json!({"user_id": "alice", "status": "failed",
                       "timestamp": format!("2024-03-01T10:0{}:30Z", i)}))
        }));
        assert!(detector().detect(&logs, None).unwrap().is_none());
    }

    #[test]
    fn failures_outside_window_are_ignored() {
        let mut logs: Vec<LogRecord> = (0..4)
            .map(|i| {
                rec(json!({"user_id": "alice", "status": "failed",
                           "timestamp": format!("2024-03-01T08:0{}:00Z", i)}))
            })
            .collect();
        logs.push(rec(json!({"user_id": "alice", "status": "failed",
                             "timestamp": "2024-03-01T10:00:00Z"})));
        assert!(detector().detect(&logs, None).unwrap().is_none());
    }

    #[test]
    fn unusual_time_reads_written_hour() {
        let profile = UserProfile {
            typical_hours: Some(HourRange { start: 9, end: 18 }),
            ..UserProfile::default()
        };
        let logs = vec![rec(json!({"user_id": "alice", "timestamp": "2024-03-01T03:00:00"}))];
        let alert = detector().detect(&logs, Some(&profile)).unwrap().unwrap();
        assert!(alert.has_signal("unusual_time"));
        assert_eq!(alert.confidence, 15);
        assert_eq!(alert.severity, Severity::Low);
    }

    #[test]
    fn missing_profile_keys_skip_checks() {
        let profile = UserProfile::default();
        let logs = vec![rec(json!({"user_id": "alice", "country": "RU",
                                   "timestamp": "2024-03-01T03:00:00Z"}))];
        assert!(detector().detect(&logs, Some(&profile)).unwrap().is_none());
    }

    #[test]
    fn bot_agent_match_is_case_insensitive() {
        let logs = vec![rec(json!({"user_agent": "Mozilla/5.0 headlesschrome/119"}))];
        let alert = detector().detect(&logs, None).unwrap().unwrap();
        assert!(alert.has_signal("bot_user_agent"));
    }
}
