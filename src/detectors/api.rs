use chrono::Duration;
use regex::{Regex, RegexBuilder};

use crate::config::ApiPolicy;
use crate::core::error::TriageError;
use crate::core::types::{Alert, LogRecord, Signal, ThreatType, UserProfile};
use crate::detectors::{build_alert, newest_timestamp, Detector};

/// API abuse: request floods, enumeration, injection probes and admin-path access.
pub struct AbnormalApiDetector {
    policy: ApiPolicy,
    sql_patterns: Vec<Regex>,
    trailing_id: Regex,
}

impl AbnormalApiDetector {
    pub fn new(policy: ApiPolicy) -> Result<Self, TriageError> {
        let sql_patterns = policy
            .sql_injection_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| TriageError::Config(format!("sql pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let trailing_id = Regex::new(r"/(\d+)(?:\?|$)")
            .map_err(|e| TriageError::Config(e.to_string()))?;
        Ok(Self {
            policy,
            sql_patterns,
            trailing_id,
        })
    }

    fn rate_limit_violation(&self, logs: &[LogRecord]) -> Option<Signal> {
        let anchor = newest_timestamp(logs)?;
        let window = self.policy.request_rate_window_seconds;
        let cutoff = anchor.checked_sub_signed(Duration::try_seconds(window)?)?;
        let count = logs
            .iter()
            .filter(|l| l.timestamp().map_or(false, |ts| ts > cutoff))
            .count();
        if count <= self.policy.request_rate_threshold {
            return None;
        }
        Some(Signal::new(
            "rate_limit_violation",
            count,
            self.policy.weights.rate_limit_violation,
            format!(
                "{} requests in {}s (limit: {})",
                count, window, self.policy.request_rate_threshold
            ),
        ))
    }

    fn unusual_endpoint(&self, last: &LogRecord, profile: Option<&UserProfile>) -> Option<Signal> {
        let typical = profile?.typical_endpoints.as_ref()?;
        let endpoint = last.str_field("endpoint")?;
        if typical.iter().any(|e| e == endpoint) {
            return None;
        }
        Some(Signal::new(
            "unusual_endpoint",
            endpoint,
            self.policy.weights.unusual_endpoint,
            format!("Accessed {}, never accessed before", endpoint),
        ))
    }

    fn sequential_enumeration(&self, logs: &[LogRecord]) -> Option<Signal> {
        let lookback = self.policy.sequence_lookback;
        if logs.len() < lookback {
            return None;
        }
        let ids: Vec<u64> = logs[logs.len() - lookback..]
            .iter()
            .filter_map(|l| l.str_field("endpoint"))
            .filter_map(|e| self.trailing_id.captures(e))
            .filter_map(|c| c.get(1)?.as_str().parse().ok())
            .collect();
        if ids.len() < self.policy.sequence_min_ids {
            return None;
        }
        let consecutive = ids
            .windows(2)
            .all(|w| w[0].checked_add(1) == Some(w[1]));
        if !consecutive {
            return None;
        }
        let (&first, &last) = (ids.first()?, ids.last()?);
        Some(Signal::new(
            "sequential_enumeration",
            format!("{}-{}", first, last),
            self.policy.weights.sequential_enumeration,
            format!("Sequential ID access detected: {} ids from {} to {}", ids.len(), first, last),
        ))
    }

    fn sql_injection_attempt(&self, logs: &[LogRecord]) -> Option<Signal> {
        logs.iter()
            .filter_map(|l| l.str_field("params"))
            .find_map(|params| {
                self.sql_patterns
                    .iter()
                    .find(|re| re.is_match(params))
                    .map(|re| (params, re.as_str()))
            })
            .map(|(params, pattern)| {
                Signal::new(
                    "sql_injection_attempt",
                    params,
                    self.policy.weights.sql_injection_attempt,
                    format!("SQL injection pattern detected: {}", pattern),
                )
            })
    }

    fn privilege_escalation_attempt(
        &self,
        logs: &[LogRecord],
        profile: Option<&UserProfile>,
    ) -> Option<Signal> {
        let role = profile?.role.as_deref()?;
        if self.policy.admin_roles.iter().any(|r| r == role) {
            return None;
        }
        let hits = logs
            .iter()
            .filter_map(|l| l.str_field("endpoint"))
            .filter(|e| self.policy.admin_path_markers.iter().any(|m| e.contains(m.as_str())))
            .count();
        if hits == 0 {
            return None;
        }
        Some(Signal::new(
            "privilege_escalation_attempt",
            format!("{} admin endpoints", hits),
            self.policy.weights.privilege_escalation_attempt,
            format!("Role '{}' accessing admin endpoints", role),
        ))
    }
}

impl Detector for AbnormalApiDetector {
    fn name(&self) -> &'static str {
        "abnormal_api"
    }

    fn threat_type(&self) -> ThreatType {
        ThreatType::AbnormalApiUsage
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
            self.rate_limit_violation(logs),
            self.unusual_endpoint(last, profile),
            self.sequential_enumeration(logs),
            self.sql_injection_attempt(logs),
            self.privilege_escalation_attempt(logs, profile),
        ]
        .into_iter()
        .flatten()
        .collect();

        Ok(build_alert(
            ThreatType::AbnormalApiUsage,
            &self.policy.severity,
            signals,
            logs,
        ))
    }
}
