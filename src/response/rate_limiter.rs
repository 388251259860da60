use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::response::action::ActionType;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    pub action_id: String,
    pub timestamp: DateTime<Utc>,
    pub action_type: ActionType,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitExceeded {
    Hourly { count: usize, limit: usize },
    PerMinute { count: usize, limit: usize },
}

impl fmt::Display for RateLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitExceeded::Hourly { count, limit } => {
                write!(f, "{}/{} actions in the last hour", count, limit)
            }
            RateLimitExceeded::PerMinute { count, limit } => {
                write!(f, "{}/{} actions in the last minute", count, limit)
            }
        }
    }
}

/// Rolling one-hour buffer of executed actions with an hourly and a
/// per-minute ceiling. Not synchronized; the executor owns it behind its lock.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    records: VecDeque<ActionRecord>,
    per_hour: usize,
    per_minute: usize,
}

impl SlidingWindowLimiter {
    pub fn new(per_hour: usize, per_minute: usize) -> Self {
        Self {
            records: VecDeque::new(),
            per_hour,
            per_minute,
        }
    }

    /// Drops records older than one hour.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(1);
        self.records.retain(|r| r.timestamp > cutoff);
    }

    pub fn check(&self, now: DateTime<Utc>) -> Result<(), RateLimitExceeded> {
        let hourly = self.records.len();
        if hourly >= self.per_hour {
            return Err(RateLimitExceeded::Hourly {
                count: hourly,
                limit: self.per_hour,
            });
        }
        let minute_cutoff = now - Duration::minutes(1);
        let per_minute = self
            .records
            .iter()
            .filter(|r| r.timestamp > minute_cutoff)
            .count();
        if per_minute >= self.per_minute {
            return Err(RateLimitExceeded::PerMinute {
                count: per_minute,
                limit: self.per_minute,
            });
        }
        Ok(())
    }

    pub fn record(&mut self, record: ActionRecord) {
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: usize, at: DateTime<Utc>) -> ActionRecord {
        ActionRecord {
            action_id: format!("ACT-{}", id),
            timestamp: at,
            action_type: ActionType::LogOnly,
            target: "-".to_string(),
        }
    }

    #[test]
    fn per_minute_ceiling_then_recovery() {
        let start = Utc::now();
        let mut limiter = SlidingWindowLimiter::new(100, 3);
        for i in 0..3 {
            assert!(limiter.check(start).is_ok());
            limiter.record(rec(i, start));
        }
        assert_eq!(
            limiter.check(start),
            Err(RateLimitExceeded::PerMinute { count: 3, limit: 3 })
        );
        let later = start + Duration::seconds(61);
        limiter.prune(later);
        assert!(limiter.check(later).is_ok());
        assert_eq!(limiter.len(), 3);
    }

    #[test]
    fn hourly_ceiling_and_prune() {
        let start = Utc::now();
        let mut limiter = SlidingWindowLimiter::new(5, 5);
        for i in 0..5 {
            limiter.record(rec(i, start + Duration::minutes(i as i64 * 2)));
        }
        let now = start + Duration::minutes(10);
        assert!(matches!(
            limiter.check(now),
            Err(RateLimitExceeded::Hourly { count: 5, .. })
        ));
        let after_hour = start + Duration::minutes(63);
        limiter.prune(after_hour);
        assert_eq!(limiter.len(), 3);
        assert!(limiter.check(after_hour).is_ok());
    }
}
