use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remediation kinds, declared in increasing order of severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    LogOnly,
    RateLimit,
    RequireMfa,
    RevokeSession,
    BlockIp,
    LockAccount,
    RevokeApiKey,
    DisableServiceAccount,
}

impl ActionType {
    pub const ALL: [ActionType; 8] = [
        ActionType::LogOnly,
        ActionType::RateLimit,
        ActionType::RequireMfa,
        ActionType::RevokeSession,
        ActionType::BlockIp,
        ActionType::LockAccount,
        ActionType::RevokeApiKey,
        ActionType::DisableServiceAccount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::LogOnly => "log_only",
            ActionType::RateLimit => "rate_limit",
            ActionType::RequireMfa => "require_mfa",
            ActionType::RevokeSession => "revoke_session",
            ActionType::BlockIp => "block_ip",
            ActionType::LockAccount => "lock_account",
            ActionType::RevokeApiKey => "revoke_api_key",
            ActionType::DisableServiceAccount => "disable_service_account",
        }
    }

    /// Everything but an account lock can be rolled back; a lock needs a manual unlock.
    pub fn is_reversible(&self) -> bool {
        *self != ActionType::LockAccount
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlastRadius {
    SingleUser,
    Team,
    Service,
    Organization,
}

/// A proposed remediation. Built once per alert and never mutated; a retry
/// gets a fresh action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub id: String,
    pub action_type: ActionType,
    pub target: BTreeMap<String, String>,
    /// Carried from the assessment, not recomputed.
    pub confidence: u8,
    pub blast_radius: BlastRadius,
    pub reversible: bool,
    #[serde(default)]
    pub auto_expire: Option<Duration>,
    pub justification: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Action {
    pub fn target_field(&self, key: &str) -> Option<&str> {
        self.target
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Approved,
    Rejected,
    Escalated,
    Executed,
    RolledBack,
    Failed,
}

/// Append-only audit record of one gate decision or human decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub action_id: String,
    pub status: ExecutionStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub reason: String,
    #[serde(default)]
    pub analyst_id: Option<String>,
    #[serde(default)]
    pub rollback_by: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    pub fn new(action_id: &str, status: ExecutionStatus, reason: impl Into<String>) -> Self {
        Self {
            action_id: action_id.to_string(),
            status,
            executed_at: None,
            reason: reason.into(),
            analyst_id: None,
            rollback_by: None,
        }
    }

    pub fn at(mut self, when: DateTime<Utc>) -> Self {
        self.executed_at = Some(when);
        self
    }

    pub fn by(mut self, analyst_id: &str) -> Self {
        self.analyst_id = Some(analyst_id.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaration_order_is_severity_order() {
        let mut sorted = ActionType::ALL;
        sorted.sort();
        assert_eq!(sorted, ActionType::ALL);
        assert!(ActionType::LogOnly < ActionType::DisableServiceAccount);
    }

    #[test]
    fn wire_names_match_as_str() {
        for t in ActionType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert!(!ActionType::LockAccount.is_reversible());
        assert!(ActionType::BlockIp.is_reversible());
    }
}
