//! Versioned triage policy: detection weights and thresholds, gate limits,
//! protected entities and synthesis rules. Loaded once at startup.

use std::collections::{BTreeMap, BTreeSet};
use std::{fs, path::Path};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::error::TriageError;
use crate::core::types::Severity;
use crate::detectors::privilege::IpNetwork;
use crate::response::action::ActionType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default = "default_policy_version")]
    pub policy_version: String,
    #[serde(default)]
    pub detection: DetectionPolicy,
    #[serde(default)]
    pub gate: GatePolicy,
    #[serde(default)]
    pub synthesis: SynthesisPolicy,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            policy_version: default_policy_version(),
            detection: DetectionPolicy::default(),
            gate: GatePolicy::default(),
            synthesis: SynthesisPolicy::default(),
        }
    }
}

impl TriageConfig {
    pub fn validate(&self) -> Result<(), TriageError> {
        if self.policy_version.trim().is_empty() {
            return Err(TriageError::Config("policy_version must not be empty".into()));
        }
        self.detection.validate()?;
        self.gate.validate()?;
        self.synthesis.validate()
    }
}

pub fn load_config(path: Option<&Path>) -> Result<TriageConfig, TriageError> {
    let default_path = Path::new("config/autotriage.toml");
    let path = path.unwrap_or(default_path);

    if !path.exists() {
        if path != default_path {
            return Err(TriageError::Config(format!(
                "policy file not found: {}",
                path.display()
            )));
        }
        return Ok(TriageConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| TriageError::Config(e.to_string()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<TriageConfig, TriageError> {
    let cfg: TriageConfig = toml::from_str(content)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Severity from confidence bands. Each bound is exclusive (`confidence > bound`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeverityBands {
    #[serde(default)]
    pub critical_above: Option<u8>,
    pub high_above: u8,
    pub medium_above: u8,
    #[serde(default = "default_floor")]
    pub floor: Severity,
}

/// Raises severity to at least `severity` when `signal` fired and, if set,
/// confidence exceeds `above`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeverityOverride {
    pub signal: String,
    #[serde(default)]
    pub above: Option<u8>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeverityPolicy {
    pub bands: SeverityBands,
    #[serde(default)]
    pub overrides: Vec<SeverityOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionPolicy {
    #[serde(default)]
    pub login: LoginPolicy,
    #[serde(default)]
    pub api: ApiPolicy,
    #[serde(default)]
    pub privilege: PrivilegePolicy,
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        Self {
            login: LoginPolicy::default(),
            api: ApiPolicy::default(),
            privilege: PrivilegePolicy::default(),
            max_concurrent_batches: default_max_concurrent_batches(),
        }
    }
}

impl DetectionPolicy {
    pub fn validate(&self) -> Result<(), TriageError> {
        if self.max_concurrent_batches == 0 {
            return Err(TriageError::Config(
                "detection.max_concurrent_batches must be > 0".into(),
            ));
        }
        let login = &self.login;
        if login.failed_login_threshold == 0 {
            return Err(TriageError::Config(
                "detection.login.failed_login_threshold must be > 0".into(),
            ));
        }
        check_window(
            "detection.login.failed_login_window_minutes",
            login.failed_login_window_minutes,
            MAX_WINDOW_MINUTES,
        )?;
        check_window(
            "detection.login.impossible_travel_minutes",
            login.impossible_travel_minutes,
            MAX_WINDOW_MINUTES,
        )?;
        check_weights(
            "detection.login.weights",
            &[
                login.weights.failed_login_burst,
                login.weights.anomalous_geography,
                login.weights.unusual_time,
                login.weights.impossible_travel,
                login.weights.bot_user_agent,
            ],
        )?;

        let api = &self.api;
        check_window(
            "detection.api.request_rate_window_seconds",
            api.request_rate_window_seconds,
            MAX_WINDOW_MINUTES * 60,
        )?;
        if api.sequence_min_ids < 2 || api.sequence_lookback < api.sequence_min_ids {
            return Err(TriageError::Config(
                "detection.api: need 2 <= sequence_min_ids <= sequence_lookback".into(),
            ));
        }
        for pat in &api.sql_injection_patterns {
            Regex::new(pat).map_err(|e| {
                TriageError::Config(format!("invalid sql_injection pattern '{}': {}", pat, e))
            })?;
        }
        check_weights(
            "detection.api.weights",
            &[
                api.weights.rate_limit_violation,
                api.weights.unusual_endpoint,
                api.weights.sequential_enumeration,
                api.weights.sql_injection_attempt,
                api.weights.privilege_escalation_attempt,
            ],
        )?;

        let privilege = &self.privilege;
        for net in &privilege.internal_networks {
            IpNetwork::parse(net).ok_or_else(|| {
                TriageError::Config(format!("invalid internal network '{}'", net))
            })?;
        }
        check_weights(
            "detection.privilege.weights",
            &[
                privilege.weights.unauthorized_role_change,
                privilege.weights.direct_permission_modification,
                privilege.weights.service_account_misuse,
                privilege.weights.unauthorized_admin_execution,
                privilege.weights.iam_privilege_expansion,
            ],
        )
    }
}

/// Upper bound for every detection window: one week.
const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;

/// Rollback ledger retention cap: 90 days.
const MAX_RETENTION_HOURS: i64 = 90 * 24;

fn check_window(key: &str, value: i64, max: i64) -> Result<(), TriageError> {
    if value <= 0 || value > max {
        return Err(TriageError::Config(format!(
            "{} must be within 1-{}, got {}",
            key, max, value
        )));
    }
    Ok(())
}

fn check_weights(section: &str, weights: &[u8]) -> Result<(), TriageError> {
    if weights.iter().any(|w| *w > 100) {
        return Err(TriageError::Config(format!(
            "{}: weights must be within 0-100",
            section
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginPolicy {
    #[serde(default = "default_failed_login_threshold")]
    pub failed_login_threshold: usize,
    #[serde(default = "default_failed_login_window_minutes")]
    pub failed_login_window_minutes: i64,
    #[serde(default = "default_failed_status")]
    pub failed_status: String,
    #[serde(default = "default_impossible_travel_minutes")]
    pub impossible_travel_minutes: i64,
    #[serde(default = "default_bot_user_agents")]
    pub bot_user_agents: Vec<String>,
    #[serde(default)]
    pub weights: LoginWeights,
    #[serde(default = "default_login_severity")]
    pub severity: SeverityPolicy,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            failed_login_threshold: default_failed_login_threshold(),
            failed_login_window_minutes: default_failed_login_window_minutes(),
            failed_status: default_failed_status(),
            impossible_travel_minutes: default_impossible_travel_minutes(),
            bot_user_agents: default_bot_user_agents(),
            weights: LoginWeights::default(),
            severity: default_login_severity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginWeights {
    pub failed_login_burst: u8,
    pub anomalous_geography: u8,
    pub unusual_time: u8,
    pub impossible_travel: u8,
    pub bot_user_agent: u8,
}

impl Default for LoginWeights {
    fn default() -> Self {
        Self {
            failed_login_burst: 30,
            anomalous_geography: 25,
            unusual_time: 15,
            impossible_travel: 35,
            bot_user_agent: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiPolicy {
    #[serde(default = "default_request_rate_threshold")]
    pub request_rate_threshold: usize,
    #[serde(default = "default_request_rate_window_seconds")]
    pub request_rate_window_seconds: i64,
    #[serde(default = "default_sequence_lookback")]
    pub sequence_lookback: usize,
    #[serde(default = "default_sequence_min_ids")]
    pub sequence_min_ids: usize,
    #[serde(default = "default_admin_path_markers")]
    pub admin_path_markers: Vec<String>,
    #[serde(default = "default_admin_roles")]
    pub admin_roles: Vec<String>,
    #[serde(default = "default_sql_injection_patterns")]
    pub sql_injection_patterns: Vec<String>,
    #[serde(default)]
    pub weights: ApiWeights,
    #[serde(default = "default_api_severity")]
    pub severity: SeverityPolicy,
}

impl Default for ApiPolicy {
    fn default() -> Self {
        Self {
            request_rate_threshold: default_request_rate_threshold(),
            request_rate_window_seconds: default_request_rate_window_seconds(),
            sequence_lookback: default_sequence_lookback(),
            sequence_min_ids: default_sequence_min_ids(),
            admin_path_markers: default_admin_path_markers(),
            admin_roles: default_admin_roles(),
            sql_injection_patterns: default_sql_injection_patterns(),
            weights: ApiWeights::default(),
            severity: default_api_severity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiWeights {
    pub rate_limit_violation: u8,
    pub unusual_endpoint: u8,
    pub sequential_enumeration: u8,
    pub sql_injection_attempt: u8,
    pub privilege_escalation_attempt: u8,
}

impl Default for ApiWeights {
    fn default() -> Self {
        Self {
            rate_limit_violation: 25,
            unusual_endpoint: 20,
            sequential_enumeration: 30,
            sql_injection_attempt: 40,
            privilege_escalation_attempt: 35,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivilegePolicy {
    #[serde(default = "default_privileged_roles")]
    pub privileged_roles: Vec<String>,
    #[serde(default = "default_service_account_prefix")]
    pub service_account_prefix: String,
    #[serde(default = "default_internal_networks")]
    pub internal_networks: Vec<String>,
    #[serde(default = "default_permission_actions")]
    pub permission_actions: Vec<String>,
    #[serde(default)]
    pub weights: PrivilegeWeights,
    #[serde(default = "default_privilege_severity")]
    pub severity: SeverityPolicy,
}

impl Default for PrivilegePolicy {
    fn default() -> Self {
        Self {
            privileged_roles: default_privileged_roles(),
            service_account_prefix: default_service_account_prefix(),
            internal_networks: default_internal_networks(),
            permission_actions: default_permission_actions(),
            weights: PrivilegeWeights::default(),
            severity: default_privilege_severity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegeWeights {
    pub unauthorized_role_change: u8,
    pub direct_permission_modification: u8,
    pub service_account_misuse: u8,
    pub unauthorized_admin_execution: u8,
    pub iam_privilege_expansion: u8,
}

impl Default for PrivilegeWeights {
    fn default() -> Self {
        Self {
            unauthorized_role_change: 40,
            direct_permission_modification: 35,
            service_account_misuse: 45,
            unauthorized_admin_execution: 40,
            iam_privilege_expansion: 35,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatePolicy {
    #[serde(default = "default_thresholds")]
    pub thresholds: BTreeMap<ActionType, u8>,
    #[serde(default = "default_max_per_hour")]
    pub max_actions_per_hour: usize,
    #[serde(default = "default_max_per_minute")]
    pub max_actions_per_minute: usize,
    /// How long executed actions stay eligible for rollback. Account locks
    /// are kept until unlocked.
    #[serde(default = "default_rollback_retention_hours")]
    pub rollback_retention_hours: i64,
    #[serde(default = "default_service_account_prefix")]
    pub service_account_prefix: String,
    #[serde(default = "default_protected_user_ids")]
    pub protected_user_ids: BTreeSet<String>,
    #[serde(default = "default_protected_service_accounts")]
    pub protected_service_accounts: BTreeSet<String>,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            max_actions_per_hour: default_max_per_hour(),
            max_actions_per_minute: default_max_per_minute(),
            rollback_retention_hours: default_rollback_retention_hours(),
            service_account_prefix: default_service_account_prefix(),
            protected_user_ids: default_protected_user_ids(),
            protected_service_accounts: default_protected_service_accounts(),
        }
    }
}

impl GatePolicy {
    /// Minimum confidence for automatic execution. The table is complete once
    /// validated; an absent entry reads as the strictest possible bar.
    pub fn threshold(&self, action_type: ActionType) -> u8 {
        self.thresholds.get(&action_type).copied().unwrap_or(100)
    }

    pub fn validate(&self) -> Result<(), TriageError> {
        let mut previous: Option<(ActionType, u8)> = None;
        for action_type in ActionType::ALL {
            let Some(value) = self.thresholds.get(&action_type).copied() else {
                return Err(TriageError::Config(format!(
                    "gate.thresholds is missing {}",
                    action_type.as_str()
                )));
            };
            if value > 100 {
                return Err(TriageError::Config(format!(
                    "gate.thresholds.{} must be within 0-100",
                    action_type.as_str()
                )));
            }
            if let Some((prev_type, prev_value)) = previous {
                if value <= prev_value {
                    return Err(TriageError::Config(format!(
                        "gate.thresholds must increase with action severity: {}={} is not above {}={}",
                        action_type.as_str(),
                        value,
                        prev_type.as_str(),
                        prev_value
                    )));
                }
            }
            previous = Some((action_type, value));
        }
        check_window(
            "gate.rollback_retention_hours",
            self.rollback_retention_hours,
            MAX_RETENTION_HOURS,
        )?;
        if self.max_actions_per_minute == 0 || self.max_actions_per_hour == 0 {
            return Err(TriageError::Config("gate rate limits must be > 0".into()));
        }
        if self.max_actions_per_minute > self.max_actions_per_hour {
            return Err(TriageError::Config(
                "gate.max_actions_per_minute cannot exceed max_actions_per_hour".into(),
            ));
        }
        Ok(())
    }
}

/// Maps a recommendation phrase to an action type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisRule {
    /// Case-insensitive substring of a recommended-action phrase.
    pub phrase: String,
    pub action: ActionType,
    #[serde(default)]
    pub min_score: u8,
    #[serde(default)]
    pub auto_expire_minutes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisPolicy {
    #[serde(default = "default_synthesis_rules")]
    pub rules: Vec<SynthesisRule>,
    #[serde(default = "default_service_account_prefix")]
    pub service_account_prefix: String,
}

impl Default for SynthesisPolicy {
    fn default() -> Self {
        Self {
            rules: default_synthesis_rules(),
            service_account_prefix: default_service_account_prefix(),
        }
    }
}

impl SynthesisPolicy {
    pub fn validate(&self) -> Result<(), TriageError> {
        for rule in &self.rules {
            if rule.phrase.trim().is_empty() {
                return Err(TriageError::Config("synthesis rule phrase is empty".into()));
            }
            if rule.action == ActionType::LockAccount && rule.auto_expire_minutes.is_some() {
                return Err(TriageError::Config(
                    "lock_account cannot auto-expire; it requires a manual unlock".into(),
                ));
            }
        }
        Ok(())
    }
}

fn default_policy_version() -> String {
    "2024.1".to_string()
}

fn default_floor() -> Severity {
    Severity::Low
}

fn default_max_concurrent_batches() -> usize {
    4
}

fn default_failed_login_threshold() -> usize {
    5
}

fn default_failed_login_window_minutes() -> i64 {
    10
}

fn default_failed_status() -> String {
    "failed".to_string()
}

fn default_impossible_travel_minutes() -> i64 {
    120
}

fn default_bot_user_agents() -> Vec<String> {
    vec![
        "HeadlessChrome".to_string(),
        "PhantomJS".to_string(),
        "Selenium".to_string(),
    ]
}

fn default_login_severity() -> SeverityPolicy {
    SeverityPolicy {
        bands: SeverityBands {
            critical_above: None,
            high_above: 70,
            medium_above: 40,
            floor: Severity::Low,
        },
        overrides: vec![
            SeverityOverride {
                signal: "impossible_travel".to_string(),
                above: Some(60),
                severity: Severity::Critical,
            },
            SeverityOverride {
                signal: "impossible_travel".to_string(),
                above: None,
                severity: Severity::High,
            },
        ],
    }
}

fn default_request_rate_threshold() -> usize {
    100
}

fn default_request_rate_window_seconds() -> i64 {
    60
}

fn default_sequence_lookback() -> usize {
    10
}

fn default_sequence_min_ids() -> usize {
    5
}

fn default_admin_path_markers() -> Vec<String> {
    vec!["/admin".to_string(), "/internal".to_string()]
}

fn default_admin_roles() -> Vec<String> {
    vec!["admin".to_string()]
}

fn default_sql_injection_patterns() -> Vec<String> {
    vec![
        r"\bunion\b.*\bselect\b".to_string(),
        r";\s*drop\s+table".to_string(),
        r"\b1'?\s*=\s*'?1\b".to_string(),
        r"(--|#|/\*)".to_string(),
    ]
}

fn default_api_severity() -> SeverityPolicy {
    SeverityPolicy {
        bands: SeverityBands {
            critical_above: None,
            high_above: 70,
            medium_above: 40,
            floor: Severity::Low,
        },
        overrides: vec![
            SeverityOverride {
                signal: "sql_injection_attempt".to_string(),
                above: None,
                severity: Severity::Critical,
            },
            SeverityOverride {
                signal: "privilege_escalation_attempt".to_string(),
                above: None,
                severity: Severity::Critical,
            },
        ],
    }
}

fn default_privileged_roles() -> Vec<String> {
    vec!["admin".to_string(), "sre".to_string()]
}

fn default_service_account_prefix() -> String {
    "svc-".to_string()
}

fn default_internal_networks() -> Vec<String> {
    vec!["10.0.0.0/8".to_string(), "172.16.0.0/12".to_string()]
}

fn default_permission_actions() -> Vec<String> {
    vec!["grant_permission".to_string(), "modify_acl".to_string()]
}

fn default_privilege_severity() -> SeverityPolicy {
    SeverityPolicy {
        bands: SeverityBands {
            critical_above: Some(70),
            high_above: 40,
            medium_above: 0,
            floor: Severity::Medium,
        },
        overrides: vec![],
    }
}

fn default_thresholds() -> BTreeMap<ActionType, u8> {
    BTreeMap::from([
        (ActionType::LogOnly, 0),
        (ActionType::RateLimit, 70),
        (ActionType::RequireMfa, 80),
        (ActionType::RevokeSession, 85),
        (ActionType::BlockIp, 90),
        (ActionType::LockAccount, 95),
        (ActionType::RevokeApiKey, 97),
        (ActionType::DisableServiceAccount, 99),
    ])
}

fn default_max_per_hour() -> usize {
    100
}

fn default_max_per_minute() -> usize {
    10
}

fn default_rollback_retention_hours() -> i64 {
    168
}

fn default_protected_user_ids() -> BTreeSet<String> {
    ["exec-001", "exec-002", "on-call-001"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_protected_service_accounts() -> BTreeSet<String> {
    ["svc-payments", "svc-critical-infra"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_synthesis_rules() -> Vec<SynthesisRule> {
    vec![
        SynthesisRule {
            phrase: "block ip address".to_string(),
            action: ActionType::BlockIp,
            min_score: 90,
            auto_expire_minutes: Some(60),
        },
        SynthesisRule {
            phrase: "lock affected account".to_string(),
            action: ActionType::LockAccount,
            min_score: 95,
            auto_expire_minutes: None,
        },
        SynthesisRule {
            phrase: "revoke all active sessions".to_string(),
            action: ActionType::RevokeSession,
            min_score: 85,
            auto_expire_minutes: None,
        },
        SynthesisRule {
            phrase: "rate limit ip address".to_string(),
            action: ActionType::RateLimit,
            min_score: 0,
            auto_expire_minutes: Some(120),
        },
        SynthesisRule {
            phrase: "require mfa".to_string(),
            action: ActionType::RequireMfa,
            min_score: 0,
            auto_expire_minutes: None,
        },
    ]
}
