//! Risk assessment boundary. The reasoning step that scores an alert is an
//! outside collaborator; this module validates whatever it returns and
//! provides a deterministic fallback.

use serde::{Deserialize, Serialize};

use crate::core::error::TriageError;
use crate::core::types::{Alert, ThreatType};

pub const KNOWN_ATTACK_PATTERNS: [&str; 11] = [
    "credential_stuffing",
    "brute_force",
    "account_takeover",
    "data_exfiltration",
    "api_abuse",
    "privilege_escalation",
    "sql_injection",
    "command_injection",
    "lateral_movement",
    "reconnaissance",
    "unknown",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => RiskLevel::Critical,
            60..=79 => RiskLevel::High,
            40..=59 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Likelihood {
    Low,
    Medium,
    High,
}

impl Likelihood {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("low") => Likelihood::Low,
            Some("high") => Likelihood::High,
            _ => Likelihood::Medium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub attack_pattern: String,
    pub reasoning: String,
    pub false_positive_likelihood: Likelihood,
    pub missing_context: Vec<String>,
    pub recommended_actions: Vec<String>,
}

/// Shape of a reasoning step's JSON answer. Everything is optional; gaps get
/// conservative defaults.
#[derive(Debug, Deserialize)]
struct ModelAnswer {
    #[serde(default)]
    risk_score: Option<f64>,
    #[serde(default)]
    attack_pattern: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    false_positive_likelihood: Option<String>,
    #[serde(default)]
    missing_context: Vec<String>,
}

impl RiskAssessment {
    fn build(
        risk_score: u8,
        attack_pattern: String,
        reasoning: String,
        false_positive_likelihood: Likelihood,
        missing_context: Vec<String>,
    ) -> Self {
        let recommended_actions =
            recommendations(risk_score, &attack_pattern, false_positive_likelihood);
        Self {
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            attack_pattern,
            reasoning,
            false_positive_likelihood,
            missing_context,
            recommended_actions,
        }
    }

    /// Deterministic assessment from the alert alone.
    pub fn heuristic(alert: &Alert) -> Self {
        let pattern = match alert.threat_type {
            ThreatType::SuspiciousLogin => "credential_stuffing",
            ThreatType::AbnormalApiUsage => "api_abuse",
            ThreatType::PrivilegeEscalation => "privilege_escalation",
        };
        let described: Vec<&str> = alert
            .signals
            .iter()
            .take(2)
            .map(|s| s.description.as_str())
            .collect();
        let reasoning = format!(
            "Detected {} suspicious signals: {}",
            alert.signals.len(),
            described.join("; ")
        );
        Self::build(
            alert.confidence,
            pattern.to_string(),
            reasoning,
            Likelihood::Medium,
            vec!["Additional context needed for definitive assessment".to_string()],
        )
    }

    /// Validates a reasoning step's raw JSON answer against the alert it
    /// describes. Unparseable output falls back to [`RiskAssessment::heuristic`].
    pub fn from_model_output(raw: &str, alert: &Alert) -> Self {
        let answer: ModelAnswer = match serde_json::from_str(raw.trim()) {
            Ok(answer) => answer,
            Err(err) => {
                tracing::warn!("{}: unusable assessment output ({}), using heuristic", alert.id, err);
                return Self::heuristic(alert);
            }
        };

        let raw_score = answer.risk_score.unwrap_or(50.0);
        let mut score = if raw_score.is_finite() {
            raw_score.round().clamp(0.0, 100.0) as u8
        } else {
            50
        };
        // Never trust a score far above what the evidence supports.
        if score as u16 > alert.confidence as u16 + 10 {
            score = alert.confidence;
        }

        let pattern = answer
            .attack_pattern
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| KNOWN_ATTACK_PATTERNS.contains(&p.as_str()))
            .unwrap_or_else(|| "unknown".to_string());

        let mut reasoning = answer.reasoning.unwrap_or_default();
        let lowered = reasoning.to_lowercase();
        let grounded = alert.signals.iter().any(|s| lowered.contains(&s.name));
        if !grounded {
            if let Some(first) = alert.signals.first() {
                reasoning = format!("Based on {}: {}", first.name, reasoning);
            }
        }

        Self::build(
            score,
            pattern,
            reasoning,
            Likelihood::parse(answer.false_positive_likelihood.as_deref()),
            answer.missing_context,
        )
    }
}

pub fn recommendations(score: u8, attack_pattern: &str, likelihood: Likelihood) -> Vec<String> {
    let mut out: Vec<&str> = Vec::new();
    if score >= 80 {
        out.push("Block IP address immediately");
        match attack_pattern {
            "credential_stuffing" | "account_takeover" => {
                out.push("Force password reset for affected account");
                out.push("Revoke all active sessions");
            }
            "privilege_escalation" => {
                out.push("Lock affected account pending investigation");
                out.push("Review all actions taken by account in last 24h");
            }
            _ => {}
        }
    } else if score >= 60 {
        out.push("Rate limit IP address");
        out.push("Require MFA for next login");
        out.push("Notify user of suspicious activity");
    } else if score >= 40 {
        out.push("Monitor for additional suspicious activity");
        out.push("Log and review in next security analysis");
    } else {
        out.push("Log for baseline analysis");
    }
    if likelihood != Likelihood::Low {
        out.push("Escalate to human analyst for review");
    }
    out.into_iter().map(String::from).collect()
}

pub trait RiskAssessor: Send + Sync {
    fn assess(&self, alert: &Alert) -> Result<RiskAssessment, TriageError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicAssessor;

impl RiskAssessor for HeuristicAssessor {
    fn assess(&self, alert: &Alert) -> Result<RiskAssessment, TriageError> {
        Ok(RiskAssessment::heuristic(alert))
    }
}

/// Adapts any source of raw model answers (an API client, a replay file) into
/// a validated assessor.
pub struct ModelOutputAssessor<F> {
    fetch: F,
}

impl<F> ModelOutputAssessor<F>
where
    F: Fn(&Alert) -> Result<String, TriageError> + Send + Sync,
{
    pub fn new(fetch: F) -> Self {
        Self { fetch }
    }
}

impl<F> RiskAssessor for ModelOutputAssessor<F>
where
    F: Fn(&Alert) -> Result<String, TriageError> + Send + Sync,
{
    fn assess(&self, alert: &Alert) -> Result<RiskAssessment, TriageError> {
        let raw = (self.fetch)(alert)?;
        Ok(RiskAssessment::from_model_output(&raw, alert))
    }
}
