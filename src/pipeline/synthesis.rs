use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{SynthesisPolicy, SynthesisRule};
use crate::core::types::Alert;
use crate::pipeline::assessment::RiskAssessment;
use crate::response::action::{Action, ActionType, BlastRadius};

/// Turns an assessment into exactly one action: the most severe rule whose
/// phrase appears among the recommendations and whose minimum score is met.
/// Falls back to `LogOnly`.
pub fn synthesize_action(
    alert: &Alert,
    assessment: &RiskAssessment,
    action_id: &str,
    policy: &SynthesisPolicy,
    policy_version: &str,
) -> Action {
    let recommended: Vec<String> = assessment
        .recommended_actions
        .iter()
        .map(|r| r.to_lowercase())
        .collect();

    let chosen = policy
        .rules
        .iter()
        .filter(|rule| assessment.risk_score >= rule.min_score)
        .filter(|rule| {
            let phrase = rule.phrase.to_lowercase();
            recommended.iter().any(|r| r.contains(&phrase))
        })
        .fold(None::<&SynthesisRule>, |best, rule| match best {
            Some(b) if b.action >= rule.action => Some(b),
            _ => Some(rule),
        });

    let (action_type, auto_expire) = match chosen {
        Some(rule) => (
            rule.action,
            rule.auto_expire_minutes
                .filter(|_| rule.action.is_reversible())
                .map(|m| Duration::from_secs(m * 60)),
        ),
        None => (ActionType::LogOnly, None),
    };

    let blast_radius = match alert.entity("user_id") {
        Some(user) if user.starts_with(policy.service_account_prefix.as_str()) => BlastRadius::Service,
        _ => BlastRadius::SingleUser,
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("alert_id".to_string(), alert.id.clone());
    metadata.insert("threat_type".to_string(), alert.threat_type.as_str().to_string());
    metadata.insert("attack_pattern".to_string(), assessment.attack_pattern.clone());
    metadata.insert("policy_version".to_string(), policy_version.to_string());

    Action {
        id: action_id.to_string(),
        action_type,
        target: alert.affected_entities.clone(),
        confidence: assessment.risk_score,
        blast_radius,
        reversible: action_type.is_reversible(),
        auto_expire,
        justification: assessment.reasoning.clone(),
        metadata,
    }
}
