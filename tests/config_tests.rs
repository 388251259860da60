use std::path::Path;

use autotriage::config::{load_config, parse_config, TriageConfig};
use autotriage::response::ActionType;

#[test]
fn example_policy_matches_stock_values() {
    let cfg = parse_config(include_str!("../config/autotriage.example.toml")).unwrap();
    let stock = TriageConfig::default();

    assert_eq!(cfg.policy_version, stock.policy_version);
    assert_eq!(cfg.gate.thresholds, stock.gate.thresholds);
    assert_eq!(cfg.gate.protected_user_ids, stock.gate.protected_user_ids);
    assert_eq!(cfg.synthesis.rules, stock.synthesis.rules);
    assert_eq!(
        cfg.detection.api.sql_injection_patterns,
        stock.detection.api.sql_injection_patterns
    );
    assert_eq!(cfg.detection.login.severity, stock.detection.login.severity);
    assert_eq!(cfg.gate.rollback_retention_hours, stock.gate.rollback_retention_hours);
    assert_eq!(cfg.gate.threshold(ActionType::RevokeApiKey), 97);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let err = load_config(Some(Path::new("does/not/exist.toml"))).unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[test]
fn malformed_document_is_a_config_error() {
    let err = parse_config("[gate\nmax_actions_per_hour = ").unwrap_err();
    assert!(err.to_string().starts_with("config error"));
}
