use sha2::{Digest, Sha256};

use crate::core::types::{LogRecord, Signal, ThreatType};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Deterministic alert id: same threat, signals and logs give the same id.
pub fn stable_alert_id(threat_type: ThreatType, signals: &[Signal], logs: &[LogRecord]) -> String {
    let mut buf = String::new();
    buf.push_str(threat_type.as_str());
    buf.push('|');
    let names: Vec<&str> = signals.iter().map(|s| s.name.as_str()).collect();
    buf.push_str(&names.join(","));
    buf.push('|');
    buf.push_str(&serde_json::to_string(logs).unwrap_or_default());
    let digest = sha256_hex(buf.as_bytes());
    format!("{}-{}", threat_type.id_prefix(), &digest[..16])
}

pub fn stable_action_id(alert_id: &str, investigation_id: &str) -> String {
    let digest = sha256_hex(format!("{}|{}", alert_id, investigation_id).as_bytes());
    format!("ACT-{}", &digest[..16])
}
