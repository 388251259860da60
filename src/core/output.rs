use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::core::error::TriageError;
use crate::core::time::now_utc;
use crate::core::types::Alert;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jsonl,
    Markdown,
}

pub fn write_alerts(alerts: &[Alert], format: OutputFormat, path: &Path) -> Result<(), TriageError> {
    match format {
        OutputFormat::Jsonl => write_jsonl(alerts, path),
        OutputFormat::Markdown => write_markdown(alerts, path),
    }
}

/// One JSON document per line, appended so audit files accumulate across runs.
pub fn write_jsonl<T: Serialize>(records: &[T], path: &Path) -> Result<(), TriageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut lines = String::new();
    for record in records {
        lines.push_str(&serde_json::to_string(record)?);
        lines.push('\n');
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(lines.as_bytes())?;
    Ok(())
}

fn write_markdown(alerts: &[Alert], path: &Path) -> Result<(), TriageError> {
    let mut out = String::new();
    out.push_str("# Triage Alerts\n\n");
    out.push_str(&format!("Generated: {}\n\n", now_utc().to_rfc3339()));
    if alerts.is_empty() {
        out.push_str("_No alerts raised._\n");
    }
    for alert in alerts {
        out.push_str(&format!("## {} ({})\n", alert.id, alert.threat_type.as_str()));
        out.push_str(&format!(
            "- Severity: {:?}\n- Confidence: {}\n- Seen: {}\n",
            alert.severity,
            alert.confidence,
            alert.timestamp.to_rfc3339()
        ));
        if !alert.affected_entities.is_empty() {
            let entities: Vec<String> = alert
                .affected_entities
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            out.push_str(&format!("- Entities: {}\n", entities.join(", ")));
        }
        out.push_str("- Signals:\n");
        for sig in &alert.signals {
            out.push_str(&format!(
                "  - {} (+{}) {}\n",
                sig.name, sig.weight, sig.description
            ));
        }
        out.push('\n');
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, out)?;
    Ok(())
}
