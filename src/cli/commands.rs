use std::path::Path;
use std::sync::Arc;
use std::{fs, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::cli::flags::{Cli, Command, FormatArg};
use crate::config::{load_config, TriageConfig};
use crate::core::output::{write_alerts, write_jsonl};
use crate::core::types::{Alert, LogBatch};
use crate::pipeline::{DetectionEngine, HeuristicAssessor, Orchestrator, TriageReport};
use crate::response::{escalation_channel, Escalation, LoggingDispatcher, WebhookNotifier};

pub async fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    tracing::debug!("policy {} loaded", cfg.policy_version);

    match cli.command {
        Command::Detect {
            input,
            format,
            output,
        } => run_detect(&cfg, &input, format, output.as_deref()).await,
        Command::Triage {
            input,
            execute,
            webhook_url,
            webhook_timeout_ms,
            output,
        } => {
            run_triage(
                &cfg,
                &input,
                !execute,
                webhook_url,
                Duration::from_millis(webhook_timeout_ms),
                output.as_deref(),
            )
            .await
        }
        Command::CheckConfig => run_check_config(&cfg),
    }
}

/// Accepts one batch object or an array of them.
pub fn load_batches(path: &Path) -> Result<Vec<LogBatch>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading batch file {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing batch file {}", path.display()))?;
    let batches = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<LogBatch>, _>>()?,
        Value::Object(_) => vec![serde_json::from_value(value)?],
        _ => return Err(anyhow!("batch file must hold an object or an array of objects")),
    };
    Ok(batches)
}

async fn run_detect(
    cfg: &TriageConfig,
    input: &Path,
    format: FormatArg,
    output: Option<&Path>,
) -> Result<()> {
    let batches = load_batches(input)?;
    let engine = Arc::new(DetectionEngine::new(&cfg.detection)?);
    tracing::info!(
        "running {} detectors over {} batch(es)",
        engine.detector_names().len(),
        batches.len()
    );
    let reports = engine.analyze_batches(batches).await;

    let mut alerts: Vec<Alert> = Vec::new();
    for report in &reports {
        for failure in &report.failures {
            tracing::warn!("detector {} skipped: {}", failure.detector, failure.message);
        }
        alerts.extend(report.alerts.iter().cloned());
    }

    if let Some(path) = output {
        write_alerts(&alerts, format.into(), path)?;
        tracing::info!("{} alerts written to {}", alerts.len(), path.display());
    }
    print_json(&reports)
}

#[derive(Serialize)]
struct TriageOutput {
    reports: Vec<TriageReport>,
    escalations: Vec<Escalation>,
}

async fn run_triage(
    cfg: &TriageConfig,
    input: &Path,
    dry_run: bool,
    webhook_url: Option<String>,
    webhook_timeout: Duration,
    output: Option<&Path>,
) -> Result<()> {
    let batches = load_batches(input)?;
    let (sender, mut receiver) = escalation_channel();
    let orchestrator = Orchestrator::new(
        cfg,
        Arc::new(HeuristicAssessor),
        Arc::new(LoggingDispatcher),
        sender,
    )?;
    let gate = orchestrator.executor().policy();
    tracing::info!(
        "gate ceilings: {}/hour, {}/minute",
        gate.max_actions_per_hour,
        gate.max_actions_per_minute
    );
    if dry_run {
        tracing::info!("dry run: no action will be dispatched");
    }

    let reports: Vec<TriageReport> = batches
        .iter()
        .map(|b| orchestrator.triage(&b.logs, b.profile.as_ref(), dry_run))
        .collect();
    // Closes the escalation queue.
    drop(orchestrator);

    let escalations = match webhook_url {
        Some(url) => {
            let notifier = WebhookNotifier::new(url, webhook_timeout)?;
            let delivered = notifier.run(receiver).await;
            tracing::info!("{} escalations posted to webhook", delivered);
            Vec::new()
        }
        None => receiver.try_drain(),
    };

    if let Some(path) = output {
        let investigations: Vec<_> = reports
            .iter()
            .flat_map(|r| r.investigations.iter())
            .collect();
        write_jsonl(&investigations, path)?;
        tracing::info!("{} investigations appended to {}", investigations.len(), path.display());
    }
    print_json(&TriageOutput {
        reports,
        escalations,
    })
}

fn run_check_config(cfg: &TriageConfig) -> Result<()> {
    cfg.validate()?;
    tracing::info!("policy {} is valid", cfg.policy_version);
    print_json(cfg)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
