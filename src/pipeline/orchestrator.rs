use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::{SynthesisPolicy, TriageConfig};
use crate::core::error::TriageError;
use crate::core::hash::{sha256_hex, stable_action_id};
use crate::core::time::now_utc;
use crate::core::types::{Alert, LogRecord, UserProfile};
use crate::pipeline::assessment::{RiskAssessment, RiskAssessor};
use crate::pipeline::engine::{DetectionEngine, DetectorFailure};
use crate::pipeline::synthesis::synthesize_action;
use crate::response::action::{Action, ExecutionResult, ExecutionStatus};
use crate::response::dispatch::ActionDispatcher;
use crate::response::escalation::EscalationSender;
use crate::response::executor::ActionExecutor;

#[derive(Debug, Clone, Serialize)]
pub struct Investigation {
    pub investigation_id: String,
    pub alert: Alert,
    pub assessment: RiskAssessment,
    pub action: Action,
    pub result: ExecutionResult,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TriageReport {
    pub investigations: Vec<Investigation>,
    pub failures: Vec<DetectorFailure>,
}

/// Detection, assessment, synthesis and the gate, in that order.
pub struct Orchestrator {
    engine: Arc<DetectionEngine>,
    assessor: Arc<dyn RiskAssessor>,
    executor: Arc<ActionExecutor>,
    synthesis: SynthesisPolicy,
    policy_version: String,
    sequence: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        config: &TriageConfig,
        assessor: Arc<dyn RiskAssessor>,
        dispatcher: Arc<dyn ActionDispatcher>,
        escalations: EscalationSender,
    ) -> Result<Self, TriageError> {
        config.validate()?;
        let engine = Arc::new(DetectionEngine::new(&config.detection)?);
        let executor = Arc::new(ActionExecutor::new(
            config.gate.clone(),
            dispatcher,
            escalations,
        )?);
        Ok(Self::from_parts(
            engine,
            assessor,
            executor,
            config.synthesis.clone(),
            config.policy_version.clone(),
        ))
    }

    pub fn from_parts(
        engine: Arc<DetectionEngine>,
        assessor: Arc<dyn RiskAssessor>,
        executor: Arc<ActionExecutor>,
        synthesis: SynthesisPolicy,
        policy_version: String,
    ) -> Self {
        Self {
            engine,
            assessor,
            executor,
            synthesis,
            policy_version,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> &Arc<DetectionEngine> {
        &self.engine
    }

    pub fn executor(&self) -> &Arc<ActionExecutor> {
        &self.executor
    }

    fn next_investigation_id(&self, alert: &Alert) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stamp = now_utc().timestamp_nanos_opt().unwrap_or_default();
        let digest = sha256_hex(format!("{}|{}|{}", alert.id, stamp, seq).as_bytes());
        format!("INV-{}", &digest[..16])
    }

    pub fn investigate(&self, alert: Alert, dry_run: bool) -> Investigation {
        let started = Instant::now();
        let investigation_id = self.next_investigation_id(&alert);
        tracing::info!("{}: investigating {}", investigation_id, alert.id);

        let assessment = match self.assessor.assess(&alert) {
            Ok(assessment) => assessment,
            Err(err) => {
                tracing::warn!("{}: assessor failed ({}), using heuristic", investigation_id, err);
                RiskAssessment::heuristic(&alert)
            }
        };
        tracing::debug!(
            "{}: risk {:?} ({}), pattern {}",
            investigation_id,
            assessment.risk_level,
            assessment.risk_score,
            assessment.attack_pattern
        );

        let action_id = stable_action_id(&alert.id, &investigation_id);
        let action = synthesize_action(
            &alert,
            &assessment,
            &action_id,
            &self.synthesis,
            &self.policy_version,
        );
        let result = self.executor.evaluate_action(&action, dry_run);
        match result.status {
            ExecutionStatus::Executed | ExecutionStatus::Approved => {
                tracing::info!("{}: {} {:?}", investigation_id, action.action_type, result.status)
            }
            _ => tracing::info!(
                "{}: {} {:?}: {}",
                investigation_id,
                action.action_type,
                result.status,
                result.reason
            ),
        }

        Investigation {
            investigation_id,
            alert,
            assessment,
            action,
            result,
            elapsed_ms: started.elapsed().as_millis(),
        }
    }

    pub fn triage(
        &self,
        logs: &[LogRecord],
        profile: Option<&UserProfile>,
        dry_run: bool,
    ) -> TriageReport {
        let report = self.engine.analyze_report(logs, profile);
        let investigations = report
            .alerts
            .into_iter()
            .map(|alert| self.investigate(alert, dry_run))
            .collect();
        TriageReport {
            investigations,
            failures: report.failures,
        }
    }
}
