use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::config::DetectionPolicy;
use crate::core::error::{panic_message, TriageError};
use crate::core::types::{Alert, LogBatch, LogRecord, UserProfile};
use crate::detectors::{
    AbnormalApiDetector, Detector, PrivilegeEscalationDetector, SuspiciousLoginDetector,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorFailure {
    pub detector: String,
    pub message: String,
}

/// Alerts in detector registration order, plus any detector that failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionReport {
    pub alerts: Vec<Alert>,
    pub failures: Vec<DetectorFailure>,
}

pub struct DetectionEngine {
    detectors: Vec<Arc<dyn Detector>>,
    max_concurrent_batches: usize,
}

impl DetectionEngine {
    /// The stock detector set: login, API, privilege. Refuses a policy that
    /// fails validation.
    pub fn new(policy: &DetectionPolicy) -> Result<Self, TriageError> {
        policy.validate()?;
        let detectors: Vec<Arc<dyn Detector>> = vec![
            Arc::new(SuspiciousLoginDetector::new(policy.login.clone())),
            Arc::new(AbnormalApiDetector::new(policy.api.clone())?),
            Arc::new(PrivilegeEscalationDetector::new(policy.privilege.clone())?),
        ];
        Ok(Self {
            detectors,
            max_concurrent_batches: policy.max_concurrent_batches.max(1),
        })
    }

    pub fn with_detectors(detectors: Vec<Arc<dyn Detector>>) -> Self {
        Self {
            detectors,
            max_concurrent_batches: 4,
        }
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn analyze(&self, logs: &[LogRecord], profile: Option<&UserProfile>) -> Vec<Alert> {
        self.analyze_report(logs, profile).alerts
    }

    /// Runs every detector; a detector that errors or panics is reported and
    /// skipped without affecting the others.
    pub fn analyze_report(&self, logs: &[LogRecord], profile: Option<&UserProfile>) -> DetectionReport {
        let mut report = DetectionReport::default();
        for detector in &self.detectors {
            let outcome = catch_unwind(AssertUnwindSafe(|| detector.detect(logs, profile)))
                .unwrap_or_else(|payload| {
                    Err(TriageError::Detector {
                        detector: detector.name().to_string(),
                        message: format!("panicked: {}", panic_message(payload)),
                    })
                });
            let outcome = outcome.and_then(|found| match found {
                Some(alert) if alert.threat_type != detector.threat_type() => {
                    Err(TriageError::Detector {
                        detector: detector.name().to_string(),
                        message: format!(
                            "raised a {} alert, registered for {}",
                            alert.threat_type.as_str(),
                            detector.threat_type().as_str()
                        ),
                    })
                }
                other => Ok(other),
            });
            match outcome {
                Ok(Some(alert)) => {
                    tracing::debug!(
                        "{} raised {} (confidence {}, {:?})",
                        detector.name(),
                        alert.id,
                        alert.confidence,
                        alert.severity
                    );
                    report.alerts.push(alert);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!("detector {} failed: {}", detector.name(), err);
                    report.failures.push(DetectorFailure {
                        detector: detector.name().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Analyzes independent batches concurrently on blocking tasks. Results
    /// come back in input order.
    pub async fn analyze_batches(self: Arc<Self>, batches: Vec<LogBatch>) -> Vec<DetectionReport> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_batches));
        let mut handles = Vec::with_capacity(batches.len());
        for batch in batches {
            let permit = semaphore.clone().acquire_owned().await.ok();
            let engine = self.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                engine.analyze_report(&batch.logs, batch.profile.as_ref())
            }));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    tracing::error!("detection task failed: {}", err);
                    reports.push(DetectionReport {
                        alerts: Vec::new(),
                        failures: vec![DetectorFailure {
                            detector: "engine".to_string(),
                            message: err.to_string(),
                        }],
                    });
                }
            }
        }
        reports
    }
}
