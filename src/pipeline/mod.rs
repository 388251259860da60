//! Alert handling from raw logs to a gated action.

pub mod assessment;
pub mod engine;
pub mod orchestrator;
pub mod synthesis;

pub use assessment::{HeuristicAssessor, ModelOutputAssessor, RiskAssessment, RiskAssessor};
pub use engine::{DetectionEngine, DetectionReport, DetectorFailure};
pub use orchestrator::{Investigation, Orchestrator, TriageReport};
pub use synthesis::synthesize_action;
