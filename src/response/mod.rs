//! Remediation side: the action model, tagged dispatch, the safety gate and
//! the escalation hand-off.

pub mod action;
pub mod dispatch;
pub mod escalation;
pub mod executor;
pub mod rate_limiter;

pub use action::{Action, ActionType, BlastRadius, ExecutionResult, ExecutionStatus};
pub use dispatch::{ActionDispatcher, LoggingDispatcher, RemediationCommand};
pub use escalation::{escalation_channel, Escalation, EscalationReceiver, EscalationSender, WebhookNotifier};
pub use executor::ActionExecutor;
