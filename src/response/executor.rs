//! Safety gate for automated remediation.
//!
//! `evaluate_action` runs five checks in order and the first failure decides
//! the outcome: confidence threshold, blast radius, protected entities, rate
//! limit, circuit breaker. Rate-limit bookkeeping and the breaker flag share
//! one mutex, so concurrent callers cannot jointly exceed a ceiling. Dispatch
//! runs outside the lock after the slot has been recorded.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::GatePolicy;
use crate::core::error::{panic_message, TriageError};
use crate::core::time::now_utc;
use crate::response::action::{Action, ActionType, BlastRadius, ExecutionResult, ExecutionStatus};
use crate::response::dispatch::{ActionDispatcher, RemediationCommand};
use crate::response::escalation::EscalationSender;
use crate::response::rate_limiter::{ActionRecord, SlidingWindowLimiter};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerTrip {
    pub reason: String,
    pub tripped_at: DateTime<Utc>,
}

struct LedgerEntry {
    command: RemediationCommand,
    executed_at: DateTime<Utc>,
}

struct GateState {
    limiter: SlidingWindowLimiter,
    breaker: Option<BreakerTrip>,
    /// Executed actions by id, for rollback and unlock.
    executed: HashMap<String, LedgerEntry>,
}

impl GateState {
    /// Forgets executions older than `retention`. Account locks stay until
    /// someone unlocks them.
    fn prune_ledger(&mut self, now: DateTime<Utc>, retention: Duration) {
        let cutoff = now - retention;
        self.executed.retain(|_, entry| {
            entry.command.action_type() == ActionType::LockAccount || entry.executed_at > cutoff
        });
    }

    fn remember(&mut self, action_id: &str, command: RemediationCommand, executed_at: DateTime<Utc>) {
        let entry = LedgerEntry {
            command,
            executed_at,
        };
        if self.executed.insert(action_id.to_string(), entry).is_some() {
            tracing::warn!("{} was already in the rollback ledger; replaced", action_id);
        }
    }
}

pub struct ActionExecutor {
    policy: GatePolicy,
    dispatcher: Arc<dyn ActionDispatcher>,
    escalations: EscalationSender,
    state: Mutex<GateState>,
}

impl ActionExecutor {
    pub fn new(
        policy: GatePolicy,
        dispatcher: Arc<dyn ActionDispatcher>,
        escalations: EscalationSender,
    ) -> Result<Self, TriageError> {
        policy.validate()?;
        let limiter =
            SlidingWindowLimiter::new(policy.max_actions_per_hour, policy.max_actions_per_minute);
        Ok(Self {
            policy,
            dispatcher,
            escalations,
            state: Mutex::new(GateState {
                limiter,
                breaker: None,
                executed: HashMap::new(),
            }),
        })
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    fn retention(&self) -> Duration {
        Duration::hours(self.policy.rollback_retention_hours)
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn evaluate_action(&self, action: &Action, dry_run: bool) -> ExecutionResult {
        let threshold = self.policy.threshold(action.action_type);
        if action.confidence < threshold {
            return self.escalate(
                action,
                format!(
                    "Confidence {} below threshold {} for {}",
                    action.confidence, threshold, action.action_type
                ),
            );
        }
        tracing::debug!("{}: confidence {} >= {}", action.id, action.confidence, threshold);

        if action.blast_radius != BlastRadius::SingleUser {
            return self.escalate(
                action,
                format!(
                    "Blast radius {:?} requires human approval",
                    action.blast_radius
                ),
            );
        }

        if let Some(entity) = self.protected_entity(action) {
            return self.escalate(
                action,
                format!("Target {} is protected, requires human approval", entity),
            );
        }

        let now = now_utc();
        let command = {
            let mut state = self.lock_state();
            state.limiter.prune(now);
            state.prune_ledger(now, self.retention());
            if let Err(exceeded) = state.limiter.check(now) {
                drop(state);
                tracing::warn!("{} rejected: rate limit exceeded ({})", action.id, exceeded);
                return ExecutionResult::new(
                    &action.id,
                    ExecutionStatus::Rejected,
                    format!("Rate limit exceeded: {}", exceeded),
                );
            }
            if let Some(trip) = state.breaker.clone() {
                drop(state);
                return self.escalate(
                    action,
                    format!("Circuit breaker tripped: {}", trip.reason),
                );
            }
            if dry_run {
                drop(state);
                tracing::info!("{} approved (dry run)", action.id);
                return ExecutionResult::new(
                    &action.id,
                    ExecutionStatus::Approved,
                    format!("Dry run: would execute {} automatically", action.action_type),
                );
            }
            let command = match RemediationCommand::from_action(action) {
                Ok(command) => command,
                Err(err) => {
                    drop(state);
                    tracing::error!("{} cannot be dispatched: {}", action.id, err);
                    return ExecutionResult::new(
                        &action.id,
                        ExecutionStatus::Failed,
                        format!("Execution failed: {}", err),
                    );
                }
            };
            state.limiter.record(ActionRecord {
                action_id: action.id.clone(),
                timestamp: now,
                action_type: action.action_type,
                target: command.target().to_string(),
            });
            command
        };

        self.dispatch(
            action,
            command,
            now,
            "Automatic execution: all safety checks passed",
            None,
        )
    }

    /// Human decision on an escalated action. Skips the automated checks.
    pub fn human_approve(
        &self,
        action: &Action,
        analyst_id: &str,
        approved: bool,
        reason: Option<&str>,
    ) -> ExecutionResult {
        if !approved {
            let reason = match reason {
                Some(r) if !r.trim().is_empty() => format!("Rejected by analyst: {}", r),
                _ => "Rejected by analyst".to_string(),
            };
            tracing::warn!("{} rejected by {}", action.id, analyst_id);
            return ExecutionResult::new(&action.id, ExecutionStatus::Rejected, reason)
                .by(analyst_id);
        }

        let command = match RemediationCommand::from_action(action) {
            Ok(command) => command,
            Err(err) => {
                tracing::error!("{} cannot be dispatched: {}", action.id, err);
                return ExecutionResult::new(
                    &action.id,
                    ExecutionStatus::Failed,
                    format!("Execution failed: {}", err),
                )
                .by(analyst_id);
            }
        };

        let now = now_utc();
        {
            let mut state = self.lock_state();
            state.limiter.prune(now);
            state.prune_ledger(now, self.retention());
            state.limiter.record(ActionRecord {
                action_id: action.id.clone(),
                timestamp: now,
                action_type: action.action_type,
                target: command.target().to_string(),
            });
        }

        let reason = match reason {
            Some(r) if !r.trim().is_empty() => format!("Approved by human analyst: {}", r),
            _ => "Approved by human analyst".to_string(),
        };
        self.dispatch(action, command, now, &reason, Some(analyst_id))
    }

    fn dispatch(
        &self,
        action: &Action,
        command: RemediationCommand,
        now: DateTime<Utc>,
        reason: &str,
        analyst_id: Option<&str>,
    ) -> ExecutionResult {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatcher.apply(&command)))
            .unwrap_or_else(|payload| {
                Err(TriageError::Dispatch(format!(
                    "dispatcher panicked: {}",
                    panic_message(payload)
                )))
            });

        let mut result = match outcome {
            Ok(()) => {
                tracing::info!("{} executed: {} on {}", action.id, command.action_type(), command.target());
                let rollback_by = match action.auto_expire {
                    Some(ttl) if action.action_type.is_reversible() => {
                        Duration::from_std(ttl).ok().map(|d| now + d)
                    }
                    _ => None,
                };
                self.lock_state().remember(&action.id, command, now);
                let mut ok = ExecutionResult::new(&action.id, ExecutionStatus::Executed, reason).at(now);
                ok.rollback_by = rollback_by;
                ok
            }
            Err(err) => {
                tracing::error!("{} dispatch failed: {}", action.id, err);
                ExecutionResult::new(
                    &action.id,
                    ExecutionStatus::Failed,
                    format!("Execution failed: {}", err),
                )
            }
        };
        if let Some(analyst) = analyst_id {
            result.analyst_id = Some(analyst.to_string());
        }
        result
    }

    fn protected_entity<'a>(&self, action: &'a Action) -> Option<&'a str> {
        let user = action.target_field("user_id")?;
        if self.policy.protected_user_ids.contains(user) {
            return Some(user);
        }
        if user.starts_with(self.policy.service_account_prefix.as_str())
            && self.policy.protected_service_accounts.contains(user)
        {
            return Some(user);
        }
        None
    }

    fn escalate(&self, action: &Action, reason: String) -> ExecutionResult {
        tracing::warn!("{} escalated: {}", action.id, reason);
        let result = ExecutionResult::new(&action.id, ExecutionStatus::Escalated, reason);
        if let Err(err) = self.escalations.send(action, &result) {
            tracing::error!("{}", err);
        }
        result
    }

    /// Reverses an executed action. Account locks are refused here; see
    /// [`ActionExecutor::unlock_account`]. Executions older than the retention
    /// window are no longer known.
    pub fn rollback(&self, action_id: &str, reason: &str) -> ExecutionResult {
        let entry = {
            let mut state = self.lock_state();
            state.prune_ledger(now_utc(), self.retention());
            let is_lock = state
                .executed
                .get(action_id)
                .map(|entry| entry.command.action_type() == ActionType::LockAccount);
            match is_lock {
                None => {
                    return ExecutionResult::new(
                        action_id,
                        ExecutionStatus::Failed,
                        format!("Rollback failed: no executed action {}", action_id),
                    )
                }
                Some(true) => {
                    return ExecutionResult::new(
                        action_id,
                        ExecutionStatus::Rejected,
                        "Account locks are not rolled back; use the manual unlock path",
                    )
                }
                Some(false) => state.executed.remove(action_id),
            }
        };
        let Some(entry) = entry else {
            return ExecutionResult::new(
                action_id,
                ExecutionStatus::Failed,
                format!("Rollback failed: no executed action {}", action_id),
            );
        };
        self.reverse(action_id, entry, format!("Rolled back: {}", reason), None)
    }

    /// Manual unlock for an executed `LockAccount` action.
    pub fn unlock_account(&self, action_id: &str, analyst_id: &str) -> ExecutionResult {
        let entry = {
            let mut state = self.lock_state();
            let is_lock = state
                .executed
                .get(action_id)
                .map(|entry| entry.command.action_type() == ActionType::LockAccount);
            match is_lock {
                Some(true) => state.executed.remove(action_id),
                _ => None,
            }
        };
        let Some(entry) = entry else {
            return ExecutionResult::new(
                action_id,
                ExecutionStatus::Failed,
                format!("Unlock failed: {} is not an executed account lock", action_id),
            )
            .by(analyst_id);
        };
        self.reverse(
            action_id,
            entry,
            format!("Account unlocked by analyst {}", analyst_id),
            Some(analyst_id),
        )
    }

    /// Number of executed actions that can still be rolled back or unlocked.
    pub fn rollback_ledger_len(&self) -> usize {
        let mut state = self.lock_state();
        state.prune_ledger(now_utc(), self.retention());
        state.executed.len()
    }

    fn reverse(
        &self,
        action_id: &str,
        entry: LedgerEntry,
        reason: String,
        analyst_id: Option<&str>,
    ) -> ExecutionResult {
        let command = &entry.command;
        let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatcher.reverse(command)))
            .unwrap_or_else(|payload| {
                Err(TriageError::Dispatch(format!(
                    "dispatcher panicked: {}",
                    panic_message(payload)
                )))
            });
        let mut result = match outcome {
            Ok(()) => {
                tracing::info!("{} reversed ({})", action_id, command.action_type());
                ExecutionResult::new(action_id, ExecutionStatus::RolledBack, reason).at(now_utc())
            }
            Err(err) => {
                tracing::error!("{} reversal failed: {}", action_id, err);
                self.lock_state()
                    .executed
                    .insert(action_id.to_string(), entry);
                ExecutionResult::new(
                    action_id,
                    ExecutionStatus::Failed,
                    format!("Rollback failed: {}", err),
                )
            }
        };
        if let Some(analyst) = analyst_id {
            result.analyst_id = Some(analyst.to_string());
        }
        result
    }

    pub fn trip_breaker(&self, reason: &str) {
        tracing::error!("circuit breaker tripped: {}", reason);
        self.lock_state().breaker = Some(BreakerTrip {
            reason: reason.to_string(),
            tripped_at: now_utc(),
        });
    }

    pub fn reset_breaker(&self, analyst_id: &str) {
        let previous = self.lock_state().breaker.take();
        if previous.is_some() {
            tracing::info!("circuit breaker reset by {}", analyst_id);
        }
    }

    pub fn is_breaker_tripped(&self) -> bool {
        self.lock_state().breaker.is_some()
    }

    pub fn breaker(&self) -> Option<BreakerTrip> {
        self.lock_state().breaker.clone()
    }

    /// Actions counted against the hourly ceiling.
    pub fn recent_action_count(&self) -> usize {
        let mut state = self.lock_state();
        state.limiter.prune(now_utc());
        state.limiter.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::escalation::escalation_channel;
    use std::collections::BTreeMap;

    struct PanickingDispatcher;

    impl ActionDispatcher for PanickingDispatcher {
        fn apply(&self, _command: &RemediationCommand) -> Result<(), TriageError> {
            panic!("firewall client blew up");
        }
        fn reverse(&self, _command: &RemediationCommand) -> Result<(), TriageError> {
            Ok(())
        }
    }

    fn log_only(id: &str) -> Action {
        Action {
            id: id.to_string(),
            action_type: ActionType::LogOnly,
            target: BTreeMap::new(),
            confidence: 100,
            blast_radius: BlastRadius::SingleUser,
            reversible: true,
            auto_expire: None,
            justification: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn dispatcher_panic_becomes_failed() {
        let (tx, _rx) = escalation_channel();
        let gate =
            ActionExecutor::new(GatePolicy::default(), Arc::new(PanickingDispatcher), tx).unwrap();
        let result = gate.evaluate_action(&log_only("ACT-p"), false);
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.reason.contains("firewall client blew up"));
        assert_eq!(gate.recent_action_count(), 1);
    }

    #[test]
    fn invalid_policy_is_refused_at_construction() {
        let (tx, _rx) = escalation_channel();
        let mut policy = GatePolicy::default();
        policy.thresholds.remove(&ActionType::BlockIp);
        let dispatcher = Arc::new(crate::response::dispatch::LoggingDispatcher);
        assert!(ActionExecutor::new(policy, dispatcher, tx).is_err());
    }

    #[test]
    fn closed_queue_still_returns_escalation() {
        let (tx, rx) = escalation_channel();
        drop(rx);
        let gate = ActionExecutor::new(
            GatePolicy::default(),
            Arc::new(crate::response::dispatch::LoggingDispatcher),
            tx,
        )
        .unwrap();
        let mut action = log_only("ACT-c");
        action.blast_radius = BlastRadius::Team;
        let result = gate.evaluate_action(&action, false);
        assert_eq!(result.status, ExecutionStatus::Escalated);
    }

    #[test]
    fn ledger_forgets_old_executions_but_keeps_locks() {
        let (tx, _rx) = escalation_channel();
        let mut policy = GatePolicy::default();
        policy.rollback_retention_hours = 24;
        let gate = ActionExecutor::new(
            policy,
            Arc::new(crate::response::dispatch::LoggingDispatcher),
            tx,
        )
        .unwrap();
        let now = now_utc();
        {
            let mut state = gate.lock_state();
            let stale = now - Duration::hours(30);
            state.remember(
                "ACT-old-block",
                RemediationCommand::BlockIp {
                    ip: "45.67.89.12".to_string(),
                    duration: None,
                },
                stale,
            );
            state.remember(
                "ACT-old-lock",
                RemediationCommand::LockAccount {
                    user_id: "user-42".to_string(),
                },
                stale,
            );
            state.remember(
                "ACT-fresh",
                RemediationCommand::RequireMfa {
                    user_id: "user-42".to_string(),
                },
                now - Duration::hours(2),
            );
        }

        assert_eq!(gate.rollback_ledger_len(), 2);
        let expired = gate.rollback("ACT-old-block", "too late");
        assert_eq!(expired.status, ExecutionStatus::Failed);
        assert_eq!(
            gate.unlock_account("ACT-old-lock", "analyst-1").status,
            ExecutionStatus::RolledBack
        );
        assert_eq!(
            gate.rollback("ACT-fresh", "false positive").status,
            ExecutionStatus::RolledBack
        );
        assert_eq!(gate.rollback_ledger_len(), 0);
    }

    #[test]
    fn failed_reversal_keeps_original_execution_time() {
        struct StuckDispatcher;
        impl ActionDispatcher for StuckDispatcher {
            fn apply(&self, _command: &RemediationCommand) -> Result<(), TriageError> {
                Ok(())
            }
            fn reverse(&self, _command: &RemediationCommand) -> Result<(), TriageError> {
                Err(TriageError::Dispatch("session store offline".to_string()))
            }
        }
        let (tx, _rx) = escalation_channel();
        let gate = ActionExecutor::new(GatePolicy::default(), Arc::new(StuckDispatcher), tx).unwrap();
        let executed_at = now_utc() - Duration::hours(100);
        gate.lock_state().remember(
            "ACT-stuck",
            RemediationCommand::RevokeSessions {
                user_id: "user-42".to_string(),
            },
            executed_at,
        );

        assert_eq!(
            gate.rollback("ACT-stuck", "retry later").status,
            ExecutionStatus::Failed
        );
        let state = gate.lock_state();
        let entry = state.executed.get("ACT-stuck").unwrap();
        assert_eq!(entry.executed_at, executed_at);
    }
}
