use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autotriage::config::GatePolicy;
use autotriage::core::error::TriageError;
use autotriage::response::{
    escalation_channel, Action, ActionDispatcher, ActionExecutor, ActionType, BlastRadius,
    EscalationReceiver, ExecutionStatus, LoggingDispatcher, RemediationCommand,
};

#[derive(Default)]
struct RecordingDispatcher {
    applied: Mutex<Vec<RemediationCommand>>,
    reversed: Mutex<Vec<RemediationCommand>>,
}

impl ActionDispatcher for RecordingDispatcher {
    fn apply(&self, command: &RemediationCommand) -> Result<(), TriageError> {
        self.applied.lock().unwrap().push(command.clone());
        Ok(())
    }
    fn reverse(&self, command: &RemediationCommand) -> Result<(), TriageError> {
        self.reversed.lock().unwrap().push(command.clone());
        Ok(())
    }
}

struct FailingDispatcher;

impl ActionDispatcher for FailingDispatcher {
    fn apply(&self, _command: &RemediationCommand) -> Result<(), TriageError> {
        Err(TriageError::Dispatch("firewall API returned 503".to_string()))
    }
    fn reverse(&self, _command: &RemediationCommand) -> Result<(), TriageError> {
        Err(TriageError::Dispatch("firewall API returned 503".to_string()))
    }
}

fn action(id: &str, action_type: ActionType, confidence: u8) -> Action {
    let mut target = BTreeMap::new();
    target.insert("user_id".to_string(), "user-42".to_string());
    target.insert("ip".to_string(), "45.67.89.12".to_string());
    target.insert("api_key_id".to_string(), "key-7".to_string());
    Action {
        id: id.to_string(),
        action_type,
        target,
        confidence,
        blast_radius: BlastRadius::SingleUser,
        reversible: action_type.is_reversible(),
        auto_expire: None,
        justification: "test".to_string(),
        metadata: BTreeMap::new(),
    }
}

fn gate_with(
    policy: GatePolicy,
    dispatcher: Arc<dyn ActionDispatcher>,
) -> (ActionExecutor, EscalationReceiver) {
    let (tx, rx) = escalation_channel();
    (ActionExecutor::new(policy, dispatcher, tx).unwrap(), rx)
}

fn gate() -> (ActionExecutor, EscalationReceiver) {
    gate_with(GatePolicy::default(), Arc::new(LoggingDispatcher))
}

#[test]
fn low_confidence_escalates_whatever_else_holds() {
    let (gate, mut rx) = gate();
    let mut a = action("ACT-1", ActionType::BlockIp, 89);
    a.blast_radius = BlastRadius::Organization;
    a.target.insert("user_id".to_string(), "exec-001".to_string());
    gate.trip_breaker("maintenance");

    let result = gate.evaluate_action(&a, false);
    assert_eq!(result.status, ExecutionStatus::Escalated);
    assert_eq!(result.reason, "Confidence 89 below threshold 90 for block_ip");
    assert!(result.executed_at.is_none());

    let queued = rx.try_drain();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].action.id, "ACT-1");
    assert_eq!(queued[0].result, result);
}

#[test]
fn broad_blast_radius_escalates_at_full_confidence() {
    let (gate, _rx) = gate();
    for radius in [BlastRadius::Team, BlastRadius::Service, BlastRadius::Organization] {
        let mut a = action("ACT-2", ActionType::RateLimit, 100);
        a.blast_radius = radius;
        let result = gate.evaluate_action(&a, false);
        assert_eq!(result.status, ExecutionStatus::Escalated);
        assert!(result.reason.contains("Blast radius"));
    }
}

#[test]
fn protected_entities_always_escalate() {
    let (gate, _rx) = gate();
    for user in ["exec-001", "on-call-001", "svc-payments"] {
        let mut a = action("ACT-3", ActionType::RequireMfa, 100);
        a.target.insert("user_id".to_string(), user.to_string());
        let result = gate.evaluate_action(&a, false);
        assert_eq!(result.status, ExecutionStatus::Escalated, "{}", user);
        assert!(result.reason.contains(user));
    }

    let mut other_svc = action("ACT-3b", ActionType::RequireMfa, 100);
    other_svc
        .target
        .insert("user_id".to_string(), "svc-reporting".to_string());
    assert_eq!(
        gate.evaluate_action(&other_svc, false).status,
        ExecutionStatus::Executed
    );
}

#[test]
fn breaker_escalates_until_reset() {
    let (gate, _rx) = gate();
    assert!(gate.breaker().is_none());
    gate.trip_breaker("bad deploy of detection rules");
    assert!(gate.is_breaker_tripped());
    assert_eq!(
        gate.breaker().map(|trip| trip.reason),
        Some("bad deploy of detection rules".to_string())
    );

    for i in 0..3 {
        let result = gate.evaluate_action(&action(&format!("ACT-b{}", i), ActionType::LogOnly, 100), false);
        assert_eq!(result.status, ExecutionStatus::Escalated);
        assert!(result.reason.contains("bad deploy"));
    }
    assert_eq!(gate.recent_action_count(), 0);

    gate.reset_breaker("analyst-7");
    assert!(!gate.is_breaker_tripped());
    assert!(gate.breaker().is_none());
    let result = gate.evaluate_action(&action("ACT-b9", ActionType::LogOnly, 100), false);
    assert_eq!(result.status, ExecutionStatus::Executed);
}

#[test]
fn dry_run_approves_without_side_effects() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let (gate, _rx) = gate_with(GatePolicy::default(), dispatcher.clone());
    let result = gate.evaluate_action(&action("ACT-d", ActionType::BlockIp, 95), true);
    assert_eq!(result.status, ExecutionStatus::Approved);
    assert!(result.executed_at.is_none());
    assert!(dispatcher.applied.lock().unwrap().is_empty());
    assert_eq!(gate.recent_action_count(), 0);
}

#[test]
fn execution_sets_rollback_deadline_and_dispatches_variant() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let (gate, _rx) = gate_with(GatePolicy::default(), dispatcher.clone());
    let mut a = action("ACT-e", ActionType::BlockIp, 95);
    a.auto_expire = Some(Duration::from_secs(3600));

    let result = gate.evaluate_action(&a, false);
    assert_eq!(result.status, ExecutionStatus::Executed);
    let executed_at = result.executed_at.unwrap();
    assert_eq!(
        result.rollback_by.unwrap() - executed_at,
        chrono::Duration::hours(1)
    );
    assert_eq!(
        dispatcher.applied.lock().unwrap().as_slice(),
        &[RemediationCommand::BlockIp {
            ip: "45.67.89.12".to_string(),
            duration: Some(Duration::from_secs(3600)),
        }]
    );
}

#[test]
fn dispatch_failure_is_reported_not_raised() {
    let (gate, _rx) = gate_with(GatePolicy::default(), Arc::new(FailingDispatcher));
    let result = gate.evaluate_action(&action("ACT-f", ActionType::RevokeSession, 90), false);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.reason.contains("503"));
    // The slot was committed before dispatch.
    assert_eq!(gate.recent_action_count(), 1);
}

#[test]
fn missing_target_field_fails_without_consuming_a_slot() {
    let (gate, _rx) = gate();
    let mut a = action("ACT-m", ActionType::BlockIp, 99);
    a.target.remove("ip");
    let result = gate.evaluate_action(&a, false);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.reason.contains("ip"));
    assert_eq!(gate.recent_action_count(), 0);
}

#[test]
fn per_minute_ceiling_rejects() {
    let (gate, _rx) = gate();
    for i in 0..10 {
        let result = gate.evaluate_action(&action(&format!("ACT-r{}", i), ActionType::LogOnly, 100), false);
        assert_eq!(result.status, ExecutionStatus::Executed);
    }
    let result = gate.evaluate_action(&action("ACT-r10", ActionType::LogOnly, 100), false);
    assert_eq!(result.status, ExecutionStatus::Rejected);
    assert!(result.reason.starts_with("Rate limit exceeded"));
}

#[test]
fn hourly_ceiling_rejects() {
    let policy = GatePolicy {
        max_actions_per_hour: 3,
        max_actions_per_minute: 3,
        ..GatePolicy::default()
    };
    let (gate, _rx) = gate_with(policy, Arc::new(LoggingDispatcher));
    for i in 0..3 {
        gate.evaluate_action(&action(&format!("ACT-h{}", i), ActionType::LogOnly, 100), false);
    }
    let result = gate.evaluate_action(&action("ACT-h3", ActionType::LogOnly, 100), false);
    assert_eq!(result.status, ExecutionStatus::Rejected);
    assert!(result.reason.contains("hour"));
}

#[test]
fn concurrent_callers_never_exceed_the_ceiling() {
    let (gate, _rx) = gate();
    let gate = Arc::new(gate);
    let results = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for t in 0..10 {
            let gate = gate.clone();
            let results = &results;
            scope.spawn(move || {
                for i in 0..5 {
                    let a = action(&format!("ACT-c{}-{}", t, i), ActionType::LogOnly, 100);
                    let status = gate.evaluate_action(&a, false).status;
                    results.lock().unwrap().push(status);
                }
            });
        }
    });

    let results = results.into_inner().unwrap();
    assert_eq!(results.len(), 50);
    let executed = results
        .iter()
        .filter(|s| **s == ExecutionStatus::Executed)
        .count();
    let rejected = results
        .iter()
        .filter(|s| **s == ExecutionStatus::Rejected)
        .count();
    assert_eq!(executed, 10);
    assert_eq!(rejected, 40);
}

#[test]
fn human_rejection_and_approval() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let (gate, _rx) = gate_with(GatePolicy::default(), dispatcher.clone());
    let a = action("ACT-h", ActionType::LockAccount, 40);

    let rejected = gate.human_approve(&a, "analyst-1", false, Some("false positive: VPN"));
    assert_eq!(rejected.status, ExecutionStatus::Rejected);
    assert_eq!(rejected.analyst_id.as_deref(), Some("analyst-1"));
    assert!(rejected.reason.contains("false positive"));
    assert!(dispatcher.applied.lock().unwrap().is_empty());

    gate.trip_breaker("incident review");
    let approved = gate.human_approve(&a, "analyst-2", true, None);
    assert_eq!(approved.status, ExecutionStatus::Executed);
    assert_eq!(approved.analyst_id.as_deref(), Some("analyst-2"));
    assert_eq!(approved.reason, "Approved by human analyst");
    assert!(approved.rollback_by.is_none());
    assert_eq!(dispatcher.applied.lock().unwrap().len(), 1);
}

#[test]
fn human_approval_bypasses_rate_limit_but_counts() {
    let policy = GatePolicy {
        max_actions_per_hour: 2,
        max_actions_per_minute: 2,
        ..GatePolicy::default()
    };
    let (gate, _rx) = gate_with(policy, Arc::new(LoggingDispatcher));
    for i in 0..2 {
        gate.evaluate_action(&action(&format!("ACT-x{}", i), ActionType::LogOnly, 100), false);
    }
    let approved = gate.human_approve(&action("ACT-x2", ActionType::LogOnly, 100), "analyst-3", true, None);
    assert_eq!(approved.status, ExecutionStatus::Executed);
    assert_eq!(gate.recent_action_count(), 3);
}

#[test]
fn human_approval_with_failing_dispatch_is_failed() {
    let (gate, _rx) = gate_with(GatePolicy::default(), Arc::new(FailingDispatcher));
    let result = gate.human_approve(&action("ACT-hf", ActionType::BlockIp, 50), "analyst-4", true, None);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.analyst_id.as_deref(), Some("analyst-4"));
}

#[test]
fn rollback_reverses_executed_actions_only() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let (gate, _rx) = gate_with(GatePolicy::default(), dispatcher.clone());

    let unknown = gate.rollback("ACT-nope", "cleanup");
    assert_eq!(unknown.status, ExecutionStatus::Failed);

    gate.evaluate_action(&action("ACT-rb", ActionType::RateLimit, 75), false);
    let rolled = gate.rollback("ACT-rb", "false positive confirmed");
    assert_eq!(rolled.status, ExecutionStatus::RolledBack);
    assert!(rolled.reason.contains("false positive confirmed"));
    assert_eq!(dispatcher.reversed.lock().unwrap().len(), 1);

    let again = gate.rollback("ACT-rb", "twice");
    assert_eq!(again.status, ExecutionStatus::Failed);
}

#[test]
fn account_lock_needs_manual_unlock() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let (gate, _rx) = gate_with(GatePolicy::default(), dispatcher.clone());
    let lock = action("ACT-lock", ActionType::LockAccount, 96);
    assert_eq!(gate.evaluate_action(&lock, false).status, ExecutionStatus::Executed);

    let refused = gate.rollback("ACT-lock", "expired");
    assert_eq!(refused.status, ExecutionStatus::Rejected);
    assert!(dispatcher.reversed.lock().unwrap().is_empty());

    let unlocked = gate.unlock_account("ACT-lock", "analyst-5");
    assert_eq!(unlocked.status, ExecutionStatus::RolledBack);
    assert_eq!(unlocked.analyst_id.as_deref(), Some("analyst-5"));
    assert_eq!(
        dispatcher.reversed.lock().unwrap().as_slice(),
        &[RemediationCommand::LockAccount {
            user_id: "user-42".to_string()
        }]
    );

    let rate = action("ACT-notlock", ActionType::RateLimit, 80);
    gate.evaluate_action(&rate, false);
    assert_eq!(
        gate.unlock_account("ACT-notlock", "analyst-5").status,
        ExecutionStatus::Failed
    );
}

#[test]
fn failed_apply_leaves_nothing_to_roll_back() {
    let (gate, _rx) = gate_with(GatePolicy::default(), Arc::new(FailingDispatcher));
    gate.human_approve(&action("ACT-k", ActionType::RateLimit, 10), "analyst-6", true, None);
    // Apply failed, so nothing was ever recorded as executed.
    assert_eq!(gate.rollback("ACT-k", "x").status, ExecutionStatus::Failed);
}
