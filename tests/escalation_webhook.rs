use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use autotriage::config::GatePolicy;
use autotriage::response::{
    escalation_channel, Action, ActionExecutor, ActionType, BlastRadius, ExecutionStatus,
    LoggingDispatcher, WebhookNotifier,
};
use httpmock::prelude::*;

fn action(id: &str, confidence: u8) -> Action {
    let mut target = BTreeMap::new();
    target.insert("user_id".to_string(), "user-9".to_string());
    target.insert("ip".to_string(), "45.67.89.12".to_string());
    Action {
        id: id.to_string(),
        action_type: ActionType::BlockIp,
        target,
        confidence,
        blast_radius: BlastRadius::SingleUser,
        reversible: true,
        auto_expire: Some(Duration::from_secs(3600)),
        justification: "burst from one address".to_string(),
        metadata: BTreeMap::new(),
    }
}

#[tokio::test]
async fn escalations_are_posted_to_webhook() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hooks/triage")
                .header("content-type", "application/json")
                .body_contains("\"text\"")
                .body_contains("below threshold");
            then.status(200);
        })
        .await;

    let (tx, rx) = escalation_channel();
    let gate = ActionExecutor::new(GatePolicy::default(), Arc::new(LoggingDispatcher), tx).unwrap();
    assert_eq!(
        gate.evaluate_action(&action("ACT-w1", 50), false).status,
        ExecutionStatus::Escalated
    );
    assert_eq!(
        gate.evaluate_action(&action("ACT-w2", 60), false).status,
        ExecutionStatus::Escalated
    );
    assert_eq!(
        gate.evaluate_action(&action("ACT-w3", 95), false).status,
        ExecutionStatus::Executed
    );
    drop(gate);

    let notifier = WebhookNotifier::new(server.url("/hooks/triage"), Duration::from_secs(5)).unwrap();
    let delivered = notifier.run(rx).await;
    assert_eq!(delivered, 2);
    hook.assert_hits_async(2).await;
}

#[tokio::test]
async fn webhook_errors_are_counted_as_undelivered() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST).path("/hooks/triage");
            then.status(500);
        })
        .await;

    let (tx, rx) = escalation_channel();
    let gate = ActionExecutor::new(GatePolicy::default(), Arc::new(LoggingDispatcher), tx).unwrap();
    gate.evaluate_action(&action("ACT-w4", 10), false);
    drop(gate);

    let notifier = WebhookNotifier::new(server.url("/hooks/triage"), Duration::from_secs(5)).unwrap();
    assert_eq!(notifier.run(rx).await, 0);
    hook.assert_hits_async(1).await;
}
