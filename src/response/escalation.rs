//! Hand-off of escalated actions to human review. The gate pushes every
//! `Escalated` result here; reviewers pull from the receiver or forward it to a
//! webhook with [`WebhookNotifier`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::error::TriageError;
use crate::core::time::now_utc;
use crate::response::action::{Action, ExecutionResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Escalation {
    pub action: Action,
    pub result: ExecutionResult,
    pub queued_at: DateTime<Utc>,
}

impl Escalation {
    pub fn summary(&self) -> String {
        let target: Vec<String> = self
            .action
            .target
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!(
            "{} {} [{}] confidence={}: {}",
            self.action.id,
            self.action.action_type,
            target.join(","),
            self.action.confidence,
            self.result.reason
        )
    }
}

pub fn escalation_channel() -> (EscalationSender, EscalationReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EscalationSender { tx }, EscalationReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct EscalationSender {
    tx: mpsc::UnboundedSender<Escalation>,
}

impl EscalationSender {
    /// Non-blocking; usable from sync code and from inside a runtime.
    pub fn send(&self, action: &Action, result: &ExecutionResult) -> Result<(), TriageError> {
        let item = Escalation {
            action: action.clone(),
            result: result.clone(),
            queued_at: now_utc(),
        };
        self.tx
            .send(item)
            .map_err(|e| TriageError::Escalation(format!("queue closed, dropped {}", e.0.action.id)))
    }
}

#[derive(Debug)]
pub struct EscalationReceiver {
    rx: mpsc::UnboundedReceiver<Escalation>,
}

impl EscalationReceiver {
    pub async fn recv(&mut self) -> Option<Escalation> {
        self.rx.recv().await
    }

    /// Everything queued so far, without waiting.
    pub fn try_drain(&mut self) -> Vec<Escalation> {
        let mut out = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            out.push(item);
        }
        out
    }
}

/// Posts escalations to a chat-style webhook as `{"text": ...}`.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TriageError> {
        let client = Client::builder()
            .user_agent(concat!("autotriage/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(TriageError::from)?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn notify(&self, escalation: &Escalation) -> Result<(), TriageError> {
        let text = format!("Escalation pending review\n- {}", escalation.summary());
        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Forwards until every sender is dropped. Returns how many were delivered.
    pub async fn run(&self, mut receiver: EscalationReceiver) -> usize {
        let mut delivered = 0;
        while let Some(item) = receiver.recv().await {
            match self.notify(&item).await {
                Ok(()) => delivered += 1,
                Err(err) => tracing::error!("webhook delivery for {} failed: {}", item.action.id, err),
            }
        }
        delivered
    }
}
