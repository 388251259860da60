use std::time::Duration;

use serde::Serialize;

use crate::core::error::TriageError;
use crate::response::action::{Action, ActionType};

/// One variant per action type, each carrying the target fields it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemediationCommand {
    LogOnly,
    RateLimit { ip: String, duration: Option<Duration> },
    RequireMfa { user_id: String },
    RevokeSessions { user_id: String },
    BlockIp { ip: String, duration: Option<Duration> },
    LockAccount { user_id: String },
    RevokeApiKey { api_key_id: String },
    DisableServiceAccount { account_id: String },
}

impl RemediationCommand {
    pub fn from_action(action: &Action) -> Result<Self, TriageError> {
        let field = |name: &str| {
            action
                .target_field(name)
                .map(str::to_string)
                .ok_or_else(|| TriageError::MissingTarget {
                    action: action.action_type.to_string(),
                    field: name.to_string(),
                })
        };
        let command = match action.action_type {
            ActionType::LogOnly => RemediationCommand::LogOnly,
            ActionType::RateLimit => RemediationCommand::RateLimit {
                ip: field("ip")?,
                duration: action.auto_expire,
            },
            ActionType::RequireMfa => RemediationCommand::RequireMfa {
                user_id: field("user_id")?,
            },
            ActionType::RevokeSession => RemediationCommand::RevokeSessions {
                user_id: field("user_id")?,
            },
            ActionType::BlockIp => RemediationCommand::BlockIp {
                ip: field("ip")?,
                duration: action.auto_expire,
            },
            ActionType::LockAccount => RemediationCommand::LockAccount {
                user_id: field("user_id")?,
            },
            ActionType::RevokeApiKey => RemediationCommand::RevokeApiKey {
                api_key_id: field("api_key_id")?,
            },
            ActionType::DisableServiceAccount => RemediationCommand::DisableServiceAccount {
                account_id: field("user_id")?,
            },
        };
        Ok(command)
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            RemediationCommand::LogOnly => ActionType::LogOnly,
            RemediationCommand::RateLimit { .. } => ActionType::RateLimit,
            RemediationCommand::RequireMfa { .. } => ActionType::RequireMfa,
            RemediationCommand::RevokeSessions { .. } => ActionType::RevokeSession,
            RemediationCommand::BlockIp { .. } => ActionType::BlockIp,
            RemediationCommand::LockAccount { .. } => ActionType::LockAccount,
            RemediationCommand::RevokeApiKey { .. } => ActionType::RevokeApiKey,
            RemediationCommand::DisableServiceAccount { .. } => ActionType::DisableServiceAccount,
        }
    }

    /// The entity the command acts on, for audit records.
    pub fn target(&self) -> &str {
        match self {
            RemediationCommand::LogOnly => "-",
            RemediationCommand::RateLimit { ip, .. } | RemediationCommand::BlockIp { ip, .. } => ip,
            RemediationCommand::RequireMfa { user_id }
            | RemediationCommand::RevokeSessions { user_id }
            | RemediationCommand::LockAccount { user_id } => user_id,
            RemediationCommand::RevokeApiKey { api_key_id } => api_key_id,
            RemediationCommand::DisableServiceAccount { account_id } => account_id,
        }
    }
}

/// Side-effecting integration point (firewall, IdP, IAM). Implementations own
/// their own timeouts and retries.
pub trait ActionDispatcher: Send + Sync {
    fn apply(&self, command: &RemediationCommand) -> Result<(), TriageError>;
    fn reverse(&self, command: &RemediationCommand) -> Result<(), TriageError>;
}

/// Default dispatcher: records what would be done and touches nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDispatcher;

impl ActionDispatcher for LoggingDispatcher {
    fn apply(&self, command: &RemediationCommand) -> Result<(), TriageError> {
        match command {
            RemediationCommand::LogOnly => tracing::info!("log-only action recorded"),
            RemediationCommand::RateLimit { ip, duration } => {
                tracing::info!("rate limiting {} for {:?}", ip, duration)
            }
            RemediationCommand::RequireMfa { user_id } => {
                tracing::info!("requiring MFA for {}", user_id)
            }
            RemediationCommand::RevokeSessions { user_id } => {
                tracing::info!("revoking sessions for {}", user_id)
            }
            RemediationCommand::BlockIp { ip, duration } => {
                tracing::info!("blocking {} for {:?}", ip, duration)
            }
            RemediationCommand::LockAccount { user_id } => {
                tracing::info!("locking account {}", user_id)
            }
            RemediationCommand::RevokeApiKey { api_key_id } => {
                tracing::info!("revoking api key {}", api_key_id)
            }
            RemediationCommand::DisableServiceAccount { account_id } => {
                tracing::info!("disabling service account {}", account_id)
            }
        }
        Ok(())
    }

    fn reverse(&self, command: &RemediationCommand) -> Result<(), TriageError> {
        tracing::info!(
            "reversing {} on {}",
            command.action_type(),
            command.target()
        );
        Ok(())
    }
}
