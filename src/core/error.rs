use std::any::Any;
use std::io;

#[derive(thiserror::Error, Debug)]
pub enum TriageError {
    #[error("config error: {0}")]
    Config(String),
    #[error("detector {detector} failed: {message}")]
    Detector { detector: String, message: String },
    #[error("dispatch error: {0}")]
    Dispatch(String),
    #[error("action {action} requires target field '{field}'")]
    MissingTarget { action: String, field: String },
    #[error("escalation queue error: {0}")]
    Escalation(String),
    #[error("http error: {0}")]
    Http(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for TriageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TriageError::Http("timeout".to_string())
        } else {
            TriageError::Http(err.to_string())
        }
    }
}

impl From<toml::de::Error> for TriageError {
    fn from(err: toml::de::Error) -> Self {
        TriageError::Config(err.to_string())
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
