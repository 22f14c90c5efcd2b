use thiserror::Error;

use crate::{completion::CompletionError, decision::ports::EmitError};

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("action '{0}' is not registered")]
    ActionNotFound(String),
    #[error("invalid schema for action '{name}': {source}")]
    InvalidSchema {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("completion engine failed: {0}")]
    CompletionEngineFailure(#[from] CompletionError),
    #[error("malformed model reply: {reason}")]
    MalformedModelReply { reason: String, content: String },
    #[error("failed to emit action {id}: {source}")]
    Emit {
        id: String,
        #[source]
        source: EmitError,
    },
    #[error("no result received for action {id}")]
    NoResult { id: String },
    #[error("no result for action {id} within {waited_ms}ms")]
    Timeout { id: String, waited_ms: u64 },
    #[error("forced decision gave up after {attempts} attempts: {last}")]
    ForceAttemptsExhausted {
        attempts: u32,
        #[source]
        last: Box<DecisionError>,
    },
}

impl DecisionError {
    pub(crate) fn malformed(reason: impl Into<String>, content: &str) -> Self {
        DecisionError::MalformedModelReply {
            reason: reason.into(),
            content: content.to_string(),
        }
    }
}
