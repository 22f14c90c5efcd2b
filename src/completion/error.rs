use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionErrorKind {
    InvalidRequest,
    Authentication,
    RateLimited,
    Timeout,
    BackendTransient,
    BackendPermanent,
    ProtocolViolation,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionError {
    pub kind: CompletionErrorKind,
    pub message: String,
    pub retryable: bool,
    pub http_status: Option<u16>,
}

impl CompletionError {
    pub fn new(kind: CompletionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: matches!(
                kind,
                CompletionErrorKind::RateLimited
                    | CompletionErrorKind::Timeout
                    | CompletionErrorKind::BackendTransient
            ),
            http_status: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.http_status {
            Some(status) => write!(f, "{} (status={})", self.message, status),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CompletionError {}

pub fn invalid_request(message: impl Into<String>) -> CompletionError {
    CompletionError::new(CompletionErrorKind::InvalidRequest, message).with_retryable(false)
}

pub fn protocol_violation(message: impl Into<String>) -> CompletionError {
    CompletionError::new(CompletionErrorKind::ProtocolViolation, message).with_retryable(false)
}

pub fn internal_error(message: impl Into<String>) -> CompletionError {
    CompletionError::new(CompletionErrorKind::Internal, message).with_retryable(false)
}

/// Maps a non-success HTTP status to an error, keeping a bounded excerpt of the body.
pub fn map_http_error(status: u16, body: &str) -> CompletionError {
    let normalized_body = body.chars().take(240).collect::<String>();

    let mut err = if status == 401 || status == 403 {
        CompletionError::new(
            CompletionErrorKind::Authentication,
            format!("backend rejected credentials with status {}", status),
        )
        .with_retryable(false)
    } else if status == 408 || status == 429 {
        CompletionError::new(
            CompletionErrorKind::RateLimited,
            format!("backend returned status {}", status),
        )
    } else if (400..500).contains(&status) {
        invalid_request(format!("backend returned status {}", status))
    } else {
        CompletionError::new(
            CompletionErrorKind::BackendTransient,
            format!("backend returned status {}", status),
        )
    };

    err = err.with_http_status(status);
    if !normalized_body.is_empty() {
        err.message = format!("{}: {}", err.message, normalized_body);
    }

    err
}
