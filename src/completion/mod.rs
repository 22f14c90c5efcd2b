use async_trait::async_trait;
use serde_json::Value;

pub mod error;
pub mod ollama;
pub mod types;

pub use error::{CompletionError, CompletionErrorKind};
pub use ollama::OllamaCompletionClient;
pub use types::{ChatMessage, ChatRole, CompletionConfig};

/// One request/response exchange against the completion engine.
///
/// `format` is an optional JSON schema the reply content must conform to.
/// Implementations may take unbounded wall-clock time; callers decide how
/// to treat failures.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        format: Option<&Value>,
    ) -> Result<ChatMessage, CompletionError>;
}
