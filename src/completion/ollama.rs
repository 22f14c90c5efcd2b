use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, header};
use serde_json::{Map, Value, json};

use crate::completion::{
    CompletionClient,
    error::{
        CompletionError, CompletionErrorKind, internal_error, invalid_request, map_http_error,
        protocol_violation,
    },
    types::{ChatMessage, CompletionConfig},
};

/// Completion client for an Ollama `POST /api/chat` endpoint, non-streaming.
#[derive(Clone)]
pub struct OllamaCompletionClient {
    client: Client,
    config: CompletionConfig,
}

impl OllamaCompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| internal_error(format!("unable to build http client: {}", err)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }
}

#[async_trait]
impl CompletionClient for OllamaCompletionClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        format: Option<&Value>,
    ) -> Result<ChatMessage, CompletionError> {
        let endpoint = self.config.endpoint.trim();
        if endpoint.is_empty() {
            return Err(invalid_request("ollama backend requires endpoint"));
        }

        let url = format!("{}/api/chat", endpoint.trim_end_matches('/'));
        let body = build_chat_body(&self.config, messages, format);
        let started_at = Instant::now();

        if let Some(last) = messages.last() {
            tracing::debug!(
                target: "completion.ollama",
                model = %self.config.model,
                messages = messages.len(),
                constrained = format.is_some(),
                role = ?last.role,
                content = %last.content,
                "ollama_request"
            );
        }

        let response = self
            .client
            .post(url)
            .timeout(self.config.request_timeout())
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(
                target: "completion.ollama",
                status = status.as_u16(),
                body_bytes = body.len(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "ollama_http_non_success"
            );
            return Err(map_http_error(status.as_u16(), &body));
        }

        let payload = response.json::<Value>().await.map_err(|err| {
            protocol_violation(format!("invalid ollama response payload: {}", err))
        })?;
        let reply = parse_chat_payload(&payload)?;

        let prompt_eval_count = payload.get("prompt_eval_count").and_then(Value::as_u64);
        let eval_count = payload.get("eval_count").and_then(Value::as_u64);
        tracing::debug!(
            target: "completion.ollama",
            model = %self.config.model,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            prompt_eval_count,
            eval_count,
            content = %reply.content,
            "ollama_reply"
        );

        Ok(reply)
    }
}

fn map_transport_error(err: reqwest::Error) -> CompletionError {
    if err.is_timeout() {
        return CompletionError::new(
            CompletionErrorKind::Timeout,
            format!("ollama request timed out: {}", err),
        );
    }
    CompletionError::new(
        CompletionErrorKind::BackendTransient,
        format!("ollama request failed: {}", err),
    )
}

pub(crate) fn build_chat_body(
    config: &CompletionConfig,
    messages: &[ChatMessage],
    format: Option<&Value>,
) -> Value {
    let mut options = Map::new();
    if let Some(temperature) = config.temperature {
        options.insert("temperature".to_string(), json!(temperature));
    }
    options.insert("num_ctx".to_string(), json!(config.context_length));
    for (key, value) in &config.options {
        options.insert(key.clone(), value.clone());
    }

    let mut body = json!({
        "model": config.model,
        "messages": messages,
        "stream": false,
        "options": Value::Object(options),
    });
    if let Some(format) = format {
        body["format"] = format.clone();
    }
    body
}

pub(crate) fn parse_chat_payload(payload: &Value) -> Result<ChatMessage, CompletionError> {
    if let Some(error) = payload.get("error").and_then(Value::as_str) {
        return Err(CompletionError::new(
            CompletionErrorKind::BackendPermanent,
            format!("ollama reported error: {}", error),
        ));
    }

    let content = payload
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| protocol_violation("ollama response is missing message.content"))?;

    Ok(ChatMessage::assistant(content))
}
