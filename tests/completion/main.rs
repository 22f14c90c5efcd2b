use serde_json::{Value, json};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::oneshot,
};

use gamemind::completion::{
    ChatMessage, CompletionClient, CompletionConfig, CompletionErrorKind, OllamaCompletionClient,
};

struct CapturedRequest {
    request_line: String,
    body: Value,
}

/// Serves one HTTP response and hands back the request it received.
async fn spawn_ollama(status: &'static str, body: String) -> (String, oneshot::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let address = listener.local_addr().expect("local addr should exist");
    let (captured_tx, captured_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept should succeed");
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        let (head_end, content_length) = loop {
            let read = stream.read(&mut chunk).await.expect("request should be readable");
            assert!(read > 0, "client closed before sending headers");
            buffer.extend_from_slice(&chunk[..read]);
            if let Some(end) = find_header_end(&buffer) {
                let head = String::from_utf8_lossy(&buffer[..end]).to_string();
                break (end, content_length(&head));
            }
        };
        while buffer.len() < head_end + 4 + content_length {
            let read = stream.read(&mut chunk).await.expect("body should be readable");
            assert!(read > 0, "client closed before sending body");
            buffer.extend_from_slice(&chunk[..read]);
        }

        let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
        let body_bytes = &buffer[head_end + 4..head_end + 4 + content_length];
        let _ = captured_tx.send(CapturedRequest {
            request_line: head.lines().next().unwrap_or_default().to_string(),
            body: serde_json::from_slice(body_bytes).unwrap_or(Value::Null),
        });

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream
            .write_all(response.as_bytes())
            .await
            .expect("response should be written");
    });

    (format!("http://{address}"), captured_rx)
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

fn client(endpoint: String) -> OllamaCompletionClient {
    OllamaCompletionClient::new(CompletionConfig {
        endpoint,
        model: "llama3.2:latest".to_string(),
        ..CompletionConfig::default()
    })
    .expect("client should build")
}

#[tokio::test]
async fn given_chat_reply_when_complete_then_message_content_is_returned() {
    let reply = json!({
        "model": "llama3.2:latest",
        "message": {"role": "assistant", "content": "{\"message\":\"hello\",\"action\":\"jump\"}"},
        "done": true,
        "eval_count": 12
    })
    .to_string();
    let (endpoint, captured) = spawn_ollama("200 OK", reply).await;
    let format = json!({"type": "object", "required": ["message"]});

    let message = client(format!("{endpoint}/"))
        .complete(
            &[ChatMessage::system("play"), ChatMessage::user("what now?")],
            Some(&format),
        )
        .await
        .expect("completion should succeed");
    assert_eq!(message.content, "{\"message\":\"hello\",\"action\":\"jump\"}");

    let request = captured.await.expect("request should be captured");
    assert!(request.request_line.starts_with("POST /api/chat "));
    assert_eq!(request.body["model"], "llama3.2:latest");
    assert_eq!(request.body["stream"], false);
    assert_eq!(request.body["format"], format);
    assert_eq!(request.body["messages"][1]["content"], "what now?");
    assert_eq!(request.body["options"]["num_ctx"], 8192);
}

#[tokio::test]
async fn given_rate_limited_backend_when_complete_then_error_is_retryable() {
    let (endpoint, _captured) =
        spawn_ollama("429 Too Many Requests", r#"{"error":"slow down"}"#.to_string()).await;

    let err = client(endpoint)
        .complete(&[ChatMessage::user("hi")], None)
        .await
        .expect_err("429 should fail");
    assert_eq!(err.kind, CompletionErrorKind::RateLimited);
    assert!(err.retryable);
    assert_eq!(err.http_status, Some(429));
}

#[tokio::test]
async fn given_reply_without_message_when_complete_then_protocol_violation() {
    let (endpoint, _captured) = spawn_ollama("200 OK", r#"{"done":true}"#.to_string()).await;

    let err = client(endpoint)
        .complete(&[ChatMessage::user("hi")], None)
        .await
        .expect_err("missing content should fail");
    assert_eq!(err.kind, CompletionErrorKind::ProtocolViolation);
}

#[tokio::test]
async fn given_blank_endpoint_when_complete_then_invalid_request() {
    let err = client("  ".to_string())
        .complete(&[ChatMessage::user("hi")], None)
        .await
        .expect_err("blank endpoint should fail");
    assert_eq!(err.kind, CompletionErrorKind::InvalidRequest);
}
