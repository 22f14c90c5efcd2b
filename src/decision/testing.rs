//! Scripted collaborators for exercising the orchestrator without a model or a socket.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::Instant,
};

use crate::{
    completion::{ChatMessage, CompletionClient, CompletionError, CompletionErrorKind},
    decision::ports::{ActionEmitter, EmitError},
    protocol::{Action, ActionSchema, OutboundMessage},
};

/// A string schema is treated as JSON-encoded text.
pub fn test_action(name: &str, description: &str, schema: Option<Value>) -> Action {
    Action {
        name: name.to_string(),
        description: description.to_string(),
        schema: schema.map(|schema| match schema {
            Value::String(text) => ActionSchema::Encoded(text),
            other => ActionSchema::Structured(other),
        }),
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub format: Option<Value>,
    pub started_at: Instant,
}

enum ScriptedReply {
    Content(String),
    Failure(CompletionError),
    Held {
        content: String,
        release: oneshot::Receiver<()>,
    },
}

/// Completion client that answers from a queue of scripted replies.
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency_ms: AtomicU64,
    started: watch::Sender<usize>,
}

impl ScriptedCompletion {
    pub fn new() -> Arc<Self> {
        let (started, _) = watch::channel(0);
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            latency_ms: AtomicU64::new(0),
            started,
        })
    }

    pub fn push_reply(&self, content: impl Into<String>) {
        lock(&self.replies).push_back(ScriptedReply::Content(content.into()));
    }

    pub fn push_failure(&self, error: CompletionError) {
        lock(&self.replies).push_back(ScriptedReply::Failure(error));
    }

    /// Queues a reply that is only returned once the sender fires (or is dropped).
    pub fn push_held_reply(&self, content: impl Into<String>) -> oneshot::Sender<()> {
        let (release_tx, release) = oneshot::channel();
        lock(&self.replies).push_back(ScriptedReply::Held {
            content: content.into(),
            release,
        });
        release_tx
    }

    /// Every call sleeps this long before answering, so overlapping calls stay visible.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        *self.started.borrow()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Resolves once at least `count` calls have started.
    pub async fn wait_for_calls(&self, count: usize) {
        let mut observer = self.started.subscribe();
        let _ = observer.wait_for(|started| *started >= count).await;
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        format: Option<&Value>,
    ) -> Result<ChatMessage, CompletionError> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        lock(&self.calls).push(RecordedCall {
            messages: messages.to_vec(),
            format: format.cloned(),
            started_at: Instant::now(),
        });
        let next = lock(&self.replies).pop_front();
        self.started.send_modify(|started| *started += 1);

        tokio::task::yield_now().await;
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let result = match next {
            Some(ScriptedReply::Content(content)) => Ok(ChatMessage::assistant(content)),
            Some(ScriptedReply::Failure(error)) => Err(error),
            Some(ScriptedReply::Held { content, release }) => {
                let _ = release.await;
                Ok(ChatMessage::assistant(content))
            }
            None => Err(CompletionError::new(
                CompletionErrorKind::BackendTransient,
                "no scripted reply queued",
            )),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Emitter that keeps every outbound message and forwards it to a channel.
pub struct RecordingEmitter {
    sent: Mutex<Vec<OutboundMessage>>,
    forward: mpsc::UnboundedSender<OutboundMessage>,
}

impl RecordingEmitter {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        lock(&self.sent).clone()
    }
}

impl ActionEmitter for RecordingEmitter {
    fn emit(&self, message: OutboundMessage) -> Result<(), EmitError> {
        lock(&self.sent).push(message.clone());
        let _ = self.forward.send(message);
        Ok(())
    }
}

pub fn recording_emitter() -> (
    Arc<RecordingEmitter>,
    mpsc::UnboundedReceiver<OutboundMessage>,
) {
    let (forward, outbound) = mpsc::unbounded_channel();
    let emitter = Arc::new(RecordingEmitter {
        sent: Mutex::new(Vec::new()),
        forward,
    });
    (emitter, outbound)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
