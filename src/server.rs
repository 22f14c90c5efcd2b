use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    net::{TcpListener, TcpStream},
    signal::unix::{SignalKind, signal},
    sync::broadcast::{self, error::RecvError},
    task::JoinSet,
};
use tokio_tungstenite::{
    WebSocketStream, accept_async,
    tungstenite::{Error as WsError, Message},
};
use tokio_util::sync::CancellationToken;

use crate::{
    completion::OllamaCompletionClient,
    config::Config,
    decision::{ActionEmitter, EmitError, Orchestrator, PeriodicScheduler},
    protocol::{OutboundMessage, encode_outbound_message, parse_inbound_message},
};

/// Fans every outbound action out to all connected peers.
#[derive(Debug, Clone)]
pub struct BroadcastEmitter {
    sender: broadcast::Sender<OutboundMessage>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.sender.subscribe()
    }
}

impl ActionEmitter for BroadcastEmitter {
    fn emit(&self, message: OutboundMessage) -> Result<(), EmitError> {
        self.sender
            .send(message)
            .map(|_| ())
            .map_err(|_| EmitError::NoReceivers)
    }
}

pub async fn run(config: Config) -> Result<()> {
    let completion = OllamaCompletionClient::new(config.completion.clone())
        .context("unable to build completion client")?;
    let emitter = Arc::new(BroadcastEmitter::new(config.server.outbound_capacity));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(completion),
        emitter.clone(),
        config.decision.clone(),
    ));

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("unable to bind {}", config.server.listen_addr))?;

    let mut sigint =
        signal(SignalKind::interrupt()).context("unable to listen for SIGINT (Ctrl+C)")?;
    let mut sigterm = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;

    let shutdown = CancellationToken::new();
    let serving = serve(listener, orchestrator, emitter, shutdown.clone());
    tokio::pin!(serving);

    let signal_name = tokio::select! {
        result = &mut serving => return result,
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };
    tracing::info!(target: "server", signal = signal_name, "shutdown_requested");
    shutdown.cancel();
    serving.await
}

/// Accepts WebSocket peers on `listener` until `shutdown` fires.
/// Every message in either direction is one JSON text frame.
pub async fn serve(
    listener: TcpListener,
    orchestrator: Arc<Orchestrator>,
    emitter: Arc<BroadcastEmitter>,
    shutdown: CancellationToken,
) -> Result<()> {
    let local_addr = listener
        .local_addr()
        .context("unable to read listener address")?;
    tracing::info!(target: "server", addr = %local_addr, "server_listening");

    let scheduler = match PeriodicScheduler::from_config(Arc::clone(&orchestrator)) {
        Some(scheduler) => Some(tokio::spawn(scheduler.run(shutdown.child_token()))),
        None => {
            tracing::info!(target: "server", "periodic_scheduler_disabled");
            None
        }
    };

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::info!(target: "server", peer = %peer, "peer_connected");
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        Arc::clone(&orchestrator),
                        emitter.subscribe(),
                        shutdown.child_token(),
                    ));
                }
                Err(err) => tracing::warn!(target: "server", error = %err, "accept_failed"),
            },
            Some(joined) = connections.join_next() => {
                if let Ok(Err(err)) = joined {
                    tracing::warn!(target: "server", error = %format!("{err:#}"), "connection_failed");
                }
            }
        }
    }

    connections.shutdown().await;
    if let Some(scheduler) = scheduler {
        let _ = scheduler.await;
    }
    tracing::info!(target: "server", "server_stopped");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    orchestrator: Arc<Orchestrator>,
    outbound: broadcast::Receiver<OutboundMessage>,
    shutdown: CancellationToken,
) -> Result<()> {
    let socket = accept_async(stream)
        .await
        .with_context(|| format!("websocket handshake with {peer} failed"))?;
    let (sink, frames) = socket.split();
    let writer_task = tokio::spawn(write_outbound(sink, outbound, peer, shutdown.clone()));

    let read_result = read_inbound(frames, peer, &orchestrator, &shutdown).await;

    shutdown.cancel();
    let _ = writer_task.await;
    tracing::info!(target: "server", peer = %peer, "peer_disconnected");
    read_result
}

async fn read_inbound(
    mut frames: SplitStream<WebSocketStream<TcpStream>>,
    peer: SocketAddr,
    orchestrator: &Arc<Orchestrator>,
    shutdown: &CancellationToken,
) -> Result<()> {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            frame = frames.next() => frame,
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => {
                tracing::debug!(target: "server", peer = %peer, len = bytes.len(), "binary_frame_ignored");
                continue;
            }
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(()),
            Some(Err(err)) => {
                return Err(err).with_context(|| format!("failed to read from {peer}"));
            }
        };
        let text = text.as_str().trim();
        if text.is_empty() {
            continue;
        }

        match parse_inbound_message(text) {
            Ok(message) => orchestrator.handle_inbound(message),
            Err(err) => tracing::warn!(
                target: "server",
                peer = %peer,
                error = %err,
                "inbound_message_dropped"
            ),
        }
    }
}

async fn write_outbound(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: broadcast::Receiver<OutboundMessage>,
    peer: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = outbound.recv() => received,
        };
        let message = match received {
            Ok(message) => message,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(target: "server", peer = %peer, skipped, "outbound_lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let frame =
            encode_outbound_message(&message).context("failed to encode outbound message")?;
        if let Err(err) = sink.send(Message::Text(frame.into())).await {
            tracing::warn!(target: "server", peer = %peer, error = %err, "outbound_write_failed");
            shutdown.cancel();
            return Ok(());
        }
    }
    let _ = sink.close().await;
    Ok(())
}
