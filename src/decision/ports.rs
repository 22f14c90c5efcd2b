use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::OutboundMessage;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    #[error("no peer is connected to receive the event")]
    NoReceivers,
    #[error("outbound channel is closed")]
    Closed,
}

/// Outbound half of the protocol, implemented by the transport.
pub trait ActionEmitter: Send + Sync {
    fn emit(&self, message: OutboundMessage) -> Result<(), EmitError>;
}

impl ActionEmitter for mpsc::UnboundedSender<OutboundMessage> {
    fn emit(&self, message: OutboundMessage) -> Result<(), EmitError> {
        self.send(message).map_err(|_| EmitError::Closed)
    }
}
