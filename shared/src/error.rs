//! Error taxonomy shared by the codec, the transport and both endpoints

use crate::endpoint::EndpointState;
use crate::message::PeerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    /// The datagram host could not bind, resolve or complete its handshake.
    #[error("transport initialisation failed: {0}")]
    TransportInitFailed(String),

    /// A buffer was too short or otherwise unreadable for its declared kind.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unknown message kind {0:#04x}")]
    UnknownMessageKind(u8),

    #[error("peer {0} not found")]
    PeerNotFound(PeerId),

    #[error("operation not valid while endpoint is {0:?}")]
    InvalidState(EndpointState),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        NetError::MalformedMessage(reason.into())
    }

    /// Per-packet errors are dropped by the receive loop instead of propagated.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NetError::MalformedMessage(_) | NetError::UnknownMessageKind(_) | NetError::PeerNotFound(_)
        )
    }
}
