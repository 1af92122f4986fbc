//! Transport and channel error taxonomy.

use thiserror::Error;

/// Failure at the framed-socket layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An underlying socket operation failed.
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint string could not be parsed or resolved.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The socket has no connected peer to carry the message.
    #[error("socket has no connected peer")]
    NotConnected,

    /// The leading routing frame names no connected peer.
    #[error("no connected peer for route")]
    UnknownRoute,

    /// The peer went away before the message completed.
    #[error("peer disconnected mid-message")]
    Disconnected,

    /// The operation is not valid for this socket kind.
    #[error("socket kind cannot {0}")]
    Unsupported(&'static str),

    /// A frame on the wire violated the codec.
    #[error(transparent)]
    Frame(#[from] crate::frame::FrameError),
}

/// Failure at the typed-channel layer.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A received frame did not decode to the requested type.
    #[error("corrupted object - {0}")]
    Decode(String),

    /// The outgoing value could not be serialized.
    #[error("value serialization failed: {0}")]
    Encode(String),

    /// The message ended before every expected frame arrived.
    #[error("message truncated: expected another frame")]
    ShortMessage,
}
