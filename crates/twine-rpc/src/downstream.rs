//! Client-side consumption of streaming replies.

use serde::de::DeserializeOwned;
use thiserror::Error;
use twine_core::{ControlKind, Streaming, UnknownKind};
use twine_transport::{Channel, ChannelError};

/// Failure while reading a streaming reply.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),

    /// A control kind that does not belong to the streaming layer.
    #[error("unexpected control kind {0:?} on a streaming reply")]
    Unexpected(ControlKind),

    /// The reply ended before every expected frame arrived.
    #[error("streaming reply truncated")]
    Truncated,
}

/// Read one `(tag, message)` pair of a streaming reply.
///
/// The channel must be positioned at the control-kind frame: on routed
/// sockets the leading identity frame has to be consumed first.
pub fn recv_streaming<T: DeserializeOwned>(
    channel: &mut Channel,
) -> Result<(u64, Streaming<T>), ClientError> {
    let kind = ControlKind::try_from(channel.recv::<u8>()?)?;
    if !channel.has_more() {
        return Err(ClientError::Truncated);
    }
    let tag: u64 = channel.recv()?;

    let message = match kind {
        ControlKind::Chunk => {
            if !channel.has_more() {
                return Err(ClientError::Truncated);
            }
            Streaming::Chunk(channel.recv()?)
        }
        ControlKind::Error => {
            if !channel.has_more() {
                return Err(ClientError::Truncated);
            }
            let code: i32 = channel.recv()?;
            if !channel.has_more() {
                return Err(ClientError::Truncated);
            }
            let reason: String = channel.recv()?;
            Streaming::Error { code, reason }
        }
        ControlKind::Choke => Streaming::Choke,
        other => {
            channel.drop_message()?;
            return Err(ClientError::Unexpected(other));
        }
    };
    Ok((tag, message))
}
