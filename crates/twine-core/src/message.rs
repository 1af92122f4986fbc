//! Message kinds of the streaming protocol.
//!
//! Two layers coexist on the wire. The control layer frames the envelope
//! of a call between an engine and a worker. The typed layer is the
//! per-event subprotocol carried inside that envelope: any number of
//! `chunk`s followed by a terminal `choke`, with `error` reporting a
//! failure immediately before the `choke`.

use thiserror::Error;

/// Control-layer message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlKind {
    /// engine -> worker: invoke an event handler.
    Invoke = 1,
    /// engine -> worker: shut the session down.
    Terminate = 2,
    /// worker -> engine: one part of a result is ready.
    Chunk = 10,
    /// worker -> engine: the stream is complete.
    Choke = 11,
    /// worker -> engine: the invocation failed.
    Error = 12,
    /// worker -> engine: the worker asks to be retired.
    Suicide = 13,
    /// worker -> engine: liveness signal.
    Heartbeat = 14,
}

impl ControlKind {
    /// The wire representation of this kind.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A control-kind byte that maps to no known message kind.
#[derive(Debug, Clone, Copy, Error)]
#[error("unknown control kind: {0}")]
pub struct UnknownKind(pub u8);

impl TryFrom<u8> for ControlKind {
    type Error = UnknownKind;

    fn try_from(value: u8) -> Result<Self, UnknownKind> {
        match value {
            1 => Ok(Self::Invoke),
            2 => Ok(Self::Terminate),
            10 => Ok(Self::Chunk),
            11 => Ok(Self::Choke),
            12 => Ok(Self::Error),
            13 => Ok(Self::Suicide),
            14 => Ok(Self::Heartbeat),
            other => Err(UnknownKind(other)),
        }
    }
}

/// One message of the typed streaming layer for an event producing `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Streaming<T> {
    /// One produced value.
    Chunk(T),
    /// Terminal failure. Producers always follow it with [`Streaming::Choke`].
    Error {
        /// Stable numeric code, see [`crate::code`].
        code: i32,
        /// Human-readable reason.
        reason: String,
    },
    /// Terminal end-of-stream marker.
    Choke,
}

impl<T> Streaming<T> {
    /// Whether this message ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Choke)
    }
}
