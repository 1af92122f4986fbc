//! Typed channels over framed sockets.
//!
//! A channel packs and unpacks self-describing values as the frames of a
//! multipart message: one value per frame, tuples as consecutive frames
//! with the MORE hint set on every element but the last. Raw sends skip
//! the encoding pass for payloads that are already wire-ready.

use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::error::{ChannelError, TransportError};
use crate::socket::{Direction, FramedSocket, SocketKind};

/// A typed view over a framed socket.
pub struct Channel {
    socket: FramedSocket,
}

impl Channel {
    pub fn new(socket: FramedSocket) -> Self {
        Self { socket }
    }

    pub fn bind(&mut self, endpoint: &str) -> Result<(), TransportError> {
        self.socket.bind(endpoint)
    }

    pub fn connect(&mut self, endpoint: &str) -> Result<(), TransportError> {
        self.socket.connect(endpoint)
    }

    pub fn kind(&self) -> SocketKind {
        self.socket.kind()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.socket.endpoint()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn has_more(&self) -> bool {
        self.socket.has_more()
    }

    pub fn pending(&mut self, direction: Direction) -> Result<bool, TransportError> {
        self.socket.pending(direction)
    }

    pub fn poll_readable(&mut self, timeout: Option<Duration>) -> Result<bool, TransportError> {
        self.socket.poll_readable(timeout)
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.socket.fd()
    }

    pub fn poll_fds(&self) -> Vec<RawFd> {
        self.socket.poll_fds()
    }

    /// Pack and send a single value.
    pub fn send<T>(&mut self, value: &T, more: bool) -> Result<(), ChannelError>
    where
        T: Serialize + ?Sized,
    {
        let buf = rmp_serde::to_vec(value).map_err(|e| ChannelError::Encode(e.to_string()))?;
        self.socket.send_frame(&buf, more)?;
        Ok(())
    }

    /// Send bytes as one frame, without an encoding pass.
    pub fn send_raw(&mut self, payload: &[u8], more: bool) -> Result<(), ChannelError> {
        self.socket.send_frame(payload, more)?;
        Ok(())
    }

    /// Send a tuple as one multipart message, MORE set on every element
    /// but the last.
    ///
    /// On failure the message is truncated: the remaining elements are
    /// not attempted, and the frames already queued are discarded so
    /// they cannot leak into the next message.
    pub fn send_tuple<T: SendMulti>(&mut self, tuple: &T) -> Result<(), ChannelError> {
        let result = tuple.send_multi(self);
        if result.is_err() {
            self.socket.abort_message();
        }
        result
    }

    /// Receive and unpack a single value. Subsequent frames of the same
    /// message are left queued.
    pub fn recv<T: DeserializeOwned>(&mut self) -> Result<T, ChannelError> {
        let frame = self.socket.recv_frame()?;
        match rmp_serde::from_slice(&frame) {
            Ok(value) => Ok(value),
            Err(e) => {
                error!("net: [recv] corrupted object - {}", e);
                Err(ChannelError::Decode(e.to_string()))
            }
        }
    }

    /// Receive one frame without a decoding pass.
    pub fn recv_raw(&mut self) -> Result<Bytes, ChannelError> {
        Ok(self.socket.recv_frame()?)
    }

    /// Receive a tuple, one element per frame, in declared order. Fewer
    /// frames than the tuple arity is an error.
    pub fn recv_tuple<T: RecvMulti>(&mut self) -> Result<T, ChannelError> {
        T::recv_multi(self)
    }

    /// Discard the remaining frames of the current message.
    pub fn drop_message(&mut self) -> Result<(), ChannelError> {
        while self.socket.has_more() {
            self.socket.recv_frame()?;
        }
        Ok(())
    }

    fn recv_element<T: DeserializeOwned>(&mut self, first: &mut bool) -> Result<T, ChannelError> {
        if !std::mem::take(first) && !self.has_more() {
            return Err(ChannelError::ShortMessage);
        }
        self.recv()
    }
}

/// Heterogeneous tuples sendable as one multipart message.
pub trait SendMulti {
    fn send_multi(&self, channel: &mut Channel) -> Result<(), ChannelError>;
}

/// Heterogeneous tuples receivable from one multipart message.
pub trait RecvMulti: Sized {
    fn recv_multi(channel: &mut Channel) -> Result<Self, ChannelError>;
}

macro_rules! multi_impls {
    ( $( ( $($head:ident : $head_index:tt),* => $last:ident : $last_index:tt ) ),+ $(,)? ) => { $(
        impl<$($head: Serialize,)* $last: Serialize> SendMulti for ($($head,)* $last,) {
            fn send_multi(&self, channel: &mut Channel) -> Result<(), ChannelError> {
                $( channel.send(&self.$head_index, true)?; )*
                channel.send(&self.$last_index, false)
            }
        }

        impl<$($head: DeserializeOwned,)* $last: DeserializeOwned> RecvMulti for ($($head,)* $last,) {
            fn recv_multi(channel: &mut Channel) -> Result<Self, ChannelError> {
                let mut first = true;
                Ok((
                    $( channel.recv_element::<$head>(&mut first)?, )*
                    channel.recv_element::<$last>(&mut first)?,
                ))
            }
        }
    )+ }
}

multi_impls! {
    ( => A:0),
    (A:0 => B:1),
    (A:0, B:1 => C:2),
    (A:0, B:1, C:2 => D:3),
    (A:0, B:1, C:2, D:3 => E:4),
    (A:0, B:1, C:2, D:3, E:4 => F:5),
}
