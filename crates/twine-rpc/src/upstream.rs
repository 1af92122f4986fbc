//! Producer handles for streaming subprotocol instances.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{error, warn};
use twine_core::ControlKind;
use twine_transport::{Channel, ChannelError};

/// The producer end of one streaming subprotocol instance.
///
/// `chunk` bodies arrive already encoded; `error` carries a stable code
/// and a reason; `seal` delivers the terminal choke. A sealed upstream
/// drops further sends. Implementations must not call back into the
/// deferred machinery: they are invoked while its state lock is held.
pub trait Upstream: Send + Sync {
    /// Deliver one encoded chunk body.
    fn chunk(&self, body: Bytes);

    /// Deliver a terminal error. Producers follow it with [`Upstream::seal`].
    fn error(&self, code: i32, reason: &str);

    /// Deliver the terminal choke and seal the stream. Idempotent.
    fn seal(&self);
}

/// Upstream bound to a shared channel, a routing identity and a
/// per-invocation stream tag.
///
/// Transport failures on the send path are logged and swallowed: the
/// handler has already returned, and the consumer side observes a
/// dropped channel instead.
pub struct WireUpstream {
    channel: Arc<Mutex<Channel>>,
    route: Bytes,
    tag: u64,
    sealed: Mutex<bool>,
}

impl WireUpstream {
    pub fn new(channel: Arc<Mutex<Channel>>, route: Bytes, tag: u64) -> Self {
        Self {
            channel,
            route,
            tag,
            sealed: Mutex::new(false),
        }
    }

    /// The per-invocation stream tag.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    fn transmit<F>(&self, kind: ControlKind, tail: F) -> Result<(), ChannelError>
    where
        F: FnOnce(&mut Channel) -> Result<(), ChannelError>,
    {
        let mut channel = self.channel.lock();
        if !self.route.is_empty() {
            channel.send_raw(&self.route, true)?;
        }
        channel.send(&kind.as_u8(), true)?;
        tail(&mut channel)
    }
}

impl Upstream for WireUpstream {
    fn chunk(&self, body: Bytes) {
        let sealed = self.sealed.lock();
        if *sealed {
            warn!(tag = self.tag, "upstream sealed, dropping chunk");
            return;
        }
        let result = self.transmit(ControlKind::Chunk, |channel| {
            channel.send(&self.tag, true)?;
            channel.send_raw(&body, false)
        });
        if let Err(e) = result {
            error!("net: [chunk] {}", e);
        }
    }

    fn error(&self, code: i32, reason: &str) {
        let sealed = self.sealed.lock();
        if *sealed {
            warn!(tag = self.tag, "upstream sealed, dropping error");
            return;
        }
        let result = self.transmit(ControlKind::Error, |channel| {
            channel.send(&self.tag, true)?;
            channel.send(&code, true)?;
            channel.send(reason, false)
        });
        if let Err(e) = result {
            error!("net: [error] {}", e);
        }
    }

    fn seal(&self) {
        let mut sealed = self.sealed.lock();
        if *sealed {
            return;
        }
        *sealed = true;
        let result = self.transmit(ControlKind::Choke, |channel| channel.send(&self.tag, false));
        if let Err(e) = result {
            error!("net: [seal] {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twine_core::Streaming;
    use twine_transport::{FramedSocket, NetConfig, SocketKind};

    fn wired() -> (WireUpstream, Channel) {
        let mut pull = FramedSocket::new(SocketKind::Pull, NetConfig::default());
        pull.bind("tcp://127.0.0.1:0").unwrap();
        let port = pull.local_addr().unwrap().port();
        let mut push = FramedSocket::new(SocketKind::Push, NetConfig::default());
        push.connect(&format!("tcp://127.0.0.1:{}", port)).unwrap();

        let upstream = WireUpstream::new(
            Arc::new(Mutex::new(Channel::new(push))),
            Bytes::new(),
            9,
        );
        (upstream, Channel::new(pull))
    }

    #[test]
    fn test_chunks_ordered_before_choke() {
        let (upstream, mut rx) = wired();
        upstream.chunk(rmp_serde::to_vec(&1i32).unwrap().into());
        upstream.chunk(rmp_serde::to_vec(&2i32).unwrap().into());
        upstream.seal();

        let mut seen = Vec::new();
        loop {
            let (tag, message) = crate::downstream::recv_streaming::<i32>(&mut rx).unwrap();
            assert_eq!(tag, 9);
            let terminal = message.is_terminal();
            seen.push(message);
            if terminal {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![Streaming::Chunk(1), Streaming::Chunk(2), Streaming::Choke]
        );
    }

    #[test]
    fn test_sends_after_seal_are_dropped() {
        let (upstream, mut rx) = wired();
        upstream.seal();
        upstream.chunk(rmp_serde::to_vec(&3i32).unwrap().into());
        upstream.error(500, "late");
        upstream.seal();

        let (_, message) = crate::downstream::recv_streaming::<i32>(&mut rx).unwrap();
        assert_eq!(message, Streaming::Choke);
        assert!(!rx.pending(twine_transport::Direction::In).unwrap());
    }

    #[test]
    fn test_error_then_choke_pair() {
        let (upstream, mut rx) = wired();
        upstream.error(42, "nope");
        upstream.seal();

        let (_, message) = crate::downstream::recv_streaming::<i32>(&mut rx).unwrap();
        assert_eq!(
            message,
            Streaming::Error {
                code: 42,
                reason: "nope".to_string()
            }
        );
        let (_, message) = crate::downstream::recv_streaming::<i32>(&mut rx).unwrap();
        assert_eq!(message, Streaming::Choke);
    }
}
