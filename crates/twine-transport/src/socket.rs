//! Framed multipart sockets.
//!
//! A [`FramedSocket`] carries multipart messages over TCP. Frames queued
//! with the MORE hint are buffered and written out as a single burst when
//! the final frame arrives, and the receive side surfaces a burst only
//! once every frame of it is in, so a logical message is delivered whole
//! or not at all.
//!
//! Connecting sockets announce an identity preamble. `Router` sockets
//! expose the peer identity as the leading frame of every delivered
//! message and consume the leading frame of every sent message as the
//! destination route.
//!
//! A socket is single-owner: concurrent send/recv from different threads
//! requires external serialization.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, error, warn};

use crate::config::NetConfig;
use crate::endpoint;
use crate::error::TransportError;
use crate::frame::{encode_frame, parse_burst};

/// Socket kinds, mirroring the classic datagram-socket roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Bound fan-in with per-peer routing frames.
    Router,
    /// Connected counterpart of a router.
    Dealer,
    /// Broadcast to every connected peer.
    Pub,
    /// Receive-only subscriber.
    Sub,
    /// Round-robin distributor.
    Push,
    /// Receive-only collector.
    Pull,
}

impl SocketKind {
    fn can_send(self) -> bool {
        !matches!(self, SocketKind::Sub | SocketKind::Pull)
    }

    fn routed(self) -> bool {
        matches!(self, SocketKind::Router)
    }
}

/// Readiness direction for [`FramedSocket::pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

struct Peer {
    identity: Bytes,
    stream: TcpStream,
    rx: BytesMut,
    greeted: bool,
}

/// A multipart socket bound or connected to one endpoint.
pub struct FramedSocket {
    kind: SocketKind,
    identity: Bytes,
    config: NetConfig,
    endpoint: Option<String>,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    peers: Vec<Peer>,
    ready: VecDeque<Vec<(Bytes, bool)>>,
    inbox: VecDeque<(Bytes, bool)>,
    last_more: bool,
    tx: BytesMut,
    tx_route: Option<Bytes>,
    tx_open: bool,
    next_anon: u64,
    round_robin: usize,
}

impl FramedSocket {
    /// Create an anonymous socket.
    pub fn new(kind: SocketKind, config: NetConfig) -> Self {
        Self::with_identity(kind, Bytes::new(), config)
    }

    /// Create a socket with a fixed identity, announced to peers on
    /// connect. The identity is immutable once set.
    pub fn with_identity(kind: SocketKind, identity: impl Into<Bytes>, config: NetConfig) -> Self {
        Self {
            kind,
            identity: identity.into(),
            config,
            endpoint: None,
            listener: None,
            local_addr: None,
            peers: Vec::new(),
            ready: VecDeque::new(),
            inbox: VecDeque::new(),
            last_more: false,
            tx: BytesMut::new(),
            tx_route: None,
            tx_open: false,
            next_anon: 0,
            round_robin: 0,
        }
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    /// Client-visible connection string, available after `bind`.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Bound address, useful when binding to port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of live peers. Newly arrived connections are accepted
    /// before counting.
    pub fn peer_count(&mut self) -> Result<usize, TransportError> {
        self.service_io()?;
        Ok(self.peers.len())
    }

    /// Start accepting peers on `endpoint` and publish the client-visible
    /// connection string derived from the configured hostname.
    pub fn bind(&mut self, endpoint: &str) -> Result<(), TransportError> {
        let addr = endpoint::resolve(endpoint)?;
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        self.local_addr = Some(listener.local_addr()?);
        self.endpoint = Some(endpoint::advertised(endpoint, &self.config.hostname));
        self.listener = Some(listener);
        Ok(())
    }

    /// Connect to a bound socket at `endpoint`, announcing our identity.
    pub fn connect(&mut self, endpoint: &str) -> Result<(), TransportError> {
        let addr = endpoint::resolve(endpoint)?;
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;

        // Identity preamble, written before the stream goes non-blocking.
        let mut preamble = BytesMut::with_capacity(4 + self.identity.len());
        preamble.put_u32_le(self.identity.len() as u32);
        preamble.put_slice(&self.identity);
        stream.write_all(&preamble)?;

        stream.set_nonblocking(true)?;
        self.peers.push(Peer {
            identity: Bytes::new(),
            stream,
            rx: BytesMut::new(),
            greeted: true,
        });
        Ok(())
    }

    /// Queue one frame of the current outgoing message; the burst is
    /// written out when `more` is false.
    ///
    /// On a `Router` socket the first frame of every message is the
    /// destination route and is not transmitted.
    pub fn send_frame(&mut self, payload: &[u8], more: bool) -> Result<(), TransportError> {
        if !self.kind.can_send() {
            return Err(TransportError::Unsupported("send"));
        }
        if self.kind.routed() && !self.tx_open {
            self.tx_route = Some(Bytes::copy_from_slice(payload));
            self.tx_open = true;
        } else {
            self.tx_open = true;
            encode_frame(payload, more, &mut self.tx);
        }
        if more {
            return Ok(());
        }

        let result = self.flush_burst();
        self.tx.clear();
        self.tx_route = None;
        self.tx_open = false;
        if let Err(e) = &result {
            error!("net: [send_frame] {}", e);
        }
        result
    }

    fn flush_burst(&mut self) -> Result<(), TransportError> {
        if self.tx.is_empty() {
            debug!("net: [send_frame] empty message, nothing to send");
            return Ok(());
        }
        // Pick up freshly connected peers before routing.
        self.service_io()?;
        let burst = self.tx.split().freeze();

        match self.kind {
            SocketKind::Router => {
                let route = self.tx_route.take().ok_or(TransportError::UnknownRoute)?;
                let peer = self
                    .peers
                    .iter_mut()
                    .find(|peer| peer.greeted && peer.identity == route)
                    .ok_or(TransportError::UnknownRoute)?;
                write_all_blocking(&mut peer.stream, &burst)
            }
            SocketKind::Pub => {
                for peer in &mut self.peers {
                    if let Err(e) = write_all_blocking(&mut peer.stream, &burst) {
                        warn!("net: [send_frame] skipping unreachable subscriber: {}", e);
                    }
                }
                Ok(())
            }
            _ => {
                if self.peers.is_empty() {
                    return Err(TransportError::NotConnected);
                }
                let index = self.round_robin % self.peers.len();
                self.round_robin = self.round_robin.wrapping_add(1);
                write_all_blocking(&mut self.peers[index].stream, &burst)
            }
        }
    }

    /// Discard any frames of a partially queued outgoing message, so a
    /// truncated send cannot leak into the next one.
    pub fn abort_message(&mut self) {
        self.tx.clear();
        self.tx_route = None;
        self.tx_open = false;
    }

    /// Receive the next frame, blocking until a complete message is
    /// available.
    pub fn recv_frame(&mut self) -> Result<Bytes, TransportError> {
        loop {
            if let Some((payload, more)) = self.inbox.pop_front() {
                self.last_more = more;
                return Ok(payload);
            }
            if let Some(burst) = self.ready.pop_front() {
                self.inbox.extend(burst);
                continue;
            }
            self.wait_queued()?;
        }
    }

    /// Whether the current message has more frames queued after the last
    /// received one.
    pub fn has_more(&self) -> bool {
        self.last_more
    }

    /// Non-blocking readiness probe.
    pub fn pending(&mut self, direction: Direction) -> Result<bool, TransportError> {
        match direction {
            Direction::In => {
                self.service_io()?;
                Ok(self.has_queued())
            }
            Direction::Out => {
                if !self.kind.can_send() || self.peers.is_empty() {
                    return Ok(false);
                }
                let mut fds: Vec<PollFd> = self
                    .peers
                    .iter()
                    .map(|peer| PollFd::new(peer.stream.as_fd(), PollFlags::POLLOUT))
                    .collect();
                let n = poll(&mut fds, PollTimeout::ZERO).map_err(io_from_errno)?;
                Ok(n > 0)
            }
        }
    }

    /// Block until a complete message is queued or `timeout` elapses.
    /// `None` blocks indefinitely. Returns whether a message is queued.
    pub fn poll_readable(&mut self, timeout: Option<Duration>) -> Result<bool, TransportError> {
        self.service_io()?;
        if self.has_queued() {
            return Ok(true);
        }
        match timeout {
            Some(timeout) => {
                if !self.poll_descriptors(Some(timeout))? {
                    return Ok(false);
                }
                self.service_io()?;
                Ok(self.has_queued())
            }
            None => {
                self.wait_queued()?;
                Ok(true)
            }
        }
    }

    /// Primary OS handle, for external event loops.
    pub fn fd(&self) -> Option<RawFd> {
        self.listener
            .as_ref()
            .map(|listener| listener.as_raw_fd())
            .or_else(|| self.peers.first().map(|peer| peer.stream.as_raw_fd()))
    }

    /// Every pollable descriptor currently owned by the socket.
    pub fn poll_fds(&self) -> Vec<RawFd> {
        let mut fds = Vec::with_capacity(self.peers.len() + 1);
        if let Some(listener) = &self.listener {
            fds.push(listener.as_raw_fd());
        }
        fds.extend(self.peers.iter().map(|peer| peer.stream.as_raw_fd()));
        fds
    }

    fn has_queued(&self) -> bool {
        !self.inbox.is_empty() || !self.ready.is_empty()
    }

    // Blocks until at least one complete message is queued.
    fn wait_queued(&mut self) -> Result<(), TransportError> {
        loop {
            self.service_io()?;
            if self.has_queued() {
                return Ok(());
            }
            self.poll_descriptors(None)?;
        }
    }

    // Polls every descriptor for readability. Returns whether any event
    // fired before the timeout.
    fn poll_descriptors(&mut self, timeout: Option<Duration>) -> Result<bool, TransportError> {
        let poll_timeout = match timeout {
            Some(timeout) => PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX),
            None => PollTimeout::NONE,
        };
        let mut fds = Vec::with_capacity(self.peers.len() + 1);
        if let Some(listener) = &self.listener {
            fds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
        }
        for peer in &self.peers {
            fds.push(PollFd::new(peer.stream.as_fd(), PollFlags::POLLIN));
        }
        if fds.is_empty() {
            return match timeout {
                Some(timeout) => {
                    std::thread::sleep(timeout);
                    Ok(false)
                }
                None => Err(TransportError::NotConnected),
            };
        }
        let n = poll(&mut fds, poll_timeout).map_err(io_from_errno)?;
        Ok(n > 0)
    }

    // Accepts pending connections, drains readable peers, and extracts
    // complete messages into the ready queue.
    fn service_io(&mut self) -> Result<(), TransportError> {
        if let Some(listener) = &self.listener {
            loop {
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nodelay(true)?;
                        stream.set_nonblocking(true)?;
                        self.peers.push(Peer {
                            identity: Bytes::new(),
                            stream,
                            rx: BytesMut::new(),
                            greeted: false,
                        });
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("net: [accept] {}", e);
                        return Err(e.into());
                    }
                }
            }
        }

        let mut dead = Vec::new();
        let mut buf = [0u8; 8192];
        for (index, peer) in self.peers.iter_mut().enumerate() {
            loop {
                match peer.stream.read(&mut buf) {
                    Ok(0) => {
                        dead.push(index);
                        break;
                    }
                    Ok(n) => peer.rx.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("net: [recv_frame] {}", e);
                        dead.push(index);
                        break;
                    }
                }
            }
        }

        let routed = self.kind.routed();
        for index in 0..self.peers.len() {
            if !self.peers[index].greeted {
                // Identity preamble: [len: u32 LE][bytes].
                if self.peers[index].rx.len() < 4 {
                    continue;
                }
                let rx = &self.peers[index].rx;
                let length = u32::from_le_bytes([rx[0], rx[1], rx[2], rx[3]]) as usize;
                if rx.len() < 4 + length {
                    continue;
                }
                self.peers[index].rx.advance(4);
                let mut identity = self.peers[index].rx.split_to(length).freeze();
                if identity.is_empty() {
                    self.next_anon += 1;
                    identity = Bytes::from(format!("anon-{}", self.next_anon));
                }
                self.peers[index].identity = identity;
                self.peers[index].greeted = true;
            }
            loop {
                match parse_burst(&mut self.peers[index].rx)? {
                    Some(mut frames) => {
                        if routed {
                            frames.insert(0, (self.peers[index].identity.clone(), true));
                        }
                        self.ready.push_back(frames);
                    }
                    None => break,
                }
            }
        }

        for index in dead.into_iter().rev() {
            let peer = self.peers.remove(index);
            if !peer.rx.is_empty() {
                warn!("net: [recv_frame] peer disconnected mid-message, dropping partial frames");
            }
        }
        Ok(())
    }
}

/// Wait for readability on externally snapshotted descriptors, as
/// returned by [`FramedSocket::poll_fds`]. An empty set sleeps through
/// the timeout.
pub fn wait_readable(fds: &[RawFd], timeout: Duration) -> Result<bool, TransportError> {
    if fds.is_empty() {
        std::thread::sleep(timeout);
        return Ok(false);
    }
    // The descriptors were snapshotted from a live socket the caller
    // still owns; they stay open for the duration of the poll.
    let mut pollfds: Vec<PollFd> = fds
        .iter()
        .map(|fd| PollFd::new(unsafe { BorrowedFd::borrow_raw(*fd) }, PollFlags::POLLIN))
        .collect();
    let n = poll(
        &mut pollfds,
        PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX),
    )
    .map_err(io_from_errno)?;
    Ok(n > 0)
}

fn io_from_errno(errno: nix::errno::Errno) -> TransportError {
    TransportError::Io(io::Error::from(errno))
}

fn write_all_blocking(stream: &mut TcpStream, mut buf: &[u8]) -> Result<(), TransportError> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(TransportError::Disconnected),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLOUT)];
                poll(&mut fds, PollTimeout::NONE).map_err(io_from_errno)?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback(kind_bind: SocketKind, kind_connect: SocketKind) -> (FramedSocket, FramedSocket) {
        let mut bound = FramedSocket::new(kind_bind, NetConfig::default());
        bound.bind("tcp://127.0.0.1:0").unwrap();
        let port = bound.local_addr().unwrap().port();
        let mut connected = FramedSocket::new(kind_connect, NetConfig::default());
        connected
            .connect(&format!("tcp://127.0.0.1:{}", port))
            .unwrap();
        (bound, connected)
    }

    #[test]
    fn test_push_pull_multipart() {
        let (mut pull, mut push) = loopback(SocketKind::Pull, SocketKind::Push);

        push.send_frame(b"first", true).unwrap();
        push.send_frame(b"second", false).unwrap();

        assert_eq!(&pull.recv_frame().unwrap()[..], b"first");
        assert!(pull.has_more());
        assert_eq!(&pull.recv_frame().unwrap()[..], b"second");
        assert!(!pull.has_more());
        assert!(!pull.pending(Direction::In).unwrap());
    }

    #[test]
    fn test_router_prepends_identity() {
        let mut router = FramedSocket::new(SocketKind::Router, NetConfig::default());
        router.bind("tcp://127.0.0.1:0").unwrap();
        let port = router.local_addr().unwrap().port();

        let mut dealer = FramedSocket::with_identity(
            SocketKind::Dealer,
            Bytes::from_static(b"worker-1"),
            NetConfig::default(),
        );
        dealer.connect(&format!("tcp://127.0.0.1:{}", port)).unwrap();
        dealer.send_frame(b"payload", false).unwrap();

        assert_eq!(&router.recv_frame().unwrap()[..], b"worker-1");
        assert!(router.has_more());
        assert_eq!(&router.recv_frame().unwrap()[..], b"payload");
        assert!(!router.has_more());

        // Reply through the routing frame, which is not transmitted.
        router.send_frame(b"worker-1", true).unwrap();
        router.send_frame(b"reply", false).unwrap();
        assert_eq!(&dealer.recv_frame().unwrap()[..], b"reply");
        assert!(!dealer.has_more());
    }

    #[test]
    fn test_router_unknown_route() {
        let mut router = FramedSocket::new(SocketKind::Router, NetConfig::default());
        router.bind("tcp://127.0.0.1:0").unwrap();

        router.send_frame(b"nobody", true).unwrap();
        let result = router.send_frame(b"lost", false);
        assert!(matches!(result, Err(TransportError::UnknownRoute)));
    }

    #[test]
    fn test_pub_broadcast() {
        let mut publisher = FramedSocket::new(SocketKind::Pub, NetConfig::default());
        publisher.bind("tcp://127.0.0.1:0").unwrap();
        let port = publisher.local_addr().unwrap().port();

        let endpoint = format!("tcp://127.0.0.1:{}", port);
        let mut first = FramedSocket::new(SocketKind::Sub, NetConfig::default());
        first.connect(&endpoint).unwrap();
        let mut second = FramedSocket::new(SocketKind::Sub, NetConfig::default());
        second.connect(&endpoint).unwrap();

        while publisher.peer_count().unwrap() < 2 {
            std::thread::sleep(Duration::from_millis(5));
        }
        publisher.send_frame(b"broadcast", false).unwrap();

        assert_eq!(&first.recv_frame().unwrap()[..], b"broadcast");
        assert_eq!(&second.recv_frame().unwrap()[..], b"broadcast");
    }

    #[test]
    fn test_receive_only_kind_cannot_send() {
        let mut sub = FramedSocket::new(SocketKind::Sub, NetConfig::default());
        assert!(matches!(
            sub.send_frame(b"x", false),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[test]
    fn test_send_without_peer_fails() {
        let mut push = FramedSocket::new(SocketKind::Push, NetConfig::default());
        assert!(matches!(
            push.send_frame(b"x", false),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_poll_readable_timeout() {
        let (mut pull, mut push) = loopback(SocketKind::Pull, SocketKind::Push);
        assert!(!pull
            .poll_readable(Some(Duration::from_millis(10)))
            .unwrap());

        push.send_frame(b"late", false).unwrap();
        assert!(pull.poll_readable(Some(Duration::from_millis(500))).unwrap());
        assert_eq!(&pull.recv_frame().unwrap()[..], b"late");
    }

    #[test]
    fn test_advertised_endpoint_published_on_bind() {
        let mut socket = FramedSocket::new(
            SocketKind::Router,
            NetConfig {
                hostname: "node-1".to_string(),
            },
        );
        socket.bind("tcp://127.0.0.1:0").unwrap();
        assert_eq!(socket.endpoint(), Some("tcp://node-1:0"));
    }
}
