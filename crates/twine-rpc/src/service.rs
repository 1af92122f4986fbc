//! Service request loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};
use twine_core::ControlKind;
use twine_transport::{wait_readable, Channel, ChannelError, Direction, SocketKind, TransportError};

use crate::dispatch::{Dispatch, DispatchError};
use crate::upstream::WireUpstream;

/// Failure that stops the request loop.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

enum Request {
    Invoke {
        route: Bytes,
        tag: u64,
        event: u32,
        body: Bytes,
    },
    Terminate,
    Skipped,
}

/// Binds a dispatch to a routed channel and drains invocations.
///
/// The loop owns the channel mutex only while reading one request, so
/// deferred flushes from handler threads interleave freely with it.
pub struct Service {
    name: String,
    channel: Arc<Mutex<Channel>>,
    dispatch: Arc<Dispatch>,
}

impl Service {
    pub fn new(name: impl Into<String>, channel: Channel, dispatch: Arc<Dispatch>) -> Self {
        Self {
            name: name.into(),
            channel: Arc::new(Mutex::new(channel)),
            dispatch,
        }
    }

    /// Shared handle to the underlying channel. Upstreams built by the
    /// loop send through it.
    pub fn channel(&self) -> Arc<Mutex<Channel>> {
        self.channel.clone()
    }

    /// Serve until a TERMINATE message arrives.
    pub fn run(&self) -> Result<(), ServiceError> {
        info!(service = %self.name, "serving");
        loop {
            let fds = self.channel.lock().poll_fds();
            wait_readable(&fds, Duration::from_millis(250))?;

            loop {
                let request = {
                    let mut channel = self.channel.lock();
                    if !channel.pending(Direction::In)? {
                        break;
                    }
                    self.read_request(&mut channel)?
                };
                match request {
                    Request::Invoke {
                        route,
                        tag,
                        event,
                        body,
                    } => {
                        let upstream =
                            Arc::new(WireUpstream::new(self.channel.clone(), route, tag));
                        match self.dispatch.invoke(event, &body, upstream) {
                            Ok(_) => {}
                            Err(DispatchError::Unbound(id)) => {
                                warn!(
                                    service = %self.name,
                                    event = id,
                                    "dropping message for unbound event"
                                );
                            }
                        }
                    }
                    Request::Terminate => {
                        info!(service = %self.name, "terminated");
                        return Ok(());
                    }
                    Request::Skipped => {}
                }
            }
        }
    }

    // Reads one full message off the channel. Malformed messages are
    // drained and reported as skipped rather than killing the loop.
    fn read_request(&self, channel: &mut Channel) -> Result<Request, ServiceError> {
        let route = if channel.kind() == SocketKind::Router {
            let route = channel.recv_raw()?;
            if !channel.has_more() {
                warn!(service = %self.name, "message without a control frame, dropping");
                return Ok(Request::Skipped);
            }
            route
        } else {
            Bytes::new()
        };

        let Some(kind) = self.recv_or_skip::<u8>(channel)? else {
            return Ok(Request::Skipped);
        };
        let Ok(kind) = ControlKind::try_from(kind) else {
            warn!(service = %self.name, kind, "unknown control kind, dropping message");
            channel.drop_message()?;
            return Ok(Request::Skipped);
        };

        match kind {
            ControlKind::Invoke => {
                if !channel.has_more() {
                    warn!(service = %self.name, "malformed invoke, dropping message");
                    return Ok(Request::Skipped);
                }
                let Some(tag) = self.recv_or_skip::<u64>(channel)? else {
                    return Ok(Request::Skipped);
                };
                if !channel.has_more() {
                    warn!(service = %self.name, "invoke without an event id, dropping message");
                    return Ok(Request::Skipped);
                }
                let Some(event) = self.recv_or_skip::<u32>(channel)? else {
                    return Ok(Request::Skipped);
                };
                if !channel.has_more() {
                    warn!(service = %self.name, "invoke without a body, dropping message");
                    return Ok(Request::Skipped);
                }
                let body = channel.recv_raw()?;
                if channel.has_more() {
                    warn!(service = %self.name, "trailing frames after invoke body, dropping them");
                    channel.drop_message()?;
                }
                Ok(Request::Invoke {
                    route,
                    tag,
                    event,
                    body,
                })
            }
            ControlKind::Terminate => {
                channel.drop_message()?;
                Ok(Request::Terminate)
            }
            ControlKind::Heartbeat => {
                channel.drop_message()?;
                debug!(service = %self.name, "heartbeat");
                Ok(Request::Skipped)
            }
            ControlKind::Suicide => {
                channel.drop_message()?;
                info!(service = %self.name, "peer asked to be retired");
                Ok(Request::Skipped)
            }
            other => {
                warn!(service = %self.name, kind = other.as_u8(), "unexpected control kind, dropping message");
                channel.drop_message()?;
                Ok(Request::Skipped)
            }
        }
    }

    // Decode failures drain the message and surface as None; transport
    // failures propagate.
    fn recv_or_skip<T: DeserializeOwned>(
        &self,
        channel: &mut Channel,
    ) -> Result<Option<T>, ServiceError> {
        match channel.recv::<T>() {
            Ok(value) => Ok(Some(value)),
            Err(ChannelError::Decode(_)) => {
                channel.drop_message()?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
