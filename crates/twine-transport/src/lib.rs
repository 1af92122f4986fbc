//! Framed multipart transport and typed channels.
//!
//! The transport layers multipart-message semantics over TCP: a logical
//! message is a burst of length-prefixed frames that is written atomically
//! and surfaced to the receiver only once every frame of it has arrived.
//! [`Channel`] adds a typed view on top, packing and unpacking
//! self-describing values as the frames of a message.
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`FramedSocket`] | Socket kinds, identity, burst send/recv, poll surface |
//! | [`Channel`] | Typed values, raw frames and tuple folds over a socket |
//! | [`endpoint`] | Endpoint strings and the advertised connection string |
//! | [`NetConfig`] | Hostname settings consulted on bind |

pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod socket;

pub use channel::{Channel, RecvMulti, SendMulti};
pub use config::NetConfig;
pub use error::{ChannelError, TransportError};
pub use frame::{FrameError, FrameFlags, FRAME_HEADER, MAX_FRAME_SIZE};
pub use socket::{wait_readable, Direction, FramedSocket, SocketKind};
