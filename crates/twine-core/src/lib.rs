//! Core types for the twine message-passing substrate.
//!
//! This crate provides the vocabulary shared by every twine component:
//! - Control-layer message kinds exchanged between an engine and a worker
//! - The typed streaming algebra (`chunk | error | choke`)
//! - The self-describing value type and its pack/unpack helpers
//! - Stable numeric codes carried by wire-level errors

pub mod code;
pub mod message;
pub mod value;

pub use message::{ControlKind, Streaming, UnknownKind};
pub use value::{pack_value, unpack_value, Value, ValueError};
