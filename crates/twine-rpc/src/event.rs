//! Typed RPC events.

use serde::de::DeserializeOwned;

use crate::deferred::Attachable;

/// A typed RPC method: a stable event id, a parameter tuple, and the
/// deferred result its handler produces.
pub trait Event {
    /// Event id, unique within a dispatch.
    const ID: u32;

    /// Human-readable name, used in logs.
    const NAME: &'static str;

    /// Parameter tuple, decoded from the INVOKE body.
    type Args: DeserializeOwned + Send;

    /// Deferred result type the handler returns: [`crate::Deferred`] for
    /// events with a value, [`crate::VoidDeferred`] for events without.
    type Deferred: Attachable;
}
