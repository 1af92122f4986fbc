//! Slots bind wire arrivals to user handlers.

use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;
use twine_core::code;

use crate::deferred::Attachable;
use crate::dispatch::Dispatch;
use crate::event::Event;
use crate::upstream::Upstream;

/// Failure returned by an event handler.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// A typed system failure carrying its own stable wire code.
    #[error("{message}")]
    System { code: i32, message: String },

    /// Any other failure; mapped to the invocation-error code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InvokeError {
    pub fn system(code: i32, message: impl Into<String>) -> Self {
        Self::System {
            code,
            message: message.into(),
        }
    }
}

/// A registered handler for one event id.
///
/// Invocation never fails across this boundary: whatever the handler
/// does, the upstream leaves either attached to a deferred or sealed.
pub trait Slot: Send + Sync {
    /// Event name, used in logs.
    fn name(&self) -> &'static str;

    /// Decode the body, run the handler, and wire its result to the
    /// upstream. Returns the continuation dispatch, if any.
    fn invoke(&self, body: &[u8], upstream: Arc<dyn Upstream>) -> Option<Arc<Dispatch>>;
}

/// Slot whose handler returns a [`Deferred`] result.
pub struct DeferredSlot<E, F> {
    handler: F,
    _event: PhantomData<fn(E)>,
}

impl<E, F> DeferredSlot<E, F>
where
    E: Event,
    F: Fn(E::Args) -> Result<E::Deferred, InvokeError> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _event: PhantomData,
        }
    }
}

impl<E, F> Slot for DeferredSlot<E, F>
where
    E: Event + 'static,
    F: Fn(E::Args) -> Result<E::Deferred, InvokeError> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        E::NAME
    }

    fn invoke(&self, body: &[u8], upstream: Arc<dyn Upstream>) -> Option<Arc<Dispatch>> {
        let args: E::Args = match rmp_serde::from_slice(body) {
            Ok(args) => args,
            Err(e) => {
                upstream.error(code::INVOCATION, &format!("malformed arguments: {}", e));
                upstream.seal();
                return None;
            }
        };

        match (self.handler)(args) {
            Ok(deferred) => deferred.attach(upstream),
            Err(InvokeError::System { code, message }) => {
                upstream.error(code, &message);
                upstream.seal();
            }
            Err(InvokeError::Other(e)) => {
                upstream.error(code::INVOCATION, &e.to_string());
                upstream.seal();
            }
        }
        None
    }
}
