//! Event dispatch registry.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::event::Event;
use crate::slot::{DeferredSlot, InvokeError, Slot};
use crate::upstream::Upstream;

/// Routing failure at the dispatch layer.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No slot is bound for the event id.
    #[error("no slot bound for event {0}")]
    Unbound(u32),
}

/// Registry mapping event ids to slots.
///
/// A dispatch is fully populated during service registration and shared
/// immutably (`Arc<Dispatch>`) once exposed to the transport.
pub struct Dispatch {
    name: String,
    slots: HashMap<u32, Box<dyn Slot>>,
}

impl Dispatch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind a deferred-returning handler to event `E`. A rebinding of an
    /// already-bound id replaces the previous slot.
    pub fn on<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: Event + 'static,
        F: Fn(E::Args) -> Result<E::Deferred, InvokeError> + Send + Sync + 'static,
    {
        if self
            .slots
            .insert(E::ID, Box::new(DeferredSlot::<E, F>::new(handler)))
            .is_some()
        {
            warn!(service = %self.name, event = E::NAME, id = E::ID, "rebinding slot");
        }
        self
    }

    /// Whether a slot is bound for `id`.
    pub fn consumes(&self, id: u32) -> bool {
        self.slots.contains_key(&id)
    }

    /// Route one invocation to its slot.
    pub fn invoke(
        &self,
        id: u32,
        body: &[u8],
        upstream: Arc<dyn Upstream>,
    ) -> Result<Option<Arc<Dispatch>>, DispatchError> {
        match self.slots.get(&id) {
            Some(slot) => {
                debug!(service = %self.name, event = slot.name(), id, "invoking slot");
                Ok(slot.invoke(body, upstream))
            }
            None => Err(DispatchError::Unbound(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::Deferred;
    use crate::testing::{Delivered, RecordingUpstream};

    struct Ping;

    impl Event for Ping {
        const ID: u32 = 3;
        const NAME: &'static str = "ping";
        type Args = ();
        type Deferred = Deferred<String>;
    }

    fn ping_dispatch() -> Dispatch {
        let mut dispatch = Dispatch::new("test");
        dispatch.on::<Ping, _>(|()| {
            let deferred = Deferred::new();
            deferred.write("pong".to_string());
            Ok(deferred)
        });
        dispatch
    }

    #[test]
    fn test_bound_event_is_invoked() {
        let dispatch = ping_dispatch();
        assert!(dispatch.consumes(Ping::ID));

        let upstream = Arc::new(RecordingUpstream::default());
        let body = rmp_serde::to_vec(&()).unwrap();
        let continuation = dispatch.invoke(Ping::ID, &body, upstream.clone()).unwrap();
        assert!(continuation.is_none());
        assert_eq!(
            upstream.deliveries(),
            vec![
                Delivered::Chunk(rmp_serde::to_vec(&"pong").unwrap()),
                Delivered::Choke
            ]
        );
    }

    #[test]
    fn test_unbound_event_is_reported() {
        let dispatch = ping_dispatch();
        let upstream = Arc::new(RecordingUpstream::default());
        let result = dispatch.invoke(99, &[], upstream.clone());
        assert!(matches!(result, Err(DispatchError::Unbound(99))));
        assert!(upstream.deliveries().is_empty());
    }
}
