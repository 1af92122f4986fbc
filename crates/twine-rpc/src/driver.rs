//! Driver base for event sources.
//!
//! Drivers feed events into an engine from the outside (timers, queues,
//! filesystem watchers). The core only owns their publish side: an
//! identified pipe carrying `(id, value)` tuples.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::error;
use twine_core::Value;
use twine_transport::Channel;

/// Payload digest hook, reserved for drivers that authenticate their
/// input. No core code path exercises it.
pub trait Digest: Send + Sync {
    fn digest(&self, payload: &[u8]) -> Bytes;
}

/// Common state of an event-source driver.
pub struct Driver {
    id: String,
    pipe: Option<Arc<Mutex<Channel>>>,
    digest: Option<Box<dyn Digest>>,
}

impl Driver {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pipe: None,
            digest: None,
        }
    }

    pub fn with_pipe(mut self, pipe: Arc<Mutex<Channel>>) -> Self {
        self.pipe = Some(pipe);
        self
    }

    pub fn with_digest(mut self, digest: Box<dyn Digest>) -> Self {
        self.digest = Some(digest);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The configured digest hook, if any.
    pub fn digest(&self) -> Option<&dyn Digest> {
        self.digest.as_deref()
    }

    /// Emit `(id, payload)` on the publish pipe, when one is attached.
    /// Send failures are logged, not raised.
    pub fn publish(&self, payload: &Value) {
        let Some(pipe) = &self.pipe else {
            return;
        };
        let mut channel = pipe.lock();
        if let Err(e) = channel.send_tuple(&(self.id.as_str(), payload)) {
            error!("net: [publish] {}", e);
        }
    }
}
