//! Test doubles shared across unit tests.

use bytes::Bytes;
use parking_lot::Mutex;

use crate::upstream::Upstream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    Chunk(Vec<u8>),
    Error(i32, String),
    Choke,
}

/// Upstream that records every delivery instead of touching a socket.
#[derive(Default)]
pub struct RecordingUpstream {
    deliveries: Mutex<Vec<Delivered>>,
    sealed: Mutex<bool>,
}

impl RecordingUpstream {
    pub fn deliveries(&self) -> Vec<Delivered> {
        self.deliveries.lock().clone()
    }

    pub fn is_sealed(&self) -> bool {
        *self.sealed.lock()
    }
}

impl Upstream for RecordingUpstream {
    fn chunk(&self, body: Bytes) {
        if *self.sealed.lock() {
            return;
        }
        self.deliveries.lock().push(Delivered::Chunk(body.to_vec()));
    }

    fn error(&self, code: i32, reason: &str) {
        if *self.sealed.lock() {
            return;
        }
        self.deliveries
            .lock()
            .push(Delivered::Error(code, reason.to_string()));
    }

    fn seal(&self) {
        let mut sealed = self.sealed.lock();
        if *sealed {
            return;
        }
        *sealed = true;
        self.deliveries.lock().push(Delivered::Choke);
    }
}
