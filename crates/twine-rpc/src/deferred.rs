//! Single-assignment deferred results.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error};
use twine_core::code;

use crate::upstream::Upstream;

enum Outcome<T> {
    Unassigned,
    Value(T),
    Error { code: i32, reason: String },
    Empty,
}

struct State<T> {
    outcome: Outcome<T>,
    upstream: Option<Arc<dyn Upstream>>,
    flushed: bool,
}

fn new_state<T>() -> Arc<Mutex<State<T>>> {
    Arc::new(Mutex::new(State {
        outcome: Outcome::Unassigned,
        upstream: None,
        flushed: false,
    }))
}

/// A deferred result the slot machinery can bind to a response upstream.
pub trait Attachable {
    /// Bind the response upstream. Flushes immediately when the state is
    /// already terminal.
    fn attach(&self, upstream: Arc<dyn Upstream>);
}

/// A single-assignment result handle produced by an RPC handler.
///
/// The handler keeps one clone as the producer; the slot machinery holds
/// another and attaches the response upstream. The first terminal
/// transition wins and is permanent. The terminal sequence is delivered
/// to the attached upstream exactly once, whether the upstream attaches
/// before or after the transition; attach and the transitions are
/// serialized under the state mutex because the shared pointer alone
/// cannot order a racing attach against a racing write.
///
/// Events that produce no value use [`VoidDeferred`] instead, which has
/// no `write` and can only close or abort.
pub struct Deferred<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Serialize> Deferred<T> {
    pub fn new() -> Self {
        Self { state: new_state() }
    }

    /// Resolve with a value. A no-op once the state is assigned.
    pub fn write(&self, value: T) {
        let mut state = self.state.lock();
        if matches!(state.outcome, Outcome::Unassigned) {
            state.outcome = Outcome::Value(value);
            flush(&mut state);
        }
    }

    /// Resolve with a terminal error. A no-op once the state is assigned.
    pub fn abort(&self, code: i32, reason: &str) {
        let mut state = self.state.lock();
        if matches!(state.outcome, Outcome::Unassigned) {
            state.outcome = Outcome::Error {
                code,
                reason: reason.to_string(),
            };
            flush(&mut state);
        }
    }
}

impl<T: Serialize> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> Attachable for Deferred<T> {
    fn attach(&self, upstream: Arc<dyn Upstream>) {
        attach_state(&self.state, upstream);
    }
}

/// Deferred for events that produce no value.
///
/// There is no `write`: the consumer observes either the terminal choke
/// alone, or an error followed by the choke.
pub struct VoidDeferred {
    state: Arc<Mutex<State<()>>>,
}

impl Clone for VoidDeferred {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl VoidDeferred {
    pub fn new() -> Self {
        Self { state: new_state() }
    }

    /// Resolve empty: the consumer sees only the terminal choke.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if matches!(state.outcome, Outcome::Unassigned) {
            state.outcome = Outcome::Empty;
            flush(&mut state);
        }
    }

    /// Resolve with a terminal error. A no-op once the state is assigned.
    pub fn abort(&self, code: i32, reason: &str) {
        let mut state = self.state.lock();
        if matches!(state.outcome, Outcome::Unassigned) {
            state.outcome = Outcome::Error {
                code,
                reason: reason.to_string(),
            };
            flush(&mut state);
        }
    }
}

impl Default for VoidDeferred {
    fn default() -> Self {
        Self::new()
    }
}

impl Attachable for VoidDeferred {
    fn attach(&self, upstream: Arc<dyn Upstream>) {
        attach_state(&self.state, upstream);
    }
}

fn attach_state<T: Serialize>(state: &Mutex<State<T>>, upstream: Arc<dyn Upstream>) {
    let mut state = state.lock();
    if state.flushed {
        debug!("deferred already flushed, ignoring late attach");
        return;
    }
    state.upstream = Some(upstream);
    if !matches!(state.outcome, Outcome::Unassigned) {
        flush(&mut state);
    }
}

// Runs under the state mutex. Delivers the terminal sequence and drops
// the upstream so nothing keeps the transport alive past the flush.
fn flush<T: Serialize>(state: &mut State<T>) {
    if matches!(state.outcome, Outcome::Unassigned) {
        return;
    }
    let Some(upstream) = state.upstream.take() else {
        return;
    };
    match &state.outcome {
        Outcome::Unassigned => {}
        Outcome::Value(value) => match rmp_serde::to_vec(value) {
            Ok(body) => {
                upstream.chunk(body.into());
                upstream.seal();
            }
            Err(e) => {
                error!("failed to serialize deferred value: {}", e);
                upstream.error(code::INVOCATION, &e.to_string());
                upstream.seal();
            }
        },
        Outcome::Error { code, reason } => {
            upstream.error(*code, reason);
            upstream.seal();
        }
        Outcome::Empty => upstream.seal(),
    }
    state.flushed = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Delivered, RecordingUpstream};
    use std::thread;

    fn packed<T: Serialize>(value: &T) -> Vec<u8> {
        rmp_serde::to_vec(value).unwrap()
    }

    #[test]
    fn test_write_before_attach() {
        let deferred = Deferred::<i32>::new();
        deferred.write(7);

        let upstream = Arc::new(RecordingUpstream::default());
        deferred.attach(upstream.clone());

        assert_eq!(
            upstream.deliveries(),
            vec![Delivered::Chunk(packed(&7)), Delivered::Choke]
        );
    }

    #[test]
    fn test_attach_before_write() {
        let deferred = Deferred::<String>::new();
        let upstream = Arc::new(RecordingUpstream::default());
        deferred.attach(upstream.clone());
        assert!(upstream.deliveries().is_empty());

        deferred.write("ok".to_string());
        assert_eq!(
            upstream.deliveries(),
            vec![Delivered::Chunk(packed(&"ok")), Delivered::Choke]
        );
    }

    #[test]
    fn test_abort_wins_and_later_write_is_ignored() {
        let deferred = Deferred::<i32>::new();
        let upstream = Arc::new(RecordingUpstream::default());
        deferred.attach(upstream.clone());

        deferred.abort(42, "nope");
        deferred.write(1);

        assert_eq!(
            upstream.deliveries(),
            vec![
                Delivered::Error(42, "nope".to_string()),
                Delivered::Choke
            ]
        );
    }

    #[test]
    fn test_void_close_delivers_only_choke() {
        let deferred = VoidDeferred::new();
        deferred.close();

        let upstream = Arc::new(RecordingUpstream::default());
        deferred.attach(upstream.clone());

        assert_eq!(upstream.deliveries(), vec![Delivered::Choke]);
    }

    #[test]
    fn test_void_abort_streams_error_then_choke() {
        let deferred = VoidDeferred::new();
        let upstream = Arc::new(RecordingUpstream::default());
        deferred.attach(upstream.clone());

        deferred.abort(503, "overloaded");
        deferred.close();

        assert_eq!(
            upstream.deliveries(),
            vec![
                Delivered::Error(503, "overloaded".to_string()),
                Delivered::Choke
            ]
        );
    }

    #[test]
    fn test_double_write_is_single_assignment() {
        let deferred = Deferred::<i32>::new();
        deferred.write(1);
        deferred.write(2);

        let upstream = Arc::new(RecordingUpstream::default());
        deferred.attach(upstream.clone());

        assert_eq!(
            upstream.deliveries(),
            vec![Delivered::Chunk(packed(&1)), Delivered::Choke]
        );
    }

    #[test]
    fn test_late_attach_after_flush_is_ignored() {
        let deferred = Deferred::<i32>::new();
        let first = Arc::new(RecordingUpstream::default());
        deferred.attach(first.clone());
        deferred.write(5);

        let second = Arc::new(RecordingUpstream::default());
        deferred.attach(second.clone());

        assert_eq!(first.deliveries().len(), 2);
        assert!(second.deliveries().is_empty());
    }

    #[test]
    fn test_flush_exactly_once_under_attach_write_race() {
        for _ in 0..128 {
            let deferred = Deferred::<i32>::new();
            let upstream = Arc::new(RecordingUpstream::default());

            let producer = deferred.clone();
            let writer = thread::spawn(move || producer.write(7));
            deferred.attach(upstream.clone());
            writer.join().unwrap();

            assert_eq!(
                upstream.deliveries(),
                vec![Delivered::Chunk(packed(&7)), Delivered::Choke]
            );
        }
    }

    #[test]
    fn test_racing_writers_one_wins() {
        for _ in 0..64 {
            let deferred = Deferred::<i32>::new();
            let upstream = Arc::new(RecordingUpstream::default());
            deferred.attach(upstream.clone());

            let left = deferred.clone();
            let right = deferred.clone();
            let a = thread::spawn(move || left.write(1));
            let b = thread::spawn(move || right.write(2));
            a.join().unwrap();
            b.join().unwrap();

            let deliveries = upstream.deliveries();
            assert_eq!(deliveries.len(), 2);
            assert!(
                deliveries[0] == Delivered::Chunk(packed(&1))
                    || deliveries[0] == Delivered::Chunk(packed(&2))
            );
            assert_eq!(deliveries[1], Delivered::Choke);
        }
    }
}
