//! Logging service.
//!
//! A ready-made dispatch exposing the process logger to remote peers:
//! `emit(level, source, message)` forwards one record, `verbosity()`
//! reports the maximum level the logger accepts.

use tracing::{debug, error, info, warn};

use crate::deferred::{Deferred, VoidDeferred};
use crate::dispatch::Dispatch;
use crate::event::Event;

/// `emit(level, source, message)`.
pub struct Emit;

impl Event for Emit {
    const ID: u32 = 0;
    const NAME: &'static str = "emit";
    type Args = (i32, String, String);
    type Deferred = VoidDeferred;
}

/// `verbosity()`: the maximum level the logger accepts.
pub struct Verbosity;

impl Event for Verbosity {
    const ID: u32 = 1;
    const NAME: &'static str = "verbosity";
    type Args = ();
    type Deferred = Deferred<i32>;
}

/// Levels carried on the wire: 0 discards, then error through debug.
pub const IGNORE: i32 = 0;
pub const ERROR: i32 = 1;
pub const WARNING: i32 = 2;
pub const INFO: i32 = 3;
pub const DEBUG: i32 = 4;

/// Build the logging service dispatch.
pub fn dispatch(verbosity: i32) -> Dispatch {
    let mut dispatch = Dispatch::new("logging");
    dispatch.on::<Emit, _>(|(level, source, message)| {
        match level {
            IGNORE => {}
            ERROR => error!("{}: {}", source, message),
            WARNING => warn!("{}: {}", source, message),
            INFO => info!("{}: {}", source, message),
            _ => debug!("{}: {}", source, message),
        }
        let deferred = VoidDeferred::new();
        deferred.close();
        Ok(deferred)
    });
    dispatch.on::<Verbosity, _>(move |()| {
        let deferred = Deferred::new();
        deferred.write(verbosity);
        Ok(deferred)
    });
    dispatch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Delivered, RecordingUpstream};
    use std::sync::Arc;

    #[test]
    fn test_emit_closes_with_choke_only() {
        let dispatch = dispatch(DEBUG);
        let upstream = Arc::new(RecordingUpstream::default());
        let body =
            rmp_serde::to_vec(&(INFO, "engine".to_string(), "started".to_string())).unwrap();

        dispatch.invoke(Emit::ID, &body, upstream.clone()).unwrap();
        assert_eq!(upstream.deliveries(), vec![Delivered::Choke]);
    }

    #[test]
    fn test_verbosity_reports_configured_level() {
        let dispatch = dispatch(WARNING);
        let upstream = Arc::new(RecordingUpstream::default());
        let body = rmp_serde::to_vec(&()).unwrap();

        dispatch
            .invoke(Verbosity::ID, &body, upstream.clone())
            .unwrap();
        assert_eq!(
            upstream.deliveries(),
            vec![
                Delivered::Chunk(rmp_serde::to_vec(&WARNING).unwrap()),
                Delivered::Choke
            ]
        );
    }
}
