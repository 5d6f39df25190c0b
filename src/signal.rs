//! Single-use cross-thread completion signals
//!
//! Every blocking point of a frame (load, tick response, paint completion)
//! gets a fresh pair: the engine-loop thread fires the [`Signal`] at most
//! once, the caller's thread consumes the [`Waiter`] exactly once. Both halves
//! are consumed by use, so a signal can never be reused across calls.
//!
//! Dropping an unfired `Signal` wakes the waiter with [`Error::Closed`]; this
//! is how the engine loop abandons a wait it can no longer satisfy.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use crate::{Error, Result};

/// Producer half, held by the engine-loop thread
#[derive(Debug)]
pub struct Signal<T> {
    tx: SyncSender<T>,
}

/// Consumer half, held by the thread that blocks
#[derive(Debug)]
pub struct Waiter<T> {
    rx: Receiver<T>,
}

/// Create a fresh signal/waiter pair.
pub fn signal<T>() -> (Signal<T>, Waiter<T>) {
    let (tx, rx) = mpsc::sync_channel(1);
    (Signal { tx }, Waiter { rx })
}

impl<T> Signal<T> {
    /// Fire the signal. Returns `false` if the waiter is already gone.
    pub fn fire(self, value: T) -> bool {
        self.tx.try_send(value).is_ok()
    }
}

impl<T> Waiter<T> {
    /// Block until the signal fires. `what` names the wait in errors.
    pub fn wait(self, what: &str) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| Error::Closed(format!("{} abandoned by the engine loop", what)))
    }

    /// Block until the signal fires or `timeout` elapses.
    pub fn wait_timeout(self, what: &str, timeout: Duration) -> Result<T> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::Timeout(timeout.as_millis() as u64),
            RecvTimeoutError::Disconnected => {
                Error::Closed(format!("{} abandoned by the engine loop", what))
            }
        })
    }
}
