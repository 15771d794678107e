//! Quiet-period coalescing of resolved events
//!
//! The first event of a burst starts the timer, every further event
//! restarts it, and once the queue stays silent for the whole quiet period
//! the registered callback runs once.

use crate::event::ResolvedEvent;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Activity callback; carries no payload
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Replaceable callback shared between the owner and the dispatcher
///
/// Dispatch clones the callback under the lock and calls it after the lock
/// is released, so a callback may replace or clear itself.
#[derive(Clone, Default)]
pub struct CallbackSlot {
    inner: Arc<Mutex<Option<Callback>>>,
}

impl CallbackSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.lock() = Some(Arc::new(callback));
    }

    pub fn clear(&self) {
        *self.inner.lock() = None;
    }

    pub fn current(&self) -> Option<Callback> {
        self.inner.lock().clone()
    }
}

impl std::fmt::Debug for CallbackSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSlot")
            .field("set", &self.inner.lock().is_some())
            .finish()
    }
}

/// Turns a stream of events into activity notifications
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    slot: CallbackSlot,
}

impl Debouncer {
    pub fn new(quiet: Duration, slot: CallbackSlot) -> Self {
        Self { quiet, slot }
    }

    /// Consume `events` until every sender is gone
    ///
    /// Returns the number of bursts delivered. A burst still pending when
    /// the queue closes is delivered before returning.
    pub fn run(&self, events: Receiver<ResolvedEvent>) -> usize {
        let mut delivered = 0;

        while let Ok(first) = events.recv() {
            trace!("burst started by {}", first.path.display());
            let mut count = 1;

            let closed = loop {
                match events.recv_timeout(self.quiet) {
                    Ok(_) => count += 1,
                    Err(RecvTimeoutError::Timeout) => break false,
                    Err(RecvTimeoutError::Disconnected) => break true,
                }
            };

            self.dispatch(count);
            delivered += 1;

            if closed {
                break;
            }
        }

        delivered
    }

    fn dispatch(&self, count: usize) {
        match self.slot.current() {
            Some(callback) => {
                debug!("activity settled after {} event(s)", count);
                callback();
            }
            None => debug!("activity settled, no callback registered"),
        }
    }
}
