//! [`PendingResult`] – the write-once handle returned to a request's sender.
//!
//! The slot behind a handle moves from *unresolved* to *settled* at most
//! once.  Settling either stores the answer or marks the request abandoned
//! (its receiver left before dequeuing it, or the entry was evicted).  Every
//! later attempt to settle is a no-op.
//!
//! Readers never race the writer: the outcome is published before the
//! completion channel's sender is dropped, and a woken reader always finds
//! the outcome in place.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use courier_types::WaitError;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;

use crate::stop::StopToken;

enum Outcome<T> {
    Ready(T),
    Abandoned,
}

pub(crate) struct Slot<T> {
    outcome: OnceLock<Outcome<T>>,
    done: Mutex<Option<Sender<()>>>,
    settled: Receiver<()>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        let (done, settled) = channel::bounded(0);
        Self {
            outcome: OnceLock::new(),
            done: Mutex::new(Some(done)),
            settled,
        }
    }

    /// Store `outcome` if nothing was stored yet. Returns whether it won.
    fn settle(&self, outcome: Outcome<T>) -> bool {
        if self.outcome.set(outcome).is_err() {
            return false;
        }
        // Disconnecting wakes every waiter.
        self.done.lock().take();
        true
    }

    pub(crate) fn resolve(&self, value: T) -> bool {
        self.settle(Outcome::Ready(value))
    }
}

/// Type-erased view of a slot held by the bus's pending table.
pub(crate) trait ErasedSlot: Send + Sync {
    fn abandon(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + Sync + 'static> ErasedSlot for Slot<T> {
    fn abandon(&self) -> bool {
        self.settle(Outcome::Abandoned)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Handle to the eventual answer of a request.
///
/// Clones share the same slot, so several threads may wait on one request;
/// all of them are woken by the single resolution.
pub struct PendingResult<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for PendingResult<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> PendingResult<T> {
    /// Create an unresolved handle together with the slot the bus keeps.
    pub(crate) fn new() -> (Self, Arc<Slot<T>>) {
        let slot = Arc::new(Slot::new());
        (
            Self {
                slot: Arc::clone(&slot),
            },
            slot,
        )
    }

    /// Block until the request is settled.
    ///
    /// Returns immediately with the stored value when called again after
    /// resolution.
    pub fn wait(&self) -> Result<T, WaitError> {
        self.wait_inner(None, None)
    }

    /// Block for at most `timeout`.
    ///
    /// [`WaitError::TimedOut`] is returned when the deadline passes first.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, WaitError> {
        self.wait_inner(None, Some(timeout))
    }

    /// Block until settled, `stop` fires, or the optional `timeout` passes.
    pub fn wait_or_stop(
        &self,
        stop: &StopToken,
        timeout: Option<Duration>,
    ) -> Result<T, WaitError> {
        self.wait_inner(Some(stop), timeout)
    }

    /// Non-blocking read. `None` while unresolved or when abandoned.
    pub fn try_get(&self) -> Option<T> {
        match self.slot.outcome.get() {
            Some(Outcome::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// `true` once the request has been answered or abandoned.
    pub fn is_resolved(&self) -> bool {
        self.slot.outcome.get().is_some()
    }

    fn read(&self) -> Option<Result<T, WaitError>> {
        self.slot.outcome.get().map(|outcome| match outcome {
            Outcome::Ready(value) => Ok(value.clone()),
            Outcome::Abandoned => Err(WaitError::Abandoned),
        })
    }

    fn wait_inner(
        &self,
        stop: Option<&StopToken>,
        timeout: Option<Duration>,
    ) -> Result<T, WaitError> {
        if let Some(result) = self.read() {
            return result;
        }

        let no_stop = channel::never::<()>();
        let stop_signal = stop.map(StopToken::signal).unwrap_or(&no_stop);
        let deadline = match timeout {
            Some(timeout) => channel::at(Instant::now() + timeout),
            None => channel::never(),
        };

        select! {
            recv(self.slot.settled) -> _ => {}
            recv(stop_signal) -> _ => {
                return self.read().unwrap_or(Err(WaitError::Interrupted));
            }
            recv(deadline) -> _ => {
                return self.read().unwrap_or(Err(WaitError::TimedOut));
            }
        }

        // The sender is only dropped after the outcome is published.
        self.read().unwrap_or(Err(WaitError::Abandoned))
    }
}

impl<T> fmt::Debug for PendingResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.slot.outcome.get() {
            None => "pending",
            Some(Outcome::Ready(_)) => "resolved",
            Some(Outcome::Abandoned) => "abandoned",
        };
        f.debug_struct("PendingResult").field("state", &state).finish()
    }
}
