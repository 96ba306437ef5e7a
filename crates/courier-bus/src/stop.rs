//! [`StopToken`] – cooperative cancellation for blocked workers.
//!
//! A worker only ever suspends inside [`MessageBus::await_next`] or while
//! waiting on a [`PendingResult`].  Both waits select on the token's signal
//! channel, so firing the token returns control to the worker instead of
//! leaving it parked forever.
//!
//! The signal is a zero-capacity channel whose only sender is dropped on
//! [`StopToken::stop`]; disconnection wakes every receiver at once.
//!
//! Tokens form a tree: stopping a token stops every token created from it
//! with [`StopToken::child`], never the other way round.
//!
//! [`MessageBus::await_next`]: crate::bus::MessageBus::await_next
//! [`PendingResult`]: crate::pending::PendingResult

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

struct Inner {
    stopped: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
    children: Mutex<Vec<StopToken>>,
}

/// Shared stop flag. Clones observe and fire the same signal.
#[derive(Clone)]
pub struct StopToken {
    inner: Arc<Inner>,
}

impl StopToken {
    pub fn new() -> Self {
        let (trigger, signal) = channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                stopped: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A token that fires when `self` fires, but can also fire on its own.
    pub fn child(&self) -> StopToken {
        let child = StopToken::new();
        let mut children = self.inner.children.lock();
        // Checked under the lock so a concurrent `stop` cannot miss the child.
        if self.is_stopped() {
            child.stop();
        } else {
            children.retain(|c| !c.is_stopped());
            children.push(child.clone());
        }
        child
    }

    /// Fire the token and all of its children. Idempotent.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        // Dropping the only sender disconnects the signal channel.
        self.inner.trigger.lock().take();
        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children {
            child.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless the token fires first.
    ///
    /// Returns `true` if the token fired.
    pub fn sleep(&self, duration: Duration) -> bool {
        match self.inner.signal.recv_timeout(duration) {
            Err(channel::RecvTimeoutError::Timeout) => self.is_stopped(),
            _ => true,
        }
    }

    /// Receiver that becomes ready (disconnected) once the token fires.
    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StopToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopToken")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
