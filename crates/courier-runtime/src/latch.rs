//! [`ReadyLatch`] – start-up barrier for a group of workers.
//!
//! Each worker counts as outstanding from the moment it is expected until it
//! has finished `initialize`.  A driver that must not emit traffic before
//! every subscriber exists (a clock, a replay source) waits on the latch
//! first.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Inner {
    outstanding: Mutex<usize>,
    all_arrived: Condvar,
}

#[derive(Clone, Default)]
pub struct ReadyLatch {
    inner: Arc<Inner>,
}

impl ReadyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect one more arrival.
    pub fn expect_one(&self) {
        *self.inner.outstanding.lock() += 1;
    }

    /// Record one arrival. Extra arrivals are ignored.
    pub fn arrive(&self) {
        let mut outstanding = self.inner.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.inner.all_arrived.notify_all();
        }
    }

    pub fn outstanding(&self) -> usize {
        *self.inner.outstanding.lock()
    }

    /// Block until every expected arrival happened or `timeout` elapses.
    ///
    /// Returns `true` when the latch opened.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outstanding = self.inner.outstanding.lock();
        while *outstanding > 0 {
            if self
                .inner
                .all_arrived
                .wait_until(&mut outstanding, deadline)
                .timed_out()
            {
                return *outstanding == 0;
            }
        }
        true
    }
}

impl fmt::Debug for ReadyLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyLatch")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Arrives on drop, so a worker whose initialization fails or panics still
/// releases the latch.
pub(crate) struct Arrival(pub(crate) Option<ReadyLatch>);

impl Drop for Arrival {
    fn drop(&mut self) {
        if let Some(latch) = self.0.take() {
            latch.arrive();
        }
    }
}
