//! Worker lifecycle states.
//!
//! ```text
//! Created ──register──▶ Registered ──initialize──▶ Running
//!                                                    │
//!                        Stopped ◀──unregister── Stopping
//! ```
//!
//! The state is written only by the worker's own thread and read by anyone
//! holding the worker's [`StateCell`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum WorkerState {
    /// Constructed but not yet known to the bus.
    Created = 0,
    /// Mailbox allocated; callbacks not yet installed.
    Registered = 1,
    /// Consuming its mailbox.
    Running = 2,
    /// Loop exited; running `on_stop` and unregistering.
    Stopping = 3,
    /// Unregistered. Terminal.
    Stopped = 4,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Created,
            1 => WorkerState::Registered,
            2 => WorkerState::Running,
            3 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerState::Created => "created",
            WorkerState::Registered => "registered",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Shared, lock-free view of one worker's [`WorkerState`].
#[derive(Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Created as u8)))
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateCell({})", self.get())
    }
}
