//! [`Launcher`] – one OS thread per worker.
//!
//! The launcher is the register-and-run entry point for applications: it
//! spawns each worker on a named thread, tracks start-up through a
//! [`ReadyLatch`] and keeps a [`WorkerHandle`] per worker for observing its
//! lifecycle, stopping it and collecting its exit status.
//!
//! Every worker's [`StopToken`] is a child of the launcher's shutdown token,
//! so [`Launcher::stop_all`] (or firing [`Launcher::shutdown_token`] from a
//! signal handler) interrupts all of them at once.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use courier_bus::{MessageBus, StopToken};
use courier_types::{CourierError, WorkerId};
use tracing::{debug, error, info};

use crate::latch::ReadyLatch;
use crate::lifecycle::{StateCell, WorkerState};
use crate::worker::{RunOptions, Worker, run};

/// Observer and control handle for one spawned worker.
pub struct WorkerHandle {
    id: WorkerId,
    name: String,
    state: StateCell,
    stop: StopToken,
    thread: JoinHandle<Result<(), CourierError>>,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Interrupt this worker only.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Exit status of a joined worker.
#[derive(Debug)]
pub struct WorkerReport {
    pub name: String,
    pub id: WorkerId,
    pub result: Result<(), CourierError>,
}

pub struct Launcher {
    bus: Arc<MessageBus>,
    shutdown: StopToken,
    ready: ReadyLatch,
    workers: Vec<WorkerHandle>,
}

impl Launcher {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            shutdown: StopToken::new(),
            ready: ReadyLatch::new(),
            workers: Vec::new(),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Parent of every worker's stop token.
    pub fn shutdown_token(&self) -> &StopToken {
        &self.shutdown
    }

    /// Start `worker` on its own thread.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::Spawn`] when the OS refuses to create the
    /// thread.
    pub fn spawn<W: Worker>(&mut self, worker: W) -> Result<WorkerId, CourierError> {
        let name = worker.name();
        let options = RunOptions::new()
            .with_stop(self.shutdown.child())
            .with_ready(self.ready.clone());
        let id = options.id();
        let state = options.state().clone();
        let stop = options.stop_token().clone();

        self.ready.expect_one();
        let bus = Arc::clone(&self.bus);
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(bus, worker, options))
            .map_err(|e| {
                // The worker will never arrive on its own.
                self.ready.arrive();
                CourierError::Spawn(format!("{name}: {e}"))
            })?;

        debug!(worker = %name, %id, "worker thread spawned");
        self.workers.push(WorkerHandle {
            id,
            name,
            state,
            stop,
            thread,
        });
        Ok(id)
    }

    /// Block until every spawned worker has finished initializing.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let ready = self.ready.wait(timeout);
        if ready {
            info!(workers = self.workers.len(), "all workers initialized");
        }
        ready
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Interrupt every spawned worker.
    pub fn stop_all(&self) {
        info!(workers = self.workers.len(), "stopping all workers");
        self.shutdown.stop();
    }

    /// Wait for every worker thread to exit.
    pub fn join(self) -> Vec<WorkerReport> {
        self.workers
            .into_iter()
            .map(|handle| {
                let result = handle.thread.join().unwrap_or_else(|_| {
                    error!(worker = %handle.name, "worker thread panicked");
                    Err(CourierError::WorkerPanicked(handle.name.clone()))
                });
                WorkerReport {
                    name: handle.name,
                    id: handle.id,
                    result,
                }
            })
            .collect()
    }
}
