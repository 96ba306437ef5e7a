//! Demo workers: a clock that drives the run, squarers that answer
//! requests and a requester that asks one question per tick.

use std::sync::Arc;
use std::time::Duration;

use courier_runtime::{Context, Setup, Terminated, Worker};
use courier_types::{CourierError, Message, Notification, Request, WaitError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Sent once by `main` after every worker is ready.
#[derive(Debug, Clone)]
pub struct Start;
impl Message for Start {}
impl Notification for Start {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick(pub u64);
impl Message for Tick {}
impl Notification for Tick {}

/// Sent by the requester once it has stopped asking.
#[derive(Debug, Clone)]
pub struct Done;
impl Message for Done {}
impl Notification for Done {}

#[derive(Debug)]
pub struct Square(pub u64);
impl Message for Square {}
impl Request for Square {
    type Output = u64;
}

// ─────────────────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────────────────

/// Emits `Tick(1..=ticks)` spaced by `interval`, then announces
/// [`Terminated`].
///
/// The clock listens to its own ticks, so pacing happens inside the tick
/// callback and a stop request cuts the pause short.
pub struct Clock {
    pub interval: Duration,
    pub ticks: u64,
}

impl Worker for Clock {
    fn name(&self) -> String {
        "clock".to_string()
    }

    fn initialize(&mut self, setup: &mut Setup<'_, Self>) -> Result<(), CourierError> {
        setup.on_notification::<Start, _>(|_, _, ctx| {
            info!("clock started");
            ctx.send_notification(Tick(1));
        })?;
        setup.on_notification::<Tick, _>(|this, Tick(n), ctx| {
            if ctx.stop_token().sleep(this.interval) {
                return;
            }
            if n >= this.ticks {
                ctx.announce_terminated();
                ctx.terminate();
            } else {
                ctx.send_notification(Tick(n + 1));
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Squarer
// ─────────────────────────────────────────────────────────────────────────────

/// Answers every `Square(n)` with `n * n` until the requester is [`Done`].
pub struct Squarer {
    pub label: String,
    pub answered: u64,
}

impl Squarer {
    pub fn new(index: usize) -> Self {
        Self {
            label: format!("squarer-{index}"),
            answered: 0,
        }
    }
}

impl Worker for Squarer {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn initialize(&mut self, setup: &mut Setup<'_, Self>) -> Result<(), CourierError> {
        setup.on_request::<Square, _>(|this, inbound, ctx| {
            let n = inbound.0;
            ctx.resolve(&inbound, n.saturating_mul(n));
            this.answered += 1;
        })?;
        setup.terminate_on::<Done>()
    }

    fn on_stop(&mut self, _ctx: &mut Context) {
        info!(answered = self.answered, "squarer done");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requester
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome counts collected by the [`Requester`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub answered: u64,
    pub sum_of_squares: u64,
    pub undeliverable: u64,
    pub timed_out: u64,
    pub interrupted: u64,
    pub abandoned: u64,
}

/// Sends `Square(n)` on every `Tick(n)` and waits for the answer.
///
/// Stops on [`Terminated`] and then releases the squarers with [`Done`];
/// every tick queued before the clock's announcement is still answered.
pub struct Requester {
    pub timeout: Duration,
    pub summary: Arc<Mutex<Summary>>,
}

impl Worker for Requester {
    fn name(&self) -> String {
        "requester".to_string()
    }

    fn initialize(&mut self, setup: &mut Setup<'_, Self>) -> Result<(), CourierError> {
        setup.on_notification::<Tick, _>(|this, Tick(n), ctx| {
            let Some(pending) = ctx.send_request(Square(n)) else {
                this.summary.lock().undeliverable += 1;
                return;
            };
            let outcome = pending.wait_or_stop(ctx.stop_token(), Some(this.timeout));
            let mut summary = this.summary.lock();
            match outcome {
                Ok(square) => {
                    debug!(n, square, "answer received");
                    summary.answered += 1;
                    summary.sum_of_squares = summary.sum_of_squares.saturating_add(square);
                }
                Err(WaitError::TimedOut) => {
                    warn!(n, "request timed out");
                    summary.timed_out += 1;
                }
                Err(WaitError::Interrupted) => summary.interrupted += 1,
                Err(WaitError::Abandoned) => summary.abandoned += 1,
            }
        })?;
        setup.terminate_on::<Terminated>()
    }

    fn on_stop(&mut self, ctx: &mut Context) {
        ctx.send_notification(Done);
    }
}
