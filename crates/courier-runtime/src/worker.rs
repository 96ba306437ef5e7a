//! [`Worker`] – the base every service on the bus is built on.
//!
//! A worker never touches another worker.  It declares the message types it
//! cares about in [`Worker::initialize`] and then reacts to whatever lands
//! in its own mailbox.  [`run`] drives the whole lifecycle on the calling
//! thread:
//!
//! 1. **Register** – the bus allocates the worker's mailbox.
//! 2. **Initialize** – callbacks are installed through [`Setup`]; each one
//!    subscribes the worker immediately, so no message can arrive before
//!    the callback that handles it.
//! 3. **Run** – block on the mailbox and dispatch every message to the
//!    callback registered for its exact type.
//! 4. **Stop** – when a callback calls [`Context::terminate`] or the worker's
//!    [`StopToken`] fires, the loop exits, [`Worker::on_stop`] runs and the
//!    worker unregisters itself.
//!
//! Callbacks of one worker run strictly one after another on its own thread,
//! so worker state needs no locking.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use courier_bus::MessageBus;
//! use courier_runtime::{run, Setup, Worker, RunOptions};
//! use courier_types::{CourierError, Message, Request};
//!
//! struct Square(u64);
//! impl Message for Square {}
//! impl Request for Square {
//!     type Output = u64;
//! }
//!
//! struct Squarer;
//!
//! impl Worker for Squarer {
//!     fn name(&self) -> String {
//!         "squarer".to_string()
//!     }
//!
//!     fn initialize(&mut self, setup: &mut Setup<'_, Self>) -> Result<(), CourierError> {
//!         setup.on_request::<Square, _>(|_, inbound, ctx| {
//!             let n = inbound.0;
//!             ctx.resolve(&inbound, n * n);
//!         })
//!     }
//! }
//!
//! let bus = Arc::new(MessageBus::new());
//! let options = RunOptions::new();
//! let stop = options.stop_token().clone();
//! stop.stop();
//! // Returns straight away because the stop token already fired.
//! run(bus, Squarer, options).expect("clean shutdown");
//! ```

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use courier_bus::{Envelope, Inbound, MessageBus, PendingResult, StopToken};
use courier_types::{CourierError, MessageType, Notification, Request, WorkerId};
use tracing::{debug, error, info, info_span, warn};

use crate::latch::{Arrival, ReadyLatch};
use crate::lifecycle::{StateCell, WorkerState};
use crate::system::{Crashed, Terminated};

// ─────────────────────────────────────────────────────────────────────────────
// Worker trait
// ─────────────────────────────────────────────────────────────────────────────

/// A service that communicates only through the bus.
pub trait Worker: Send + Sized + 'static {
    /// Human-readable name used for the worker thread and in logs.
    fn name(&self) -> String;

    /// Install callbacks and optionally send the first messages.
    ///
    /// Returning an error aborts the worker before it consumes anything.
    fn initialize(&mut self, setup: &mut Setup<'_, Self>) -> Result<(), CourierError>;

    /// Called once after the loop exits, before the worker unregisters.
    fn on_stop(&mut self, _ctx: &mut Context) {}
}

type Handler<W> = Box<dyn FnMut(&mut W, Envelope, &mut Context)>;

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

/// The worker's view of the bus, handed to every callback.
pub struct Context {
    id: WorkerId,
    name: String,
    bus: Arc<MessageBus>,
    stop: StopToken,
    terminating: bool,
}

impl Context {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// The token that interrupts this worker's waits.
    ///
    /// Pass it to [`PendingResult::wait_or_stop`] so a worker blocked on an
    /// answer still shuts down promptly.
    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    /// Send a request; `None` means nobody handles `R` right now.
    pub fn send_request<R: Request>(&self, request: R) -> Option<PendingResult<R::Output>> {
        let handle = self.bus.send_request(request);
        if handle.is_none() {
            debug!(
                worker = %self.name,
                request_type = %R::message_type(),
                "request undeliverable"
            );
        }
        handle
    }

    /// Send a notification to every current subscriber of `N`.
    pub fn send_notification<N: Notification>(&self, notification: N) -> usize {
        self.bus.send_notification(notification)
    }

    /// Answer a request this worker received.
    ///
    /// Returns `false` when the request was already settled (answered,
    /// abandoned or evicted); that is not an error.
    pub fn resolve<R: Request>(&self, inbound: &Inbound<R>, result: R::Output) -> bool {
        self.bus.resolve::<R>(inbound.id(), result)
    }

    /// Ask the loop to stop once the current callback returns.
    pub fn terminate(&mut self) {
        if !self.terminating {
            debug!(worker = %self.name, "termination requested");
        }
        self.terminating = true;
    }

    /// `true` once [`Context::terminate`] was called or the stop token fired.
    pub fn is_terminating(&self) -> bool {
        self.terminating || self.stop.is_stopped()
    }

    /// Broadcast [`Terminated`] on behalf of this worker.
    pub fn announce_terminated(&self) -> usize {
        self.send_notification(Terminated::new(self.name.clone()))
    }

    /// Broadcast [`Crashed`] on behalf of this worker.
    pub fn announce_crash(&self, reason: impl Into<String>) -> usize {
        let reason = reason.into();
        error!(worker = %self.name, %reason, "worker crashed");
        self.send_notification(Crashed::new(self.name.clone(), reason))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Setup
// ─────────────────────────────────────────────────────────────────────────────

/// Callback registration surface available during [`Worker::initialize`].
///
/// Dereferences to [`Context`], so initialization can also send messages.
pub struct Setup<'a, W> {
    ctx: &'a mut Context,
    handlers: &'a mut HashMap<MessageType, Handler<W>>,
}

impl<W: Worker> Setup<'_, W> {
    /// Handle requests of type `R`.
    ///
    /// The callback owns the [`Inbound`] and may answer it right away or keep
    /// it and answer from a later callback.  A request that is never
    /// answered leaves its sender waiting.
    pub fn on_request<R, F>(&mut self, mut handler: F) -> Result<(), CourierError>
    where
        R: Request,
        F: FnMut(&mut W, Inbound<R>, &mut Context) + 'static,
    {
        let message_type = R::message_type();
        self.install(
            message_type,
            Box::new(move |worker: &mut W, envelope: Envelope, ctx: &mut Context| {
                match envelope.into_request::<R>() {
                    Ok(inbound) => handler(worker, inbound, ctx),
                    Err(envelope) => {
                        warn!(expected = %message_type, got = ?envelope, "foreign envelope dropped")
                    }
                }
            }),
        )
    }

    /// Handle notifications of type `N`.
    pub fn on_notification<N, F>(&mut self, mut handler: F) -> Result<(), CourierError>
    where
        N: Notification,
        F: FnMut(&mut W, N, &mut Context) + 'static,
    {
        let message_type = N::message_type();
        self.install(
            message_type,
            Box::new(move |worker: &mut W, envelope: Envelope, ctx: &mut Context| {
                match envelope.into_notification::<N>() {
                    Ok(notification) => handler(worker, notification, ctx),
                    Err(envelope) => {
                        warn!(expected = %message_type, got = ?envelope, "foreign envelope dropped")
                    }
                }
            }),
        )
    }

    /// Stop this worker as soon as any `N` arrives.
    pub fn terminate_on<N: Notification>(&mut self) -> Result<(), CourierError> {
        self.on_notification::<N, _>(|_, _, ctx| ctx.terminate())
    }

    fn install(&mut self, message_type: MessageType, handler: Handler<W>) -> Result<(), CourierError> {
        if self.handlers.insert(message_type, handler).is_some() {
            debug!(worker = %self.ctx.name, %message_type, "callback replaced");
        }
        self.ctx.bus.subscribe(message_type, self.ctx.id)
    }
}

impl<W> Deref for Setup<'_, W> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl<W> DerefMut for Setup<'_, W> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run options
// ─────────────────────────────────────────────────────────────────────────────

/// Everything [`run`] needs besides the bus and the worker.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    id: WorkerId,
    stop: StopToken,
    state: StateCell,
    ready: Option<ReadyLatch>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt the worker through `stop` instead of a private token.
    pub fn with_stop(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    /// Publish lifecycle transitions into `state`.
    pub fn with_state(mut self, state: StateCell) -> Self {
        self.state = state;
        self
    }

    /// Arrive on `ready` once initialization has finished.
    ///
    /// The caller is responsible for [`ReadyLatch::expect_one`].
    pub fn with_ready(mut self, ready: ReadyLatch) -> Self {
        self.ready = Some(ready);
        self
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    pub fn state(&self) -> &StateCell {
        &self.state
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch loop
// ─────────────────────────────────────────────────────────────────────────────

/// Unregisters on drop so a panicking callback still leaves the bus clean.
struct Registration {
    bus: Arc<MessageBus>,
    id: WorkerId,
    state: StateCell,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.state.set(WorkerState::Stopping);
        self.bus.unregister(self.id);
        self.state.set(WorkerState::Stopped);
    }
}

/// Register `worker`, initialize it and run its dispatch loop on the current
/// thread until it stops.
///
/// # Errors
///
/// Returns the error produced by [`Worker::initialize`]; the worker is
/// unregistered before returning.
pub fn run<W: Worker>(bus: Arc<MessageBus>, mut worker: W, options: RunOptions) -> Result<(), CourierError> {
    let RunOptions { id, stop, state, ready } = options;
    let name = worker.name();
    let span = info_span!("worker", worker = %name, id = %id);
    let _entered = span.enter();

    let arrival = Arrival(ready);
    bus.register(id);
    state.set(WorkerState::Registered);
    let registration = Registration {
        bus: Arc::clone(&bus),
        id,
        state: state.clone(),
    };

    let mut ctx = Context {
        id,
        name,
        bus,
        stop,
        terminating: false,
    };
    let mut handlers: HashMap<MessageType, Handler<W>> = HashMap::new();

    let initialized = worker.initialize(&mut Setup {
        ctx: &mut ctx,
        handlers: &mut handlers,
    });
    // The latch opens only once the state a driver would observe is final.
    if let Err(e) = initialized {
        error!(error = %e, "initialization failed");
        drop(registration);
        drop(arrival);
        return Err(e);
    }

    state.set(WorkerState::Running);
    drop(arrival);
    info!(subscriptions = handlers.len(), "worker running");

    let mut handled: u64 = 0;
    while !ctx.is_terminating() {
        let Some(envelope) = ctx.bus.await_next(id, &ctx.stop) else {
            break;
        };
        let message_type = envelope.message_type();
        match handlers.get_mut(&message_type) {
            Some(handler) => {
                handler(&mut worker, envelope, &mut ctx);
                handled += 1;
            }
            None => warn!(%message_type, "no callback for message type; dropped"),
        }
    }

    state.set(WorkerState::Stopping);
    worker.on_stop(&mut ctx);
    drop(registration);
    info!(handled, "worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::{Message, WaitError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Debug)]
    struct Square(u64);
    impl Message for Square {}
    impl Request for Square {
        type Output = u64;
    }

    #[derive(Debug, Clone)]
    struct Tick(u64);
    impl Message for Tick {}
    impl Notification for Tick {}

    struct Squarer;

    impl Worker for Squarer {
        fn name(&self) -> String {
            "squarer".to_string()
        }

        fn initialize(&mut self, setup: &mut Setup<'_, Self>) -> Result<(), CourierError> {
            setup.on_request::<Square, _>(|_, inbound, ctx| {
                let n = inbound.0;
                ctx.resolve(&inbound, n * n);
            })?;
            setup.terminate_on::<Terminated>()
        }
    }

    fn spawn<W: Worker>(bus: &Arc<MessageBus>, worker: W) -> (RunOptions, thread::JoinHandle<Result<(), CourierError>>) {
        let ready = ReadyLatch::new();
        ready.expect_one();
        let options = RunOptions::new().with_ready(ready.clone());
        let observed = options.clone();
        let bus = Arc::clone(bus);
        let handle = thread::spawn(move || run(bus, worker, options));
        assert!(ready.wait(WAIT), "worker never finished initializing");
        (observed, handle)
    }

    #[test]
    fn request_is_answered_by_running_worker() {
        let bus = Arc::new(MessageBus::new());
        let (options, handle) = spawn(&bus, Squarer);
        assert_eq!(options.state().get(), WorkerState::Running);

        let pending = bus.send_request(Square(12)).expect("squarer subscribed");
        assert_eq!(pending.wait_timeout(WAIT), Ok(144));

        bus.send_notification(Terminated::new("test"));
        handle.join().expect("worker panicked").expect("clean exit");
        assert_eq!(options.state().get(), WorkerState::Stopped);
        assert!(!bus.is_registered(options.id()));
    }

    #[test]
    fn worker_is_running_as_soon_as_the_latch_opens() {
        let bus = Arc::new(MessageBus::new());
        for _ in 0..25 {
            let (options, handle) = spawn(&bus, Squarer);
            assert_eq!(options.state().get(), WorkerState::Running);
            assert_eq!(bus.subscriber_count(Square::message_type()), 1);
            options.stop_token().stop();
            handle.join().expect("worker panicked").expect("clean exit");
        }
    }

    #[test]
    fn failed_worker_is_gone_before_the_latch_opens() {
        let bus = Arc::new(MessageBus::new());
        let ready = ReadyLatch::new();
        ready.expect_one();
        let options = RunOptions::new().with_ready(ready.clone());
        let observed = options.clone();
        let worker_bus = Arc::clone(&bus);
        let handle = thread::spawn(move || run(worker_bus, Broken, options));

        assert!(ready.wait(WAIT));
        assert_eq!(observed.state().get(), WorkerState::Stopped);
        assert!(!bus.is_registered(observed.id()));
        assert!(bus.send_request(Square(2)).is_none());
        assert!(handle.join().expect("worker panicked").is_err());
    }

    #[test]
    fn external_stop_unblocks_idle_worker() {
        let bus = Arc::new(MessageBus::new());
        let (options, handle) = spawn(&bus, Squarer);
        options.stop_token().stop();
        handle.join().expect("worker panicked").expect("clean exit");
        assert_eq!(options.state().get(), WorkerState::Stopped);
        assert_eq!(bus.subscriber_count(Square::message_type()), 0);
    }

    struct Broken;

    impl Worker for Broken {
        fn name(&self) -> String {
            "broken".to_string()
        }

        fn initialize(&mut self, setup: &mut Setup<'_, Self>) -> Result<(), CourierError> {
            setup.on_request::<Square, _>(|_, _, _| {})?;
            Err(CourierError::Initialization {
                worker: setup.name().to_string(),
                details: "sensor data missing".to_string(),
            })
        }
    }

    #[test]
    fn failed_initialization_unregisters_the_worker() {
        let bus = Arc::new(MessageBus::new());
        let options = RunOptions::new();
        let state = options.state().clone();
        let result = run(Arc::clone(&bus), Broken, options);
        assert!(matches!(result, Err(CourierError::Initialization { .. })));
        assert_eq!(state.get(), WorkerState::Stopped);
        assert!(bus.send_request(Square(1)).is_none());
    }

    /// Holds requests until a tick says they are due, the way a tracker
    /// batches detections.
    struct Deferred {
        held: VecDeque<Inbound<Square>>,
    }

    impl Worker for Deferred {
        fn name(&self) -> String {
            "deferred".to_string()
        }

        fn initialize(&mut self, setup: &mut Setup<'_, Self>) -> Result<(), CourierError> {
            setup.on_request::<Square, _>(|this, inbound, _| this.held.push_back(inbound))?;
            setup.on_notification::<Tick, _>(|this, tick, ctx| {
                while let Some(inbound) = this.held.pop_front() {
                    let n = inbound.0;
                    ctx.resolve(&inbound, n * n + tick.0);
                }
            })?;
            setup.terminate_on::<Terminated>()
        }
    }

    #[test]
    fn requests_can_be_answered_from_a_later_callback() {
        let bus = Arc::new(MessageBus::new());
        let (_, handle) = spawn(&bus, Deferred { held: VecDeque::new() });

        let first = bus.send_request(Square(2)).expect("delivered");
        let second = bus.send_request(Square(3)).expect("delivered");
        assert_eq!(
            first.wait_timeout(Duration::from_millis(50)),
            Err(WaitError::TimedOut)
        );

        bus.send_notification(Tick(100));
        assert_eq!(first.wait_timeout(WAIT), Ok(104));
        assert_eq!(second.wait_timeout(WAIT), Ok(109));

        bus.send_notification(Terminated::new("test"));
        handle.join().expect("worker panicked").expect("clean exit");
    }

    /// Emits its first tick from `initialize` and counts down on every tick
    /// it sees, announcing termination when done.
    struct Countdown {
        remaining: u64,
    }

    impl Worker for Countdown {
        fn name(&self) -> String {
            "countdown".to_string()
        }

        fn initialize(&mut self, setup: &mut Setup<'_, Self>) -> Result<(), CourierError> {
            setup.on_notification::<Tick, _>(|this, tick, ctx| {
                this.remaining -= 1;
                if this.remaining == 0 {
                    ctx.announce_terminated();
                    ctx.terminate();
                } else {
                    ctx.send_notification(Tick(tick.0 + 1));
                }
            })?;
            setup.send_notification(Tick(1));
            Ok(())
        }
    }

    #[test]
    fn worker_can_drive_itself_and_terminate() {
        let bus = Arc::new(MessageBus::new());
        let observer = WorkerId::new();
        bus.register(observer);
        bus.subscribe(Terminated::message_type(), observer).expect("subscribe");

        run(Arc::clone(&bus), Countdown { remaining: 5 }, RunOptions::new()).expect("clean exit");

        let env = bus.try_next(observer).expect("termination announced");
        let terminated = env.into_notification::<Terminated>().expect("terminated");
        assert_eq!(terminated.worker, "countdown");
    }

    struct Counter {
        seen: Arc<AtomicU64>,
    }

    impl Worker for Counter {
        fn name(&self) -> String {
            "counter".to_string()
        }

        fn initialize(&mut self, setup: &mut Setup<'_, Self>) -> Result<(), CourierError> {
            setup.on_notification::<Tick, _>(|this, _, _| {
                this.seen.fetch_add(1, Ordering::SeqCst);
            })?;
            setup.terminate_on::<Crashed>()
        }

        fn on_stop(&mut self, ctx: &mut Context) {
            ctx.announce_terminated();
        }
    }

    #[test]
    fn crash_notification_stops_subscribed_peers() {
        let bus = Arc::new(MessageBus::new());
        let seen = Arc::new(AtomicU64::new(0));
        let (options, handle) = spawn(&bus, Counter { seen: Arc::clone(&seen) });

        bus.send_notification(Tick(1));
        bus.send_notification(Tick(2));
        bus.send_notification(Crashed::new("lidar", "disconnected"));
        handle.join().expect("worker panicked").expect("clean exit");

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(options.state().get(), WorkerState::Stopped);
    }

    #[test]
    fn pending_request_is_abandoned_when_receiver_stops_first() {
        let bus = Arc::new(MessageBus::new());
        let (_, handle) = spawn(&bus, Deferred { held: VecDeque::new() });

        // Queue the termination ahead of the request so the request is still
        // in the mailbox when the worker unregisters.
        bus.send_notification(Terminated::new("test"));
        let pending = bus.send_request(Square(4));
        handle.join().expect("worker panicked").expect("clean exit");

        // Either the worker was already gone (undeliverable) or the request
        // was dropped with its mailbox; it must never hang.
        if let Some(pending) = pending {
            assert_eq!(pending.wait_timeout(WAIT), Err(WaitError::Abandoned));
        }
    }
}
