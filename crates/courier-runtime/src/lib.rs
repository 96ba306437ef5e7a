//! # courier-runtime
//!
//! Everything needed to host workers on a [`courier_bus::MessageBus`].
//!
//! ## Modules
//!
//! - [`worker`] – the [`Worker`] trait, callback registration and the
//!   per-worker dispatch loop ([`run`]).
//! - [`launcher`] – spawns workers on their own threads and collects their
//!   exit status.
//! - [`latch`] – start-up barrier so drivers wait for every subscriber.
//! - [`lifecycle`] – observable worker states.
//! - [`system`] – built-in `Terminated` / `Crashed` notifications.
//! - [`telemetry`] – `tracing` subscriber and OTLP export.

pub mod latch;
pub mod launcher;
pub mod lifecycle;
pub mod system;
pub mod telemetry;
pub mod worker;

pub use latch::ReadyLatch;
pub use launcher::{Launcher, WorkerHandle, WorkerReport};
pub use lifecycle::{StateCell, WorkerState};
pub use system::{Crashed, Terminated};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
pub use worker::{Context, RunOptions, Setup, Worker, run};
