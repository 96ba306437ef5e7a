//! `courier-bus` – The Switchboard
//!
//! Routes typed messages between workers that never hold references to one
//! another.
//!
//! # Modules
//!
//! - [`bus`] – [`MessageBus`]: registration, subscription, round-robin
//!   request routing, notification fan-out and request resolution.
//! - [`pending`] – [`PendingResult`]: the write-once handle a request's
//!   sender blocks on, with optional timeout and stop-token interruption.
//! - [`envelope`] – [`Envelope`] and [`Inbound`]: type-erased mailbox entries
//!   and the owned request a worker answers.
//! - [`stop`] – [`StopToken`]: cooperative cancellation for every blocking
//!   wait on the bus.

pub mod bus;
pub mod envelope;
mod mailbox;
pub mod pending;
pub mod stop;

pub use bus::MessageBus;
pub use envelope::{Envelope, Inbound};
pub use pending::PendingResult;
pub use stop::StopToken;
