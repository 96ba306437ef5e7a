//! Built-in lifecycle notifications.
//!
//! Nothing on the bus sends these automatically.  A worker announces its own
//! shutdown or failure through [`Context::announce_terminated`] /
//! [`Context::announce_crash`], and peers that should follow it down
//! subscribe with [`Setup::terminate_on`].
//!
//! [`Context::announce_terminated`]: crate::worker::Context::announce_terminated
//! [`Context::announce_crash`]: crate::worker::Context::announce_crash
//! [`Setup::terminate_on`]: crate::worker::Setup::terminate_on

use chrono::{DateTime, Utc};
use courier_types::{Message, Notification};

/// A worker finished its work and is shutting down normally.
#[derive(Debug, Clone, PartialEq)]
pub struct Terminated {
    /// Name of the worker that terminated.
    pub worker: String,
    pub at: DateTime<Utc>,
}

impl Terminated {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            at: Utc::now(),
        }
    }
}

impl Message for Terminated {}
impl Notification for Terminated {}

/// A worker hit an unrecoverable error.
#[derive(Debug, Clone, PartialEq)]
pub struct Crashed {
    /// Name of the failing worker.
    pub worker: String,
    /// Human-readable description of the failure.
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl Crashed {
    pub fn new(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

impl Message for Crashed {}
impl Notification for Crashed {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminated_records_sender_and_time() {
        let before = Utc::now();
        let t = Terminated::new("clock");
        assert_eq!(t.worker, "clock");
        assert!(t.at >= before);
    }

    #[test]
    fn crashed_carries_reason() {
        let c = Crashed::new("lidar-1", "sensor disconnected");
        assert_eq!(c.worker, "lidar-1");
        assert_eq!(c.reason, "sensor disconnected");
    }

    #[test]
    fn lifecycle_notifications_have_distinct_types() {
        assert_ne!(Terminated::message_type(), Crashed::message_type());
    }
}
