use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

use thiserror::Error;
use uuid::Uuid;

/// Identifies a concrete message type on the bus.
///
/// Two values are equal when they describe the same Rust type. The type name
/// is carried only for diagnostics and log output.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    /// The [`MessageType`] of `M`.
    pub fn of<M: Any>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
        }
    }

    /// Fully qualified Rust type name, e.g. `"demo::Square"`.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageType({})", self.name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Anything that can travel over the bus.
pub trait Message: Any + Send + 'static {
    /// The routing key for this message.
    fn message_type() -> MessageType
    where
        Self: Sized,
    {
        MessageType::of::<Self>()
    }
}

/// A message handled by exactly one subscriber and answered exactly once.
pub trait Request: Message {
    /// The value the handling worker resolves the request with.
    ///
    /// `Clone` so that repeated reads of a resolved handle all observe the
    /// stored value.
    type Output: Clone + Send + Sync + 'static;
}

/// A fire-and-forget message delivered to every current subscriber.
///
/// Each subscriber receives its own clone.
pub trait Notification: Message + Clone {}

/// Identity of a worker registered on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

/// Identity of one in-flight request instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised by bus and runtime operations.
///
/// Undeliverable requests and stale resolutions are not errors: the former
/// yields no handle, the latter is a no-op.
#[derive(Error, Debug)]
pub enum CourierError {
    #[error("worker {0} is not registered on the bus")]
    NotRegistered(WorkerId),

    #[error("worker {worker} failed to initialize: {details}")]
    Initialization { worker: String, details: String },

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("worker {0} panicked")]
    WorkerPanicked(String),
}

/// Why waiting on a pending result produced no value.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("the result was not available before the deadline")]
    TimedOut,

    #[error("the wait was interrupted by a stop signal")]
    Interrupted,

    #[error("the request can no longer be answered")]
    Abandoned,
}
