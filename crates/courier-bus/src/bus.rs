//! Typed, in-process message broker.
//!
//! The bus owns three independently synchronised tables:
//!
//! | Table | Key | Guard |
//! |---|---|---|
//! | Mailboxes | [`WorkerId`] | [`DashMap`] shard locks |
//! | Subscribers | [`MessageType`] | [`RwLock`] over the map, [`Mutex`] per rotation list |
//! | Pending results | [`RequestId`] | [`DashMap`] shard locks |
//!
//! Membership changes (`subscribe`, `unregister`) take the subscriber table
//! exclusively.  Sends take it shared, so any number of sends proceed in
//! parallel and only ever wait for a membership change.  Round-robin
//! selection pops and re-pushes under the per-type mutex, so two concurrent
//! requests can never pick the same least-recently-used worker.
//!
//! # Unregistration policy
//!
//! Messages still queued when a worker unregisters are dropped.  Every
//! dropped request has its pending handle marked abandoned, so the sender
//! wakes with [`WaitError::Abandoned`][courier_types::WaitError::Abandoned]
//! rather than waiting on an answer that can never come.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_types::{CourierError, MessageType, Notification, Request, RequestId, WorkerId};
use crossbeam::select;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::envelope::Envelope;
use crate::mailbox::Mailbox;
use crate::pending::{ErasedSlot, PendingResult, Slot};
use crate::stop::StopToken;

struct PendingEntry {
    slot: Arc<dyn ErasedSlot>,
    request_type: MessageType,
    created_at: Instant,
}

/// Shared message broker. Wrap it in an [`Arc`] and hand a clone to every
/// worker.
#[derive(Default)]
pub struct MessageBus {
    mailboxes: DashMap<WorkerId, Mailbox>,
    subscribers: RwLock<HashMap<MessageType, Mutex<VecDeque<WorkerId>>>>,
    pending: DashMap<RequestId, PendingEntry>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a mailbox for `worker`. Calling it again is a no-op.
    pub fn register(&self, worker: WorkerId) {
        match self.mailboxes.entry(worker) {
            Entry::Occupied(_) => trace!(%worker, "worker already registered"),
            Entry::Vacant(slot) => {
                slot.insert(Mailbox::new());
                debug!(%worker, "worker registered");
            }
        }
    }

    /// Add `worker` to the subscriber list of `message_type`.
    ///
    /// The worker must be registered first. Subscribing twice to the same
    /// type keeps a single entry.
    pub fn subscribe(&self, message_type: MessageType, worker: WorkerId) -> Result<(), CourierError> {
        let mut table = self.subscribers.write();
        if !self.mailboxes.contains_key(&worker) {
            return Err(CourierError::NotRegistered(worker));
        }
        let list = table.entry(message_type).or_default().get_mut();
        if !list.contains(&worker) {
            list.push_back(worker);
            debug!(%worker, %message_type, "worker subscribed");
        }
        Ok(())
    }

    /// Destroy `worker`'s mailbox and remove it from every subscriber list.
    ///
    /// Once this returns no send can select the worker.  Anything still
    /// queued is dropped; queued requests are marked abandoned.
    pub fn unregister(&self, worker: WorkerId) {
        let mailbox = {
            let mut table = self.subscribers.write();
            let mailbox = self.mailboxes.remove(&worker).map(|(_, mailbox)| mailbox);
            for list in table.values_mut() {
                list.get_mut().retain(|w| *w != worker);
            }
            table.retain(|_, list| !list.get_mut().is_empty());
            mailbox
        };

        let Some(mailbox) = mailbox else {
            trace!(%worker, "unregister for unknown worker ignored");
            return;
        };

        let leftovers = mailbox.drain();
        let mut abandoned = 0usize;
        for envelope in &leftovers {
            if let Some(id) = envelope.request_id() {
                if self.abandon(id) {
                    abandoned += 1;
                }
            }
        }
        if leftovers.is_empty() {
            debug!(%worker, "worker unregistered");
        } else {
            warn!(
                %worker,
                dropped = leftovers.len(),
                abandoned_requests = abandoned,
                "worker unregistered with undelivered messages"
            );
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Route `request` to one subscriber, chosen round-robin.
    ///
    /// Returns `None` when nobody subscribes to `R`; no mailbox is touched in
    /// that case and the caller decides what "undeliverable" means.
    pub fn send_request<R: Request>(&self, request: R) -> Option<PendingResult<R::Output>> {
        let message_type = R::message_type();
        let table = self.subscribers.read();

        let Some(target) = table.get(&message_type).and_then(|list| {
            let mut list = list.lock();
            let worker = list.pop_front()?;
            list.push_back(worker);
            Some(worker)
        }) else {
            debug!(%message_type, "request has no subscriber");
            return None;
        };

        // Subscribed workers always own a mailbox: both tables change only
        // under the exclusive lock this send is excluding.
        let Some(mailbox) = self.mailboxes.get(&target) else {
            warn!(worker = %target, %message_type, "selected subscriber has no mailbox");
            return None;
        };

        let id = RequestId::new();
        let (handle, slot) = PendingResult::<R::Output>::new();
        // Record before enqueueing so a fast receiver always finds the entry.
        self.pending.insert(
            id,
            PendingEntry {
                slot: slot as Arc<dyn ErasedSlot>,
                request_type: message_type,
                created_at: Instant::now(),
            },
        );
        mailbox.push(Envelope::request(id, request));
        trace!(request = %id, worker = %target, %message_type, "request enqueued");
        Some(handle)
    }

    /// Enqueue a clone of `notification` for every current subscriber, in
    /// subscription order.
    ///
    /// Returns the number of mailboxes reached; zero is not an error.
    pub fn send_notification<N: Notification>(&self, notification: N) -> usize {
        let message_type = N::message_type();
        let table = self.subscribers.read();

        let targets: Vec<WorkerId> = match table.get(&message_type) {
            Some(list) => list.lock().iter().copied().collect(),
            None => Vec::new(),
        };

        let mut delivered = 0;
        for worker in targets {
            if let Some(mailbox) = self.mailboxes.get(&worker) {
                mailbox.push(Envelope::notification(notification.clone()));
                delivered += 1;
            }
        }
        trace!(%message_type, delivered, "notification fanned out");
        delivered
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resolution
    // ─────────────────────────────────────────────────────────────────────────

    /// Answer the request identified by `id`.
    ///
    /// Returns `true` when this call settled the sender's handle.  Unknown,
    /// already resolved, abandoned or evicted requests are a silent no-op.
    pub fn resolve<R: Request>(&self, id: RequestId, result: R::Output) -> bool {
        let expected = R::message_type();
        let Some((_, entry)) = self
            .pending
            .remove_if(&id, |_, entry| entry.request_type == expected)
        else {
            if let Some(entry) = self.pending.get(&id) {
                warn!(
                    request = %id,
                    pending_type = %entry.request_type,
                    resolved_as = %expected,
                    "resolution type mismatch ignored"
                );
            } else {
                trace!(request = %id, "stale resolution ignored");
            }
            return false;
        };

        match entry.slot.as_any().downcast_ref::<Slot<R::Output>>() {
            Some(slot) => slot.resolve(result),
            None => false,
        }
    }

    /// Mark every pending request older than `max_age` as abandoned.
    ///
    /// Returns the number of entries evicted.
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        let mut evicted = 0;
        self.pending.retain(|id, entry| {
            if entry.created_at.elapsed() <= max_age {
                return true;
            }
            entry.slot.abandon();
            evicted += 1;
            debug!(request = %id, request_type = %entry.request_type, "stale request evicted");
            false
        });
        evicted
    }

    fn abandon(&self, id: RequestId) -> bool {
        match self.pending.remove(&id) {
            Some((_, entry)) => entry.slot.abandon(),
            None => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Receiving
    // ─────────────────────────────────────────────────────────────────────────

    /// Block until `worker`'s mailbox yields its next message.
    ///
    /// Returns `None` when `stop` fires or the worker is (or becomes)
    /// unregistered.
    pub fn await_next(&self, worker: WorkerId, stop: &StopToken) -> Option<Envelope> {
        // Clone the receiver so no map guard is held while blocking.
        let rx = self.mailboxes.get(&worker)?.receiver();
        if stop.is_stopped() {
            return None;
        }
        select! {
            recv(rx) -> envelope => envelope.ok(),
            recv(stop.signal()) -> _ => None,
        }
    }

    /// Non-blocking variant of [`MessageBus::await_next`].
    pub fn try_next(&self, worker: WorkerId) -> Option<Envelope> {
        self.mailboxes.get(&worker)?.try_pop()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_registered(&self, worker: WorkerId) -> bool {
        self.mailboxes.contains_key(&worker)
    }

    pub fn subscriber_count(&self, message_type: MessageType) -> usize {
        self.subscribers
            .read()
            .get(&message_type)
            .map_or(0, |list| list.lock().len())
    }

    /// Number of requests sent but not yet resolved or abandoned.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of messages waiting in `worker`'s mailbox.
    pub fn queued(&self, worker: WorkerId) -> usize {
        self.mailboxes.get(&worker).map_or(0, |mailbox| mailbox.len())
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        // Handles outlive the bus; nothing can answer them any more.
        let mut abandoned = 0usize;
        for entry in self.pending.iter() {
            if entry.slot.abandon() {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            debug!(abandoned, "bus dropped with pending requests");
        }
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("workers", &self.mailboxes.len())
            .field("message_types", &self.subscribers.read().len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
