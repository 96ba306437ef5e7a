//! Per-worker inbound FIFO.

use crossbeam::channel::{self, Receiver, Sender};

use crate::envelope::Envelope;

/// Unbounded FIFO owned by the bus on behalf of one worker.
///
/// The bus keeps both ends.  Receivers handed out by [`Mailbox::receiver`]
/// disconnect once the mailbox is dropped and drained, which is how a worker
/// blocked on its queue learns that it was unregistered.
pub(crate) struct Mailbox {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Enqueue at the back. Never blocks.
    pub(crate) fn push(&self, envelope: Envelope) {
        // The mailbox holds its own receiver, so the channel cannot be
        // disconnected while `self` is alive.
        let _ = self.tx.send(envelope);
    }

    pub(crate) fn receiver(&self) -> Receiver<Envelope> {
        self.rx.clone()
    }

    pub(crate) fn try_pop(&self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Remove everything still queued, oldest first.
    pub(crate) fn drain(&self) -> Vec<Envelope> {
        self.rx.try_iter().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::{Message, Notification};

    #[derive(Debug, Clone, PartialEq)]
    struct Frame(u32);
    impl Message for Frame {}
    impl Notification for Frame {}

    fn frame_of(env: Envelope) -> u32 {
        env.into_notification::<Frame>().map(|f| f.0).unwrap_or(u32::MAX)
    }

    #[test]
    fn pops_in_push_order() {
        let mailbox = Mailbox::new();
        for i in 0..5 {
            mailbox.push(Envelope::notification(Frame(i)));
        }
        assert_eq!(mailbox.len(), 5);
        let order: Vec<u32> = std::iter::from_fn(|| mailbox.try_pop()).map(frame_of).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn drain_empties_the_queue() {
        let mailbox = Mailbox::new();
        mailbox.push(Envelope::notification(Frame(1)));
        mailbox.push(Envelope::notification(Frame(2)));
        let drained: Vec<u32> = mailbox.drain().into_iter().map(frame_of).collect();
        assert_eq!(drained, vec![1, 2]);
        assert_eq!(mailbox.len(), 0);
    }

    #[test]
    fn receiver_disconnects_after_mailbox_is_dropped() {
        let mailbox = Mailbox::new();
        let rx = mailbox.receiver();
        drop(mailbox);
        assert!(rx.recv().is_err());
    }
}
