//! Type-erased message wrappers carried by worker mailboxes.

use std::any::Any;
use std::fmt;
use std::ops::Deref;

use courier_types::{MessageType, Notification, Request, RequestId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Request(RequestId),
    Notification,
}

/// A message sitting in a worker's mailbox.
///
/// The worker runtime opens it with [`Envelope::into_request`] or
/// [`Envelope::into_notification`] depending on the handler registered for
/// its [`MessageType`].
pub struct Envelope {
    message_type: MessageType,
    kind: Kind,
    payload: Box<dyn Any + Send>,
}

impl Envelope {
    pub(crate) fn request<R: Request>(id: RequestId, request: R) -> Self {
        Self {
            message_type: R::message_type(),
            kind: Kind::Request(id),
            payload: Box::new(request),
        }
    }

    pub(crate) fn notification<N: Notification>(notification: N) -> Self {
        Self {
            message_type: N::message_type(),
            kind: Kind::Notification,
            payload: Box::new(notification),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The request identity, or `None` for notifications.
    pub fn request_id(&self) -> Option<RequestId> {
        match self.kind {
            Kind::Request(id) => Some(id),
            Kind::Notification => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self.kind, Kind::Request(_))
    }

    /// Open the envelope as a request of type `R`.
    ///
    /// Gives the envelope back untouched when it holds something else.
    pub fn into_request<R: Request>(self) -> Result<Inbound<R>, Envelope> {
        let Kind::Request(id) = self.kind else {
            return Err(self);
        };
        match self.payload.downcast::<R>() {
            Ok(request) => Ok(Inbound {
                id,
                request: *request,
            }),
            Err(payload) => Err(Self { payload, ..self }),
        }
    }

    /// Open the envelope as a notification of type `N`.
    pub fn into_notification<N: Notification>(self) -> Result<N, Envelope> {
        if self.kind != Kind::Notification {
            return Err(self);
        }
        match self.payload.downcast::<N>() {
            Ok(notification) => Ok(*notification),
            Err(payload) => Err(Self { payload, ..self }),
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("message_type", &self.message_type)
            .field("request_id", &self.request_id())
            .finish()
    }
}

/// A request delivered to the worker selected to answer it.
///
/// Keep it around to answer later; the sender's handle stays pending until
/// the bus is asked to resolve [`Inbound::id`].
pub struct Inbound<R> {
    id: RequestId,
    request: R,
}

impl<R> Inbound<R> {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn request(&self) -> &R {
        &self.request
    }

    pub fn into_parts(self) -> (RequestId, R) {
        (self.id, self.request)
    }
}

impl<R> Deref for Inbound<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.request
    }
}

impl<R: fmt::Debug> fmt::Debug for Inbound<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound")
            .field("id", &self.id)
            .field("request", &self.request)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::Message;

    #[derive(Debug, PartialEq)]
    struct DetectObjects {
        camera: u32,
    }
    impl Message for DetectObjects {}
    impl Request for DetectObjects {
        type Output = bool;
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Tick(u64);
    impl Message for Tick {}
    impl Notification for Tick {}

    #[test]
    fn request_envelope_opens_as_its_own_type() {
        let id = RequestId::new();
        let env = Envelope::request(id, DetectObjects { camera: 2 });
        assert!(env.is_request());
        assert_eq!(env.request_id(), Some(id));
        assert_eq!(env.message_type(), DetectObjects::message_type());

        let inbound = env.into_request::<DetectObjects>().expect("request");
        assert_eq!(inbound.id(), id);
        assert_eq!(inbound.camera, 2);
    }

    #[test]
    fn notification_envelope_opens_as_its_own_type() {
        let env = Envelope::notification(Tick(5));
        assert!(!env.is_request());
        assert_eq!(env.request_id(), None);
        assert_eq!(env.into_notification::<Tick>().ok(), Some(Tick(5)));
    }

    #[test]
    fn opening_as_wrong_kind_returns_the_envelope() {
        let env = Envelope::notification(Tick(1));
        let env = env.into_request::<DetectObjects>().expect_err("not a request");
        // The payload survives the failed attempt.
        assert_eq!(env.into_notification::<Tick>().ok(), Some(Tick(1)));
    }
}
