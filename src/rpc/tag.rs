//! Outgoing messages and the receipts of requests awaiting a response.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::common::{Contact, Id, Message, MessageBody, MessageId};
use crate::Error;

use super::handler::ResponseHandler;

#[derive(Debug)]
/// An outgoing message, its destination and, for requests, the handler
/// waiting for its outcome.
pub struct Tag {
    node_id: Option<Id>,
    address: SocketAddr,
    message: Message,
    handler: Option<Arc<dyn ResponseHandler>>,
    data: Option<Bytes>,
    timeout: Option<Duration>,
}

impl Tag {
    /// A fire and forget message to `contact`.
    pub fn response(contact: &Contact, message: Message) -> Tag {
        Tag {
            node_id: Some(contact.id),
            address: contact.address,
            message,
            handler: None,
            data: None,
            timeout: None,
        }
    }

    /// A request to `address`.
    ///
    /// Without a `node_id` any responder is accepted, which is how nodes of
    /// unknown identity are probed.
    pub fn request(
        node_id: Option<Id>,
        address: SocketAddr,
        message: Message,
        handler: Arc<dyn ResponseHandler>,
    ) -> Tag {
        Tag {
            node_id,
            address,
            message,
            handler: Some(handler),
            data: None,
            timeout: None,
        }
    }

    /// Override the handler's timeout for this request.
    pub fn with_timeout(mut self, timeout: Duration) -> Tag {
        self.timeout = Some(timeout);
        self
    }

    // === Getters ===

    pub fn node_id(&self) -> Option<Id> {
        self.node_id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_id(&self) -> MessageId {
        self.message.id
    }

    /// A Tag is a request iff it carries both a handler and a request message.
    pub fn is_request(&self) -> bool {
        self.handler.is_some() && self.message.is_request()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handler
            .as_ref()
            .map(|handler| handler.is_cancelled())
            .unwrap_or(false)
    }

    /// The serialized message, once encoded.
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    // === Public Methods ===

    /// Sets the serialized message, only the first call has any effect.
    pub(crate) fn set_data(&mut self, data: Bytes) {
        if self.data.is_none() {
            self.data = Some(data);
        }
    }

    /// Reports `error` to the handler, if any.
    pub fn handle_error(self, error: &Error) {
        match &self.handler {
            Some(handler) => {
                handler.handle_error(self.node_id, self.address, &self.message, error)
            }
            None => debug!(
                context = "tag",
                ?error,
                address = ?self.address,
                message_id = ?self.message.id,
                "Failed to send message"
            ),
        }
    }

    /// Turns a request Tag, whose bytes were just handed to the transport,
    /// into a Receipt. Returns None for responses.
    pub(crate) fn into_receipt(self, sent_at: Instant) -> Option<Receipt> {
        if !self.is_request() {
            return None;
        }

        let size = self.data.as_ref().map(|data| data.len()).unwrap_or(0);

        self.handler.map(|handler| Receipt {
            node_id: self.node_id,
            address: self.address,
            request: self.message,
            sent_at,
            received_at: None,
            handler,
            timeout: self.timeout,
            size,
        })
    }
}

#[derive(Debug)]
/// A request that was sent and is awaiting its response.
///
/// The terminal callbacks consume the Receipt, so its handler is notified
/// at most once.
pub struct Receipt {
    node_id: Option<Id>,
    address: SocketAddr,
    request: Message,
    sent_at: Instant,
    received_at: Option<Instant>,
    handler: Arc<dyn ResponseHandler>,
    timeout: Option<Duration>,
    size: usize,
}

impl Receipt {
    // === Getters ===

    pub fn message_id(&self) -> MessageId {
        self.request.id
    }

    pub fn node_id(&self) -> Option<Id> {
        self.node_id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn request(&self) -> &Message {
        &self.request
    }

    /// Serialized size of the request.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn handler(&self) -> &Arc<dyn ResponseHandler> {
        &self.handler
    }

    /// The explicit timeout if any, otherwise the handler's.
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or_else(|| self.handler.timeout())
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.sent_at)
    }

    pub fn is_timed_out(&self, now: Instant) -> bool {
        self.elapsed(now) >= self.timeout()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handler.is_cancelled()
    }

    /// Round trip time, once received.
    pub fn rtt(&self) -> Option<Duration> {
        self.received_at
            .map(|received_at| received_at.saturating_duration_since(self.sent_at))
    }

    // === Public Methods ===

    pub(crate) fn mark_received(&mut self, now: Instant) {
        self.received_at = Some(now);
    }

    /// Returns true if `response` answers this request: same node id (unless
    /// none was expected), same address, and the matching response kind.
    pub fn sanity_check(&self, response: &Message) -> bool {
        if let Some(node_id) = self.node_id {
            if node_id != response.sender.id {
                return false;
            }
        }

        if self.address != response.sender.address {
            return false;
        }

        match (&self.request.body, &response.body) {
            (MessageBody::Request(request), MessageBody::Response(response)) => {
                request.accepts(response)
            }
            _ => false,
        }
    }

    pub fn handle_response(self, response: &Message) {
        let rtt = self.rtt().unwrap_or_default();
        self.handler.handle_response(response, rtt);
    }

    pub fn handle_timeout(self, now: Instant) {
        self.handler
            .handle_timeout(self.node_id, self.address, &self.request, self.elapsed(now));
    }

    pub fn handle_error(self, error: &Error) {
        self.handler
            .handle_error(self.node_id, self.address, &self.request, error);
    }

    pub fn handle_tick(&self) {
        self.handler.handle_tick();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::{
        FindNodeRequestArguments, FindNodeResponseArguments, PingResponseArguments,
        RequestSpecific, ResponseSpecific, StoreResponseArguments,
    };
    use crate::rpc::ChannelHandler;

    fn request(body: RequestSpecific) -> Message {
        Message::new(
            MessageId::random(),
            Contact::new(Id::random(), ([9, 9, 9, 9], 9).into()),
            MessageBody::Request(body),
        )
    }

    fn response(id: MessageId, from: Contact, body: ResponseSpecific) -> Message {
        Message::new(id, from, MessageBody::Response(body))
    }

    fn find_node_response() -> ResponseSpecific {
        ResponseSpecific::FindNode(FindNodeResponseArguments {
            token: Bytes::new(),
            nodes: vec![],
        })
    }

    fn sent(tag: Tag) -> Receipt {
        tag.into_receipt(Instant::now()).unwrap()
    }

    #[test]
    fn responses_have_no_receipt() {
        let contact = Contact::new(Id::random(), ([1, 2, 3, 4], 1).into());
        let message = response(
            MessageId::random(),
            contact,
            ResponseSpecific::Store(StoreResponseArguments { stored: vec![] }),
        );

        let tag = Tag::response(&contact, message);
        assert!(!tag.is_request());
        assert!(tag.into_receipt(Instant::now()).is_none());
    }

    #[test]
    fn sanity_check_requires_counterpart_type() {
        let (handler, _) = ChannelHandler::new();
        let remote = Contact::new(Id::random(), ([1, 2, 3, 4], 6881).into());
        let request = request(RequestSpecific::FindNode(FindNodeRequestArguments {
            target: Id::random(),
        }));
        let receipt = sent(Tag::request(
            Some(remote.id),
            remote.address,
            request.clone(),
            handler,
        ));

        assert!(receipt.sanity_check(&response(request.id, remote, find_node_response())));
        assert!(!receipt.sanity_check(&response(
            request.id,
            remote,
            ResponseSpecific::Store(StoreResponseArguments { stored: vec![] })
        )));
    }

    #[test]
    fn sanity_check_node_id_and_address() {
        let (handler, _) = ChannelHandler::new();
        let remote = Contact::new(Id::random(), ([1, 2, 3, 4], 6881).into());
        let request = request(RequestSpecific::FindNode(FindNodeRequestArguments {
            target: Id::random(),
        }));
        let receipt = sent(Tag::request(
            Some(remote.id),
            remote.address,
            request.clone(),
            handler,
        ));

        let impostor = Contact::new(Id::random(), remote.address);
        assert!(!receipt.sanity_check(&response(request.id, impostor, find_node_response())));

        let moved = Contact::new(remote.id, ([1, 2, 3, 4], 6882).into());
        assert!(!receipt.sanity_check(&response(request.id, moved, find_node_response())));
    }

    #[test]
    fn anonymous_ping_accepts_any_responder() {
        let (handler, _) = ChannelHandler::new();
        let address: SocketAddr = ([1, 2, 3, 4], 6881).into();
        let request = request(RequestSpecific::Ping);
        let receipt = sent(Tag::request(None, address, request.clone(), handler));

        let pong = ResponseSpecific::Pong(PingResponseArguments {
            external_address: ([9, 9, 9, 9], 9).into(),
            estimated_size: 0,
        });

        assert!(receipt.sanity_check(&response(
            request.id,
            Contact::new(Id::random(), address),
            pong
        )));
    }

    #[test]
    fn explicit_timeout_overrides_handler() {
        let (handler, _) = ChannelHandler::with_timeout(Duration::from_secs(10));
        let address: SocketAddr = ([1, 2, 3, 4], 6881).into();
        let sent_at = Instant::now();

        let receipt = Tag::request(None, address, request(RequestSpecific::Ping), handler.clone())
            .into_receipt(sent_at)
            .unwrap();
        assert_eq!(receipt.timeout(), Duration::from_secs(10));
        assert!(!receipt.is_timed_out(sent_at + Duration::from_secs(5)));

        let receipt = Tag::request(None, address, request(RequestSpecific::Ping), handler)
            .with_timeout(Duration::from_secs(5))
            .into_receipt(sent_at)
            .unwrap();
        assert_eq!(receipt.timeout(), Duration::from_secs(5));
        assert!(receipt.is_timed_out(sent_at + Duration::from_secs(5)));
    }

    #[test]
    fn receipt_size_is_the_encoded_size() {
        let (handler, _) = ChannelHandler::new();
        let address: SocketAddr = ([1, 2, 3, 4], 6881).into();

        let mut tag = Tag::request(None, address, request(RequestSpecific::Ping), handler);
        tag.set_data(Bytes::from_static(b"encoded"));
        tag.set_data(Bytes::from_static(b"ignored, already set"));

        assert_eq!(sent(tag).size(), 7);
    }
}
