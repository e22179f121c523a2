//! The [MessageDispatcher] handle: lifecycle, validation and submission of
//! outgoing messages.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{BencodeCodec, MessageCodec};
use crate::common::{
    is_private_addr, is_valid_socket_addr, Contact, Message, MessageBody, MessageId, RequestSpecific,
    RequestType, ResponseSpecific,
};
use crate::verifier::SecurityVerifier;
use crate::{Error, Result};

use super::config::{Config, OversizePolicy};
use super::events::{DispatcherEvent, DispatcherListener, Listeners};
use super::handler::{
    DefaultFilter, DefaultHandler, MessageFilter, NoopHandler, PingRequestHandler, RequestHandler,
    ResponseHandler,
};
use super::reactor::Reactor;
use super::receipts::ReceiptMap;
use super::socket::{MioUdp, Transport, Wakeup};
use super::tag::Tag;
use super::tokens::MessageTagger;
use super::{lock, read, write};

/// Work submitted to the reactor thread.
pub(crate) enum Task {
    /// Queue a message for transmission.
    Submit(Tag),
    /// Run a closure with exclusive access to the reactor.
    Run(Box<dyn FnOnce(&mut Reactor) + Send>),
    Shutdown,
}

impl Debug for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Task::Submit(tag) => f.debug_tuple("Submit").field(tag).finish(),
            Task::Run(_) => write!(f, "Run(_)"),
            Task::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[derive(Debug, Clone)]
struct Submitter {
    sender: flume::Sender<Task>,
    waker: Arc<dyn Wakeup>,
}

impl Submitter {
    /// Enqueue `task` and wake the reactor up. Returns the task if the
    /// reactor is gone.
    fn submit(&self, task: Task) -> std::result::Result<(), Task> {
        self.sender
            .send(task)
            .map_err(|flume::SendError(task)| task)?;

        if let Err(error) = self.waker.wake() {
            debug!(context = "dispatcher", ?error, "Failed to wake the reactor");
        }

        Ok(())
    }
}

#[derive(Debug)]
/// State shared by the reactor thread and every [MessageDispatcher] handle.
pub(crate) struct Shared {
    pub config: Config,
    pub codec: Box<dyn MessageCodec>,
    pub receipts: Mutex<ReceiptMap>,
    pub tagger: RwLock<MessageTagger>,
    pub local: RwLock<Contact>,
    pub bound: RwLock<Option<SocketAddr>>,
    pub accepting: AtomicBool,
    tasks: flume::Sender<Task>,
    /// Set while running, the only way to reach the reactor thread.
    submitter: RwLock<Option<Submitter>>,
}

impl Shared {
    pub fn local(&self) -> Contact {
        *read(&self.local)
    }

    pub fn is_running(&self) -> bool {
        read(&self.submitter).is_some()
    }

    /// Run `task` on the reactor thread. Returns false if not running.
    pub fn schedule(&self, task: impl FnOnce(&mut Reactor) + Send + 'static) -> bool {
        match read(&self.submitter).as_ref() {
            Some(submitter) => submitter.submit(Task::Run(Box::new(task))).is_ok(),
            None => false,
        }
    }

    /// Stop accepting messages and tell the reactor to exit. Returns false
    /// if it was not running.
    fn shutdown(&self) -> bool {
        self.accepting.store(false, Ordering::Release);

        let submitter = write(&self.submitter).take();

        match submitter {
            Some(submitter) => {
                let _ = submitter.submit(Task::Shutdown);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
enum Lifecycle {
    /// Not running, the reactor may or may not be bound.
    Idle(Box<Reactor>),
    /// The reactor thread owns the reactor, and hands it back on exit.
    Running(JoinHandle<Box<Reactor>>),
    /// The reactor is being handed back, or was lost.
    Detached,
}

#[derive(Debug)]
pub(crate) struct Inner {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// Reactor side collaborators, moved into the reactor on build.
#[derive(Debug)]
pub(crate) struct Components {
    pub handlers: HashMap<RequestType, Box<dyn RequestHandler>>,
    pub default_handler: Box<dyn DefaultHandler>,
    pub filter: Box<dyn MessageFilter>,
    pub verifier: Option<Box<dyn SecurityVerifier>>,
    pub listeners: Listeners,
}

#[derive(Debug)]
pub struct DispatcherBuilder {
    local: Contact,
    config: Config,
    codec: Box<dyn MessageCodec>,
    components: Components,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Defaults to [BencodeCodec].
    pub fn codec(mut self, codec: impl MessageCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Signed messages are dropped unless a verifier is set.
    pub fn verifier(mut self, verifier: impl SecurityVerifier + 'static) -> Self {
        self.components.verifier = Some(Box::new(verifier));
        self
    }

    pub fn filter(mut self, filter: impl MessageFilter + 'static) -> Self {
        self.components.filter = Box::new(filter);
        self
    }

    pub fn default_handler(mut self, handler: impl DefaultHandler + 'static) -> Self {
        self.components.default_handler = Box::new(handler);
        self
    }

    /// Route requests of `request_type` to `handler`, replacing any previous one.
    ///
    /// Pings are answered by a [PingRequestHandler] unless replaced.
    pub fn handler(mut self, request_type: RequestType, handler: impl RequestHandler + 'static) -> Self {
        self.components
            .handlers
            .insert(request_type, Box::new(handler));
        self
    }

    pub fn listener(mut self, listener: impl DispatcherListener + 'static) -> Self {
        self.components.listeners.add(Box::new(listener));
        self
    }

    pub fn build(self) -> MessageDispatcher {
        let (sender, receiver) = flume::unbounded();

        let shared = Arc::new(Shared {
            receipts: Mutex::new(ReceiptMap::new(self.config.receipt_capacity)),
            tagger: RwLock::new(MessageTagger::new()),
            local: RwLock::new(self.local),
            bound: RwLock::new(None),
            accepting: AtomicBool::new(false),
            tasks: sender,
            submitter: RwLock::new(None),
            codec: self.codec,
            config: self.config,
        });

        let components = self.components;
        let inner = Arc::new_cyclic(|dispatcher: &Weak<Inner>| {
            let reactor = Reactor::new(shared.clone(), dispatcher.clone(), receiver, components);

            Inner {
                shared,
                lifecycle: Mutex::new(Lifecycle::Idle(Box::new(reactor))),
            }
        });

        MessageDispatcher { inner }
    }
}

#[derive(Debug, Clone)]
/// Sends requests and responses over a datagram transport, and correlates
/// responses with the requests they answer.
///
/// All socket IO and all handlers run on a single reactor thread, handles
/// are cheap to clone and can be used from any thread.
pub struct MessageDispatcher {
    inner: Arc<Inner>,
}

impl MessageDispatcher {
    /// Create a builder for a dispatcher speaking for `local`.
    pub fn builder(local: Contact) -> DispatcherBuilder {
        let mut handlers: HashMap<RequestType, Box<dyn RequestHandler>> = HashMap::new();
        handlers.insert(RequestType::Ping, Box::new(PingRequestHandler::default()));

        DispatcherBuilder {
            local,
            config: Config::default(),
            codec: Box::new(BencodeCodec),
            components: Components {
                handlers,
                default_handler: Box::new(NoopHandler),
                filter: Box::new(DefaultFilter),
                verifier: None,
                listeners: Listeners::default(),
            },
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    // === Getters ===

    pub fn config(&self) -> &Config {
        &self.inner.shared.config
    }

    pub fn local_contact(&self) -> Contact {
        self.inner.shared.local()
    }

    /// Returns the address of the bound transport, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *read(&self.inner.shared.bound)
    }

    pub fn is_bound(&self) -> bool {
        self.local_addr().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.inner.shared.is_running()
    }

    /// Number of requests awaiting a response.
    pub fn receipt_count(&self) -> usize {
        lock(&self.inner.shared.receipts).len()
    }

    pub fn set_firewalled(&self, firewalled: bool) {
        write(&self.inner.shared.local).firewalled = firewalled;
    }

    // === Lifecycle ===

    /// Bind a UDP socket to `address`.
    pub fn bind(&self, address: SocketAddr) -> Result<SocketAddr> {
        self.bind_with(|config| {
            let transport: Box<dyn Transport> = Box::new(MioUdp::bind(address, config)?);
            Ok(transport)
        })
    }

    /// Bind to any [Transport], like a [super::socket::sim::SimUdp].
    pub fn bind_transport(&self, transport: Box<dyn Transport>) -> Result<SocketAddr> {
        self.bind_with(|_| Ok(transport))
    }

    fn bind_with(
        &self,
        bind: impl FnOnce(&Config) -> Result<Box<dyn Transport>>,
    ) -> Result<SocketAddr> {
        self.join_reactor();

        let shared = &self.inner.shared;
        let mut lifecycle = lock(&self.inner.lifecycle);

        let Lifecycle::Idle(reactor) = &mut *lifecycle else {
            return Err(Error::AlreadyBound);
        };
        if reactor.is_bound() {
            return Err(Error::AlreadyBound);
        }

        let transport = bind(&shared.config)?;
        let local_addr = transport.local_addr()?;
        reactor.set_transport(transport);

        *write(&shared.bound) = Some(local_addr);

        let mut local = write(&shared.local);
        if local.address.port() == 0 || local.address.ip().is_unspecified() {
            local.address = local_addr;
        }

        info!(context = "dispatcher", ?local_addr, "MessageDispatcher bound");

        Ok(local_addr)
    }

    /// Spawn the reactor thread. Does nothing if already running.
    pub fn start(&self) -> Result<()> {
        self.join_reactor();

        let shared = &self.inner.shared;
        let mut lifecycle = lock(&self.inner.lifecycle);

        let mut reactor = match mem::replace(&mut *lifecycle, Lifecycle::Detached) {
            Lifecycle::Idle(reactor) if reactor.is_bound() => reactor,
            other => {
                let running = matches!(other, Lifecycle::Running(_));
                *lifecycle = other;

                return if running { Ok(()) } else { Err(Error::NotBound) };
            }
        };

        let waker = match reactor.waker() {
            Ok(waker) => waker,
            Err(error) => {
                *lifecycle = Lifecycle::Idle(reactor);
                return Err(error);
            }
        };

        reactor.reset(Instant::now());
        shared.accepting.store(true, Ordering::Release);
        *write(&shared.submitter) = Some(Submitter {
            sender: shared.tasks.clone(),
            waker,
        });

        let spawned = thread::Builder::new()
            .name("dht-dispatcher".to_string())
            .spawn(move || {
                reactor.run();
                reactor
            });

        match spawned {
            Ok(handle) => {
                *lifecycle = Lifecycle::Running(handle);
                info!(context = "dispatcher", "MessageDispatcher started");

                Ok(())
            }
            Err(error) => {
                shared.accepting.store(false, Ordering::Release);
                write(&shared.submitter).take();
                error!(context = "dispatcher", ?error, "Failed to spawn the reactor thread");

                Err(error.into())
            }
        }
    }

    /// Stop the reactor thread, discarding queued messages. Idempotent.
    ///
    /// Requests still queued are failed with [Error::Shutdown], outstanding
    /// requests are kept until [MessageDispatcher::close].
    pub fn stop(&self) {
        if self.inner.shared.shutdown() {
            debug!(context = "dispatcher", "Stopping MessageDispatcher");
        }

        self.join_reactor();
    }

    /// Stop, fail every outstanding request with [Error::Closed] and release
    /// the transport.
    pub fn close(&self) {
        self.stop();

        let shared = &self.inner.shared;

        let queued = match &mut *lock(&self.inner.lifecycle) {
            Lifecycle::Idle(reactor) => reactor.close(),
            _ => Vec::new(),
        };
        *write(&shared.bound) = None;

        let receipts = lock(&shared.receipts).drain();

        for tag in queued {
            tag.handle_error(&Error::Closed);
        }
        for receipt in receipts {
            if !receipt.is_cancelled() {
                receipt.handle_error(&Error::Closed);
            }
        }

        info!(context = "dispatcher", "MessageDispatcher closed");
    }

    /// Wait for a reactor thread that was told to stop to hand the reactor back.
    fn join_reactor(&self) {
        let handle = {
            let mut lifecycle = lock(&self.inner.lifecycle);

            match mem::replace(&mut *lifecycle, Lifecycle::Detached) {
                // Can't join from a handler, the reactor exits on its own.
                Lifecycle::Running(handle)
                    if !self.inner.shared.is_running()
                        && handle.thread().id() != thread::current().id() =>
                {
                    handle
                }
                other => {
                    *lifecycle = other;
                    return;
                }
            }
        };

        match handle.join() {
            Ok(reactor) => {
                *lock(&self.inner.lifecycle) = Lifecycle::Idle(reactor);
                info!(context = "dispatcher", "MessageDispatcher stopped");
            }
            Err(_) => error!(context = "dispatcher", "Reactor thread panicked"),
        }
    }

    /// Returns a channel receiving every [DispatcherEvent].
    pub fn subscribe(&self) -> flume::Receiver<DispatcherEvent> {
        let (sender, receiver) = flume::unbounded();

        let mut lifecycle = lock(&self.inner.lifecycle);
        match &mut *lifecycle {
            Lifecycle::Idle(reactor) => reactor.subscribe(sender),
            _ => {
                drop(lifecycle);
                self.inner
                    .shared
                    .schedule(move |reactor| reactor.subscribe(sender));
            }
        }

        receiver
    }

    // === Messages ===

    /// A fresh message id for a request to `destination`, tagged unless
    /// [Config::tag_message_ids] is disabled.
    pub fn message_id(&self, destination: SocketAddr) -> MessageId {
        if self.inner.shared.config.tag_message_ids {
            read(&self.inner.shared.tagger).tag(destination)
        } else {
            MessageId::random()
        }
    }

    pub fn request_message(&self, destination: SocketAddr, request: RequestSpecific) -> Message {
        Message::new(
            self.message_id(destination),
            self.local_contact(),
            MessageBody::Request(request),
        )
    }

    /// A ping probing whether another node uses our id, see
    /// [Contact::collision_ping_sender].
    pub fn collision_ping(&self, destination: SocketAddr) -> Message {
        Message::new(
            self.message_id(destination),
            Contact::collision_ping_sender(&self.local_contact()),
            MessageBody::Request(RequestSpecific::Ping),
        )
    }

    /// A response echoing the id of `request`.
    pub fn response_message(&self, request: &Message, response: ResponseSpecific) -> Message {
        Message::new(
            request.id,
            self.local_contact(),
            MessageBody::Response(response),
        )
    }

    // === Sending ===

    /// Send a request to `contact`, expecting a response from its node id.
    pub fn send_request(
        &self,
        contact: &Contact,
        request: Message,
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<bool> {
        self.send(Tag::request(
            Some(contact.id),
            contact.address,
            request,
            handler,
        ))
    }

    /// Ping `address`, accepting a pong from any node id.
    pub fn ping(&self, address: SocketAddr, handler: Arc<dyn ResponseHandler>) -> Result<bool> {
        let ping = self.request_message(address, RequestSpecific::Ping);

        self.send(Tag::request(None, address, ping, handler))
    }

    /// Send a fire and forget response to `contact`.
    pub fn send_response(&self, contact: &Contact, response: Message) -> Result<bool> {
        self.send(Tag::response(contact, response))
    }

    /// Validate, encode and queue `tag` for transmission.
    ///
    /// Returns `Ok(false)` if the message was rejected, in which case the
    /// handler was already notified through [ResponseHandler::handle_error].
    /// Fails with [Error::NotRunning] before [MessageDispatcher::start].
    pub fn send(&self, mut tag: Tag) -> Result<bool> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }

        let data = match self.validate(&tag).and_then(|()| self.encode(&tag)) {
            Ok(data) => data,
            Err(error) => {
                debug!(
                    context = "dispatcher",
                    ?error,
                    address = ?tag.address(),
                    message_id = ?tag.message_id(),
                    "Rejected outgoing message"
                );
                tag.handle_error(&error);

                return Ok(false);
            }
        };

        tag.set_data(data);
        trace!(context = "socket_message_sending", message = ?tag.message(), address = ?tag.address());

        let submitted = match read(&self.inner.shared.submitter).as_ref() {
            Some(submitter) => submitter.submit(Task::Submit(tag)),
            None => Err(Task::Submit(tag)),
        };

        match submitted {
            Ok(()) => Ok(true),
            Err(Task::Submit(tag)) => {
                tag.handle_error(&Error::NotRunning);
                Ok(false)
            }
            Err(_) => Ok(false),
        }
    }

    fn validate(&self, tag: &Tag) -> Result<()> {
        let shared = &self.inner.shared;
        let local = shared.local();
        let address = tag.address();

        if address == local.address {
            return Err(Error::LocalContactAddress(address));
        }

        if tag.node_id() == Some(local.id) && !tag.message().is_collision_ping(&local.id) {
            return Err(Error::LocalNodeId(local.id));
        }

        if !is_valid_socket_addr(&address) {
            return Err(Error::IllegalAddress(address));
        }

        if !shared.config.allow_private_addresses && is_private_addr(&address) {
            return Err(Error::PrivateAddress(address));
        }

        if tag.is_request() && lock(&shared.receipts).contains(&tag.message_id()) {
            return Err(Error::DuplicateMessageId(tag.message_id()));
        }

        Ok(())
    }

    fn encode(&self, tag: &Tag) -> Result<Bytes> {
        let shared = &self.inner.shared;

        let data = shared.codec.encode(tag.message(), tag.address())?;

        let size = data.len();
        let max = shared.config.max_message_size;

        if size == 0 {
            return Err(Error::IllegalMessageSize(size));
        }

        if size > max {
            match shared.config.oversize_policy {
                OversizePolicy::Warn => warn!(
                    context = "dispatcher",
                    size,
                    max,
                    message = ?tag.message(),
                    "Sending a message larger than the maximum message size"
                ),
                OversizePolicy::Reject => return Err(Error::MessageTooLarge { size, max }),
            }
        }

        Ok(data)
    }
}
