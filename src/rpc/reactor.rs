//! The reactor: the single thread doing socket IO and running every handler.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::mem;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, info, trace, warn};

use crate::common::{is_same_address_space, is_valid_socket_addr, Message, RequestType};
use crate::verifier::SecurityVerifier;
use crate::{Error, Result};

use super::dispatcher::{Components, Inner, Shared, Task};
use super::events::{DispatcherEvent, EventType, Listeners};
use super::handler::{DefaultHandler, MessageFilter, RequestHandler};
use super::receipts::Resolution;
use super::socket::{Transport, Wakeup};
use super::tag::{Receipt, Tag};
use super::{lock, read, write, MessageDispatcher};

/// Largest UDP payload.
const READ_BUFFER_SIZE: usize = 65_507;

#[derive(Debug)]
pub(crate) struct Reactor {
    shared: Arc<Shared>,
    /// Handed to request handlers, weak so dropping every handle stops the reactor.
    dispatcher: Weak<Inner>,
    tasks: flume::Receiver<Task>,
    transport: Option<Box<dyn Transport>>,
    /// Messages waiting for the transport, in submission order.
    output: VecDeque<Tag>,
    buffer: BytesMut,

    handlers: HashMap<RequestType, Box<dyn RequestHandler>>,
    default_handler: Box<dyn DefaultHandler>,
    filter: Box<dyn MessageFilter>,
    verifier: Option<Box<dyn SecurityVerifier>>,
    listeners: Listeners,

    last_cleanup: Instant,
}

impl Reactor {
    pub fn new(
        shared: Arc<Shared>,
        dispatcher: Weak<Inner>,
        tasks: flume::Receiver<Task>,
        components: Components,
    ) -> Self {
        Self {
            shared,
            dispatcher,
            tasks,
            transport: None,
            output: VecDeque::new(),
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),

            handlers: components.handlers,
            default_handler: components.default_handler,
            filter: components.filter,
            verifier: components.verifier,
            listeners: components.listeners,

            last_cleanup: Instant::now(),
        }
    }

    // === Lifecycle ===

    pub fn is_bound(&self) -> bool {
        self.transport.is_some()
    }

    pub fn set_transport(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
    }

    pub fn waker(&self) -> Result<Arc<dyn Wakeup>> {
        match &self.transport {
            Some(transport) => Ok(transport.waker()?),
            None => Err(Error::NotBound),
        }
    }

    /// Arm the cleanup sweep.
    pub fn reset(&mut self, now: Instant) {
        self.last_cleanup = now;
    }

    pub fn subscribe(&mut self, sender: flume::Sender<DispatcherEvent>) {
        self.listeners.subscribe(sender);
    }

    /// Release the transport, returning the messages submitted after the
    /// last stop.
    pub fn close(&mut self) -> Vec<Tag> {
        self.transport = None;

        let mut queued = mem::take(&mut self.output).into_iter().collect::<Vec<_>>();
        for task in self.tasks.try_iter() {
            if let Task::Submit(tag) = task {
                queued.push(tag);
            }
        }

        queued
    }

    /// Run until told to shut down.
    pub fn run(&mut self) {
        debug!(context = "reactor", "Reactor started");

        loop {
            if !self.run_tasks() {
                break;
            }

            let write_interest = !self.output.is_empty();
            let timeout = self.shared.config.selector_timeout;

            let Some(transport) = self.transport.as_mut() else {
                error!(context = "reactor", "Reactor running without a transport");
                break;
            };

            if let Err(error) = transport.wait(write_interest, timeout) {
                error!(context = "reactor", ?error, "Failed to wait for socket readiness");
                thread::sleep(timeout);
            }

            self.handle_read();
            self.handle_write();
            self.periodic(Instant::now());
        }

        for tag in mem::take(&mut self.output) {
            if tag.is_request() && !tag.is_cancelled() {
                tag.handle_error(&Error::Shutdown);
            }
        }

        debug!(context = "reactor", "Reactor stopped");
    }

    /// Returns false on [Task::Shutdown].
    fn run_tasks(&mut self) -> bool {
        while let Ok(task) = self.tasks.try_recv() {
            match task {
                Task::Submit(tag) => self.output.push_back(tag),
                Task::Run(task) => task(self),
                Task::Shutdown => return false,
            }
        }

        true
    }

    // === IO ===

    fn handle_read(&mut self) {
        loop {
            let Some(transport) = self.transport.as_mut() else {
                return;
            };

            self.buffer.reserve(READ_BUFFER_SIZE);
            self.buffer.resize(READ_BUFFER_SIZE, 0);

            let (size, from) = match transport.recv_from(&mut self.buffer) {
                Ok(received) => received,
                Err(error) if error.kind() == ErrorKind::WouldBlock => return,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    debug!(context = "socket_error", ?error, "Failed to receive datagram");
                    return;
                }
            };

            let bytes = if self.shared.config.allocate_new_buffer {
                Bytes::copy_from_slice(&self.buffer[..size])
            } else {
                // Reclaimed by the next `reserve` once the message is dropped.
                self.buffer.truncate(size);
                self.buffer.split().freeze()
            };
            self.buffer.clear();

            match self.shared.codec.decode(bytes, from) {
                Ok(message) => {
                    trace!(context = "socket_message_receiving", ?message, ?from);
                    self.handle_message(message);
                }
                Err(error) => {
                    debug!(
                        context = "socket_error",
                        ?error,
                        ?from,
                        size,
                        "Received invalid message"
                    );
                }
            }
        }
    }

    /// Flush the output queue in order, until the transport would block.
    fn handle_write(&mut self) {
        while let Some(tag) = self.output.pop_front() {
            if tag.is_cancelled() {
                trace!(context = "reactor", message_id = ?tag.message_id(), "Dropping cancelled message");
                continue;
            }

            let Some(data) = tag.data().cloned() else {
                tag.handle_error(&Error::IllegalMessageSize(0));
                continue;
            };

            let Some(transport) = self.transport.as_mut() else {
                self.output.push_front(tag);
                return;
            };

            match transport.send_to(&data, tag.address()) {
                Ok(0) => {
                    self.output.push_front(tag);
                    return;
                }
                Ok(_) => self.sent(tag),
                Err(error) if error.kind() == ErrorKind::WouldBlock => {
                    self.output.push_front(tag);
                    return;
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => {
                    self.output.push_front(tag);
                }
                Err(error) => {
                    error!(
                        context = "socket_error",
                        ?error,
                        address = ?tag.address(),
                        "Failed to send message"
                    );
                    tag.handle_error(&Error::IO(error));
                }
            }
        }
    }

    /// Register the receipt of a request that was just handed to the transport.
    fn sent(&mut self, tag: Tag) {
        let now = Instant::now();

        self.listeners.fire(
            EventType::MessageSent,
            tag.node_id(),
            tag.address(),
            tag.message(),
        );

        let Some(receipt) = tag.into_receipt(now) else {
            return;
        };

        let message_id = receipt.message_id();

        // Evicted requests are notified before the new one is inserted.
        let evicted = {
            let mut receipts = lock(&self.shared.receipts);
            if receipts.contains(&message_id) {
                None
            } else {
                Some(receipts.make_room())
            }
        };

        for evicted in evicted.into_iter().flatten() {
            self.evicted(evicted, now);
        }

        let inserted = lock(&self.shared.receipts).insert(receipt);

        if let Err(receipt) = inserted {
            warn!(context = "reactor", ?message_id, "Duplicate outstanding message id");
            receipt.handle_error(&Error::DuplicateMessageId(message_id));
        }
    }

    fn evicted(&mut self, receipt: Receipt, now: Instant) {
        if receipt.is_cancelled() {
            return;
        }

        debug!(
            context = "reactor",
            message_id = ?receipt.message_id(),
            address = ?receipt.address(),
            size = receipt.size(),
            "Evicted outstanding request"
        );

        self.listeners.fire(
            EventType::ReceiptEvicted,
            receipt.node_id(),
            receipt.address(),
            receipt.request(),
        );
        self.default_handler.handle_timeout(
            receipt.node_id(),
            receipt.address(),
            receipt.request(),
            receipt.elapsed(now),
        );
        receipt.handle_timeout(now);
    }

    // === Periodic ===

    fn periodic(&mut self, now: Instant) {
        let config = &self.shared.config;

        let cleanup_interval = config.cleanup_interval;
        let rotate = config.tag_message_ids
            && read(&self.shared.tagger).should_rotate(config.token_rotate_interval);

        if rotate {
            write(&self.shared.tagger).rotate();
        }

        if now.saturating_duration_since(self.last_cleanup) >= cleanup_interval {
            self.last_cleanup = now;
            self.cleanup(now);
        }
    }

    /// Time out expired requests and tick the pending ones.
    fn cleanup(&mut self, now: Instant) {
        let sweep = lock(&self.shared.receipts).cleanup(now);

        if sweep.cancelled > 0 {
            trace!(context = "reactor", cancelled = sweep.cancelled, "Removed cancelled requests");
        }

        for receipt in sweep.timed_out {
            debug!(
                context = "reactor",
                message_id = ?receipt.message_id(),
                address = ?receipt.address(),
                size = receipt.size(),
                "Request timed out"
            );

            self.listeners.fire(
                EventType::ReceiptTimeout,
                receipt.node_id(),
                receipt.address(),
                receipt.request(),
            );
            self.default_handler.handle_timeout(
                receipt.node_id(),
                receipt.address(),
                receipt.request(),
                receipt.elapsed(now),
            );
            receipt.handle_timeout(now);
        }

        for handler in sweep.pending {
            handler.handle_tick();
        }
    }

    // === Incoming messages ===

    fn handle_message(&mut self, message: Message) {
        if !self.shared.accepting.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }

        let local = self.shared.local();
        let sender = message.sender;

        // A pong may echo our own id, when probing for id collisions.
        if sender.address == local.address
            || (sender.id == local.id && !message.is_ping_response())
        {
            debug!(context = "reactor", ?sender, "Dropping message from ourselves");
            return;
        }

        if !is_valid_socket_addr(&sender.address) {
            debug!(context = "reactor", ?sender, "Dropping message from an invalid address");
            return;
        }

        if !is_same_address_space(&local.address, &sender.address) {
            debug!(context = "reactor", ?sender, "Dropping message from another address space");
            return;
        }

        self.listeners.fire(
            EventType::MessageReceived,
            Some(sender.id),
            sender.address,
            &message,
        );

        if !self.filter.accept(&message) {
            trace!(context = "reactor", ?sender, "Message filtered");
            self.listeners.fire(
                EventType::MessageFiltered,
                Some(sender.id),
                sender.address,
                &message,
            );
            return;
        }

        if message.is_signed() {
            self.verify(message);
            return;
        }

        self.process(message);
    }

    /// Hand a signed message to the verifier, processing resumes on the
    /// reactor thread if the signature is valid.
    fn verify(&mut self, message: Message) {
        let Some(verifier) = self.verifier.as_mut() else {
            info!(
                context = "reactor",
                sender = ?message.sender,
                "Dropping signed message, no verifier configured"
            );
            return;
        };

        let shared = self.shared.clone();

        verifier.verify(
            message,
            Box::new(move |message, valid| {
                if !valid {
                    debug!(
                        context = "reactor",
                        sender = ?message.sender,
                        "Dropping message with an invalid signature"
                    );
                    return;
                }

                if !shared.schedule(move |reactor| reactor.process(message)) {
                    debug!(context = "reactor", "Dropping verified message, not running");
                }
            }),
        );
    }

    fn process(&mut self, message: Message) {
        if message.is_response() {
            self.handle_response(message);
        } else {
            self.handle_request(message);
        }
    }

    fn handle_response(&mut self, message: Message) {
        let config = &self.shared.config;

        if message.sender.firewalled && config.drop_response_if_firewalled {
            trace!(context = "reactor", sender = ?message.sender, "Dropping response from a firewalled node");
            return;
        }

        let tagged = config.tag_message_ids;

        if tagged
            && !read(&self.shared.tagger).is_for(&message.id, message.sender.address)
        {
            debug!(
                context = "reactor",
                sender = ?message.sender,
                message_id = ?message.id,
                "Dropping response with a foreign message id"
            );
            return;
        }

        let resolution = lock(&self.shared.receipts).resolve(&message, Instant::now());

        match resolution {
            Resolution::Resolved(receipt) => {
                let rtt = receipt.rtt().unwrap_or_default();

                self.default_handler.handle_response(&message, rtt);
                receipt.handle_response(&message);
            }
            Resolution::Cancelled => {
                trace!(context = "reactor", message_id = ?message.id, "Response to a cancelled request");
            }
            Resolution::Rejected => {
                warn!(
                    context = "reactor",
                    sender = ?message.sender,
                    message_id = ?message.id,
                    "Response failed the sanity check"
                );
            }
            Resolution::Unknown if !tagged => {
                debug!(context = "reactor", sender = ?message.sender, "Dropping unsolicited response");
            }
            Resolution::Unknown => {
                trace!(context = "reactor", sender = ?message.sender, "Late response");

                self.listeners.fire(
                    EventType::LateResponse,
                    Some(message.sender.id),
                    message.sender.address,
                    &message,
                );
                self.default_handler.handle_late_response(&message);
            }
        }
    }

    fn handle_request(&mut self, message: Message) {
        if self.shared.local().firewalled && self.shared.config.drop_request_if_firewalled {
            trace!(context = "reactor", sender = ?message.sender, "Dropping request while firewalled");
            return;
        }

        if !self.filter.allow(&message) {
            trace!(context = "reactor", sender = ?message.sender, "Request throttled");
            self.listeners.fire(
                EventType::MessageFiltered,
                Some(message.sender.id),
                message.sender.address,
                &message,
            );
            return;
        }

        let request_type = message.request().map(|request| request.request_type());

        if let Some(handler) = request_type.and_then(|kind| self.handlers.get_mut(&kind)) {
            let Some(inner) = self.dispatcher.upgrade() else {
                return;
            };
            let dispatcher = MessageDispatcher::from_inner(inner);

            if let Err(error) = handler.handle_request(&message, &dispatcher) {
                debug!(
                    context = "reactor",
                    ?error,
                    sender = ?message.sender,
                    ?request_type,
                    "Request handler failed"
                );
                return;
            }
        }

        self.default_handler.handle_request(&message);
    }
}
