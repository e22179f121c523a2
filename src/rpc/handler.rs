//! Callbacks invoked by the [MessageDispatcher].

use std::collections::HashSet;
use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::common::{Id, Message, PingResponseArguments, ResponseSpecific};
use crate::{Error, Result};

use super::config::DEFAULT_REQUEST_TIMEOUT;
use super::MessageDispatcher;

/// Receives the outcome of a single request.
///
/// For every request accepted by [MessageDispatcher::send], exactly one of
/// [ResponseHandler::handle_response], [ResponseHandler::handle_timeout] or
/// [ResponseHandler::handle_error] is called, exactly once.
pub trait ResponseHandler: Send + Sync + Debug {
    /// A response passing the sanity checks arrived after `rtt`.
    fn handle_response(&self, response: &Message, rtt: Duration);

    /// No response arrived in time, or the request was evicted to make room
    /// for newer ones.
    fn handle_timeout(
        &self,
        node_id: Option<Id>,
        address: SocketAddr,
        request: &Message,
        elapsed: Duration,
    );

    /// The request was rejected before reaching the network, or the transport failed.
    fn handle_error(&self, node_id: Option<Id>, address: SocketAddr, request: &Message, error: &Error);

    /// Called on every cleanup sweep while the request is still outstanding.
    fn handle_tick(&self) {}

    /// Cancelled requests are dropped without any further callback, the next
    /// time they are inspected.
    fn is_cancelled(&self) -> bool {
        false
    }

    /// Timeout applied when the request was sent without an explicit one.
    fn timeout(&self) -> Duration {
        DEFAULT_REQUEST_TIMEOUT
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Outcome of a request sent with a [ChannelHandler].
pub enum RequestOutcome {
    Response { message: Message, rtt: Duration },
    Timeout { elapsed: Duration },
    Error(String),
}

#[derive(Debug)]
/// A [ResponseHandler] forwarding the outcome of a request to a channel.
pub struct ChannelHandler {
    sender: flume::Sender<RequestOutcome>,
    cancelled: AtomicBool,
    timeout: Duration,
}

impl ChannelHandler {
    pub fn new() -> (Arc<ChannelHandler>, flume::Receiver<RequestOutcome>) {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> (Arc<ChannelHandler>, flume::Receiver<RequestOutcome>) {
        let (sender, receiver) = flume::bounded(1);

        let handler = ChannelHandler {
            sender,
            cancelled: AtomicBool::new(false),
            timeout,
        };

        (Arc::new(handler), receiver)
    }

    /// Cancel the request, the receiver will never get an outcome.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    fn send(&self, outcome: RequestOutcome) {
        let _ = self.sender.try_send(outcome);
    }
}

impl ResponseHandler for ChannelHandler {
    fn handle_response(&self, response: &Message, rtt: Duration) {
        self.send(RequestOutcome::Response {
            message: response.clone(),
            rtt,
        });
    }

    fn handle_timeout(&self, _: Option<Id>, _: SocketAddr, _: &Message, elapsed: Duration) {
        self.send(RequestOutcome::Timeout { elapsed });
    }

    fn handle_error(&self, _: Option<Id>, _: SocketAddr, _: &Message, error: &Error) {
        self.send(RequestOutcome::Error(error.to_string()));
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Handles one kind of incoming request, see [super::DispatcherBuilder::handler].
///
/// Runs on the reactor thread before the [DefaultHandler]. Returning an error
/// skips the [DefaultHandler] for that request.
pub trait RequestHandler: Send + Debug {
    fn handle_request(&mut self, request: &Message, dispatcher: &MessageDispatcher) -> Result<()>;
}

#[derive(Debug, Default)]
/// Answers pings with the requester's address as we see it.
pub struct PingRequestHandler {
    estimated_size: u64,
}

impl PingRequestHandler {
    pub fn new(estimated_size: u64) -> Self {
        Self { estimated_size }
    }
}

impl RequestHandler for PingRequestHandler {
    fn handle_request(&mut self, request: &Message, dispatcher: &MessageDispatcher) -> Result<()> {
        let pong = dispatcher.response_message(
            request,
            ResponseSpecific::Pong(PingResponseArguments {
                external_address: request.sender.address,
                estimated_size: self.estimated_size,
            }),
        );

        dispatcher.send_response(&request.sender, pong)?;

        Ok(())
    }
}

/// Sees every request, response, timeout and late response, on the reactor thread.
///
/// Usually the routing table of the embedding node.
pub trait DefaultHandler: Send + Debug {
    fn handle_request(&mut self, _request: &Message) {}

    fn handle_response(&mut self, _response: &Message, _rtt: Duration) {}

    fn handle_timeout(
        &mut self,
        _node_id: Option<Id>,
        _address: SocketAddr,
        _request: &Message,
        _elapsed: Duration,
    ) {
    }

    /// A response authenticated by its message id token, whose receipt was
    /// already timed out or evicted.
    fn handle_late_response(&mut self, _response: &Message) {}
}

#[derive(Debug, Default)]
pub struct NoopHandler;

impl DefaultHandler for NoopHandler {}

/// Filters incoming messages, on the reactor thread.
pub trait MessageFilter: Send + Debug {
    /// Returns false to drop any message, before it is processed.
    fn accept(&mut self, _message: &Message) -> bool {
        true
    }

    /// Returns false to drop a request right before it is routed to its handler.
    fn allow(&mut self, _request: &Message) -> bool {
        true
    }
}

#[derive(Debug, Default)]
pub struct DefaultFilter;

impl MessageFilter for DefaultFilter {}

#[derive(Debug)]
/// Drops everything from banned hosts, and throttles requests per host.
pub struct HostFilter {
    banned: HashSet<IpAddr>,
    max_requests: u32,
    window: Duration,
    hosts: LruCache<IpAddr, (Instant, u32)>,
}

impl HostFilter {
    /// Allow at most `max_requests` per `window` from the same ip, tracking
    /// at most `max_hosts` hosts.
    pub fn new(max_requests: u32, window: Duration, max_hosts: NonZeroUsize) -> Self {
        Self {
            banned: HashSet::new(),
            max_requests,
            window,
            hosts: LruCache::new(max_hosts),
        }
    }

    pub fn ban(&mut self, ip: IpAddr) {
        self.banned.insert(ip);
    }
}

impl MessageFilter for HostFilter {
    fn accept(&mut self, message: &Message) -> bool {
        !self.banned.contains(&message.sender.address.ip())
    }

    fn allow(&mut self, request: &Message) -> bool {
        let now = Instant::now();
        let ip = request.sender.address.ip();

        match self.hosts.get_mut(&ip) {
            Some((start, count)) if now.duration_since(*start) < self.window => {
                *count += 1;
                *count <= self.max_requests
            }
            Some(window) => {
                *window = (now, 1);
                true
            }
            None => {
                self.hosts.put(ip, (now, 1));
                true
            }
        }
    }
}
