use std::time::Duration;

/// Default maximum size of a serialized message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1492;
/// Default socket receive buffer size.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 64 * 1024;
/// Default socket send buffer size.
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 64 * 1024;
/// Default maximum number of outstanding requests.
pub const DEFAULT_RECEIPT_CAPACITY: usize = 512;
/// Default interval between two sweeps of the outstanding requests.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_millis(50);
/// Default request timeout before abandoning a request to a non-responding node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000); // 2 seconds
/// The maximum duration the reactor waits for socket readiness before running
/// its periodic work.
pub const SELECTOR_TIMEOUT: Duration = Duration::from_millis(50);
/// Interval between message id secret rotations.
pub const TOKEN_ROTATE_INTERVAL: Duration = Duration::from_secs(60 * 5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// What to do with outgoing messages larger than [Config::max_message_size].
pub enum OversizePolicy {
    /// Log a warning and send the message anyway.
    #[default]
    Warn,
    /// Reject the message before it reaches the network.
    Reject,
}

#[derive(Debug, Clone)]
/// MessageDispatcher configurations
pub struct Config {
    /// Maximum size of a serialized message, see [Config::oversize_policy].
    ///
    /// Defaults to [DEFAULT_MAX_MESSAGE_SIZE]
    pub max_message_size: usize,
    /// Defaults to [OversizePolicy::Warn]
    pub oversize_policy: OversizePolicy,
    /// Defaults to [DEFAULT_RECEIVE_BUFFER_SIZE]
    pub receive_buffer_size: usize,
    /// Defaults to [DEFAULT_SEND_BUFFER_SIZE]
    pub send_buffer_size: usize,
    /// Maximum number of outstanding requests, the oldest request is
    /// evicted (and timed out) to make room for a new one.
    ///
    /// Defaults to [DEFAULT_RECEIPT_CAPACITY]
    pub receipt_capacity: usize,
    /// Interval between sweeps timing out expired requests.
    ///
    /// Defaults to [DEFAULT_CLEANUP_INTERVAL]
    pub cleanup_interval: Duration,
    /// Defaults to [SELECTOR_TIMEOUT]
    pub selector_timeout: Duration,
    /// Drop responses from nodes declaring themselves firewalled.
    ///
    /// Defaults to `true`
    pub drop_response_if_firewalled: bool,
    /// Drop incoming requests while the local node is firewalled.
    ///
    /// Defaults to `true`
    pub drop_request_if_firewalled: bool,
    /// Copy every inbound datagram into a freshly allocated buffer instead of
    /// handing out a slice of the shared receive buffer.
    ///
    /// Defaults to `false`
    pub allocate_new_buffer: bool,
    /// Allow sending to private, loopback or link-local addresses.
    ///
    /// Defaults to `false`
    pub allow_private_addresses: bool,
    /// Embed a destination bound security token in request message ids,
    /// so late responses can be told apart from unsolicited ones.
    ///
    /// Defaults to `true`
    pub tag_message_ids: bool,
    /// Defaults to [TOKEN_ROTATE_INTERVAL]
    pub token_rotate_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            oversize_policy: OversizePolicy::default(),
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            receipt_capacity: DEFAULT_RECEIPT_CAPACITY,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            selector_timeout: SELECTOR_TIMEOUT,
            drop_response_if_firewalled: true,
            drop_request_if_firewalled: true,
            allocate_new_buffer: false,
            allow_private_addresses: false,
            tag_message_ids: true,
            token_rotate_interval: TOKEN_ROTATE_INTERVAL,
        }
    }
}

impl Config {
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_oversize_policy(mut self, oversize_policy: OversizePolicy) -> Self {
        self.oversize_policy = oversize_policy;
        self
    }

    pub fn with_buffer_sizes(mut self, receive: usize, send: usize) -> Self {
        self.receive_buffer_size = receive;
        self.send_buffer_size = send;
        self
    }

    pub fn with_receipt_capacity(mut self, receipt_capacity: usize) -> Self {
        self.receipt_capacity = receipt_capacity;
        self
    }

    pub fn with_cleanup_interval(mut self, cleanup_interval: Duration) -> Self {
        self.cleanup_interval = cleanup_interval;
        self
    }

    pub fn with_selector_timeout(mut self, selector_timeout: Duration) -> Self {
        self.selector_timeout = selector_timeout;
        self
    }

    pub fn with_drop_if_firewalled(mut self, requests: bool, responses: bool) -> Self {
        self.drop_request_if_firewalled = requests;
        self.drop_response_if_firewalled = responses;
        self
    }

    pub fn with_allocate_new_buffer(mut self, allocate_new_buffer: bool) -> Self {
        self.allocate_new_buffer = allocate_new_buffer;
        self
    }

    pub fn with_private_addresses(mut self, allow: bool) -> Self {
        self.allow_private_addresses = allow;
        self
    }

    pub fn with_tagged_message_ids(mut self, tag_message_ids: bool) -> Self {
        self.tag_message_ids = tag_message_ids;
        self
    }

    pub fn with_token_rotate_interval(mut self, token_rotate_interval: Duration) -> Self {
        self.token_rotate_interval = token_rotate_interval;
        self
    }
}
