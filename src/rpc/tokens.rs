//! Bind message ids to the address they were sent to.

use crc::{Crc, CRC_32_ISCSI};
use getrandom::getrandom;
use rand::Rng;
use std::{
    fmt::{self, Debug, Formatter},
    net::{IpAddr, SocketAddr},
    time::{Duration, Instant},
};

use tracing::trace;

use crate::common::{MessageId, TOKEN_SIZE};

const SECRET_SIZE: usize = 20;
const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Message ids tagger.
///
/// Tagged ids start with a token derived from the destination address and a
/// rotating secret, so a response can be authenticated as coming from a host
/// we once queried, long after its receipt is gone.
pub struct MessageTagger {
    prev_secret: [u8; SECRET_SIZE],
    curr_secret: [u8; SECRET_SIZE],
    last_updated: Instant,
}

impl Debug for MessageTagger {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "MessageTagger (_)")
    }
}

impl MessageTagger {
    pub fn new() -> Self {
        MessageTagger {
            prev_secret: random(),
            curr_secret: random(),
            last_updated: Instant::now(),
        }
    }

    // === Public Methods ===

    /// Returns `true` if the current secret is older than `interval`.
    pub fn should_rotate(&self, interval: Duration) -> bool {
        self.last_updated.elapsed() > interval
    }

    /// Rotate the secrets, ids tagged before the previous rotation stop verifying.
    pub fn rotate(&mut self) {
        trace!(context = "message_tagger", "Rotating secrets");

        self.prev_secret = self.curr_secret;
        self.curr_secret = random();

        self.last_updated = Instant::now();
    }

    /// Generates a new random message id tagged for `address`.
    pub fn tag(&self, address: SocketAddr) -> MessageId {
        MessageId::with_token(token(address, &self.curr_secret))
    }

    /// Returns true if `id` was tagged for `address` with the current or the
    /// previous secret.
    pub fn is_for(&self, id: &MessageId, address: SocketAddr) -> bool {
        let token = id.token();

        token == self::token(address, &self.curr_secret)
            || token == self::token(address, &self.prev_secret)
    }
}

impl Default for MessageTagger {
    fn default() -> Self {
        Self::new()
    }
}

fn token(address: SocketAddr, secret: &[u8; SECRET_SIZE]) -> [u8; TOKEN_SIZE] {
    let mut digest = CASTAGNOLI.digest();

    match address.ip() {
        IpAddr::V4(ip) => digest.update(&ip.octets()),
        IpAddr::V6(ip) => digest.update(&ip.octets()),
    }
    digest.update(&address.port().to_be_bytes());
    digest.update(secret);

    digest.finalize().to_be_bytes()
}

fn random() -> [u8; SECRET_SIZE] {
    let mut bytes = [0_u8; SECRET_SIZE];
    if getrandom(&mut bytes).is_err() {
        rand::thread_rng().fill(&mut bytes);
    }

    bytes
}
