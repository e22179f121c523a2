//! Bounded table of outstanding requests.

use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;

use crate::common::{Message, MessageId};

use super::handler::ResponseHandler;
use super::tag::Receipt;

#[derive(Debug)]
/// Outstanding requests by message id, in insertion order.
///
/// When full, the oldest receipt is evicted to make room for a new one, which
/// the owner reports as a timeout.
pub struct ReceiptMap {
    // Only `peek`ed and `pop`ed, never promoted, so the lru order is the
    // insertion order.
    receipts: LruCache<MessageId, Receipt>,
    capacity: usize,
}

#[derive(Debug)]
/// Result of matching a response against the outstanding requests.
pub enum Resolution {
    /// The receipt was removed and marked received.
    Resolved(Receipt),
    /// The request was cancelled, its receipt is removed silently.
    Cancelled,
    /// A receipt exists but failed the sanity check, and is kept.
    Rejected,
    /// No outstanding request with this message id.
    Unknown,
}

#[derive(Debug, Default)]
/// Result of a cleanup sweep.
pub struct Sweep {
    pub timed_out: Vec<Receipt>,
    pub cancelled: usize,
    /// Handlers of requests still outstanding.
    pub pending: Vec<Arc<dyn ResponseHandler>>,
}

impl ReceiptMap {
    pub fn new(capacity: usize) -> Self {
        Self {
            receipts: LruCache::unbounded(),
            capacity: capacity.max(1),
        }
    }

    // === Getters ===

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.receipts.contains(message_id)
    }

    // === Public Methods ===

    /// Insert a receipt, evicting the oldest ones first if the map is full.
    ///
    /// Returns the evicted receipts, or the receipt itself if its message id
    /// is already outstanding.
    pub fn insert(&mut self, receipt: Receipt) -> Result<Vec<Receipt>, Receipt> {
        let message_id = receipt.message_id();

        if self.receipts.contains(&message_id) {
            return Err(receipt);
        }

        let evicted = self.make_room();
        self.receipts.push(message_id, receipt);

        Ok(evicted)
    }

    /// Evict the oldest receipts until one more fits.
    pub fn make_room(&mut self) -> Vec<Receipt> {
        let mut evicted = Vec::new();
        while self.receipts.len() >= self.capacity {
            match self.receipts.pop_lru() {
                Some((_, receipt)) => evicted.push(receipt),
                None => break,
            }
        }

        evicted
    }

    /// Match `response` against the receipt of the same message id.
    pub fn resolve(&mut self, response: &Message, now: Instant) -> Resolution {
        let Some(receipt) = self.receipts.peek(&response.id) else {
            return Resolution::Unknown;
        };

        if receipt.is_cancelled() {
            self.receipts.pop(&response.id);
            return Resolution::Cancelled;
        }

        if !receipt.sanity_check(response) {
            return Resolution::Rejected;
        }

        match self.receipts.pop(&response.id) {
            Some(mut receipt) => {
                receipt.mark_received(now);
                Resolution::Resolved(receipt)
            }
            None => Resolution::Unknown,
        }
    }

    /// Remove cancelled and expired receipts, oldest first.
    pub fn cleanup(&mut self, now: Instant) -> Sweep {
        let mut sweep = Sweep::default();
        let mut expired = Vec::new();

        for (message_id, receipt) in self.receipts.iter().rev() {
            if receipt.is_cancelled() {
                sweep.cancelled += 1;
                expired.push(*message_id);
            } else if receipt.is_timed_out(now) {
                expired.push(*message_id);
            } else {
                sweep.pending.push(receipt.handler().clone());
            }
        }

        for message_id in expired {
            if let Some(receipt) = self.receipts.pop(&message_id) {
                if !receipt.is_cancelled() {
                    sweep.timed_out.push(receipt);
                }
            }
        }

        sweep
    }

    /// Remove all receipts, oldest first.
    pub fn drain(&mut self) -> Vec<Receipt> {
        let mut receipts = Vec::with_capacity(self.receipts.len());
        while let Some((_, receipt)) = self.receipts.pop_lru() {
            receipts.push(receipt);
        }

        receipts
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;
    use std::time::Duration;

    use super::*;
    use crate::common::{
        Contact, Id, MessageBody, PingResponseArguments, RequestSpecific, ResponseSpecific,
    };
    use crate::rpc::{ChannelHandler, RequestOutcome, Tag};

    fn address() -> SocketAddr {
        ([1, 2, 3, 4], 6881).into()
    }

    fn receipt(handler: Arc<ChannelHandler>, sent_at: Instant) -> Receipt {
        let request = Message::new(
            MessageId::random(),
            Contact::new(Id::random(), ([9, 9, 9, 9], 9).into()),
            MessageBody::Request(RequestSpecific::Ping),
        );

        Tag::request(None, address(), request, handler)
            .into_receipt(sent_at)
            .unwrap()
    }

    fn pong(message_id: MessageId) -> Message {
        Message::new(
            message_id,
            Contact::new(Id::random(), address()),
            MessageBody::Response(ResponseSpecific::Pong(PingResponseArguments {
                external_address: ([9, 9, 9, 9], 9).into(),
                estimated_size: 0,
            })),
        )
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut map = ReceiptMap::new(2);
        let now = Instant::now();

        let first = receipt(ChannelHandler::new().0, now);
        let first_id = first.message_id();
        assert!(map.insert(first).unwrap().is_empty());
        assert!(map.insert(receipt(ChannelHandler::new().0, now)).unwrap().is_empty());

        let evicted = map.insert(receipt(ChannelHandler::new().0, now)).unwrap();

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].message_id(), first_id);
        assert_eq!(map.len(), 2);
        assert!(!map.contains(&first_id));
    }

    #[test]
    fn rejects_duplicates() {
        let mut map = ReceiptMap::new(4);
        let now = Instant::now();

        let receipt = receipt(ChannelHandler::new().0, now);
        let request = receipt.request().clone();
        map.insert(receipt).unwrap();

        let duplicate = Tag::request(None, address(), request, ChannelHandler::new().0)
            .into_receipt(now)
            .unwrap();

        assert!(map.insert(duplicate).is_err());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn resolve() {
        let mut map = ReceiptMap::new(4);
        let now = Instant::now();

        let receipt = receipt(ChannelHandler::new().0, now);
        let message_id = receipt.message_id();
        map.insert(receipt).unwrap();

        assert!(matches!(
            map.resolve(&pong(MessageId::random()), now),
            Resolution::Unknown
        ));

        let mut spoofed = pong(message_id);
        spoofed.sender.address = ([6, 6, 6, 6], 6881).into();
        assert!(matches!(map.resolve(&spoofed, now), Resolution::Rejected));
        assert!(map.contains(&message_id));

        let later = now + Duration::from_millis(30);
        match map.resolve(&pong(message_id), later) {
            Resolution::Resolved(receipt) => {
                assert_eq!(receipt.rtt(), Some(Duration::from_millis(30)))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(map.is_empty());
    }

    #[test]
    fn resolve_cancelled() {
        let mut map = ReceiptMap::new(4);
        let now = Instant::now();

        let (handler, receiver) = ChannelHandler::new();
        let receipt = receipt(handler.clone(), now);
        let message_id = receipt.message_id();
        map.insert(receipt).unwrap();

        handler.cancel();

        assert!(matches!(
            map.resolve(&pong(message_id), now),
            Resolution::Cancelled
        ));
        assert!(map.is_empty());
        assert!(receiver.is_empty());
    }

    #[test]
    fn cleanup() {
        let mut map = ReceiptMap::new(8);
        let now = Instant::now();

        let (expired, expired_receiver) = ChannelHandler::with_timeout(Duration::from_secs(1));
        let (pending, pending_receiver) = ChannelHandler::with_timeout(Duration::from_secs(10));
        let (cancelled, cancelled_receiver) = ChannelHandler::with_timeout(Duration::from_secs(1));

        map.insert(receipt(expired, now)).unwrap();
        map.insert(receipt(pending, now)).unwrap();
        map.insert(receipt(cancelled.clone(), now)).unwrap();
        cancelled.cancel();

        let later = now + Duration::from_secs(2);
        let sweep = map.cleanup(later);

        assert_eq!(sweep.timed_out.len(), 1);
        assert_eq!(sweep.cancelled, 1);
        assert_eq!(sweep.pending.len(), 1);
        assert_eq!(map.len(), 1);

        for receipt in sweep.timed_out {
            receipt.handle_timeout(later);
        }

        assert_eq!(
            expired_receiver.try_recv(),
            Ok(RequestOutcome::Timeout {
                elapsed: Duration::from_secs(2)
            })
        );
        assert!(pending_receiver.is_empty());
        assert!(cancelled_receiver.is_empty());
    }
}
