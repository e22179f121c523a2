//! Dispatcher lifecycle events.

use std::fmt::Debug;
use std::net::SocketAddr;

use crate::common::{Id, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A message was handed to the transport.
    MessageSent,
    /// A message was received, before any filtering.
    MessageReceived,
    /// A message was rejected by the [super::MessageFilter].
    MessageFiltered,
    /// A request timed out.
    ReceiptTimeout,
    /// A request was evicted to make room for a newer one.
    ReceiptEvicted,
    /// A response to a request that already timed out or was evicted.
    LateResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherEvent {
    pub event_type: EventType,
    /// The remote node id, if known.
    pub node_id: Option<Id>,
    /// The remote address.
    pub address: SocketAddr,
    pub message: Message,
}

/// Synchronous event callback, called on the reactor thread. Must not block.
pub trait DispatcherListener: Send + Debug {
    fn handle_event(&mut self, event: &DispatcherEvent);
}

#[derive(Debug, Default)]
pub(crate) struct Listeners {
    listeners: Vec<Box<dyn DispatcherListener>>,
    subscribers: Vec<flume::Sender<DispatcherEvent>>,
}

impl Listeners {
    pub fn add(&mut self, listener: Box<dyn DispatcherListener>) {
        self.listeners.push(listener);
    }

    pub fn subscribe(&mut self, sender: flume::Sender<DispatcherEvent>) {
        self.subscribers.push(sender);
    }

    pub fn fire(
        &mut self,
        event_type: EventType,
        node_id: Option<Id>,
        address: SocketAddr,
        message: &Message,
    ) {
        if self.listeners.is_empty() && self.subscribers.is_empty() {
            return;
        }

        let event = DispatcherEvent {
            event_type,
            node_id,
            address,
            message: message.clone(),
        };

        for listener in self.listeners.iter_mut() {
            listener.handle_event(&event);
        }

        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::{Contact, MessageBody, MessageId, RequestSpecific};

    #[derive(Debug, Default)]
    struct Counter(usize);

    impl DispatcherListener for Counter {
        fn handle_event(&mut self, _event: &DispatcherEvent) {
            self.0 += 1;
        }
    }

    #[test]
    fn disconnected_subscribers_are_pruned() {
        let mut listeners = Listeners::default();
        listeners.add(Box::new(Counter::default()));

        let (sender, receiver) = flume::unbounded();
        listeners.subscribe(sender);
        let (dropped, _) = flume::unbounded();
        listeners.subscribe(dropped);

        let message = Message::new(
            MessageId::random(),
            Contact::new(Id::random(), ([1, 2, 3, 4], 1).into()),
            MessageBody::Request(RequestSpecific::Ping),
        );

        listeners.fire(EventType::MessageSent, None, message.sender.address, &message);

        assert_eq!(listeners.subscribers.len(), 1);
        assert_eq!(
            receiver.try_recv().map(|event| event.event_type),
            Ok(EventType::MessageSent)
        );
    }
}
