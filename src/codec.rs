//! Message serialization used by the dispatcher.

use std::fmt::Debug;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::common::Message;
use crate::Result;

/// Encodes outgoing messages and decodes incoming datagrams.
///
/// Encoding runs on the sender's thread, decoding on the reactor thread.
pub trait MessageCodec: Send + Sync + Debug {
    fn encode(&self, message: &Message, destination: SocketAddr) -> Result<Bytes>;

    /// Decodes a datagram received from `source`, the sender's address is `source`.
    fn decode(&self, bytes: Bytes, source: SocketAddr) -> Result<Message>;
}

#[derive(Debug, Default, Clone, Copy)]
/// Bencode wire format.
pub struct BencodeCodec;

impl MessageCodec for BencodeCodec {
    fn encode(&self, message: &Message, _destination: SocketAddr) -> Result<Bytes> {
        Ok(message.to_bytes()?.into())
    }

    fn decode(&self, bytes: Bytes, source: SocketAddr) -> Result<Message> {
        Message::from_bytes(&bytes, source)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::{Contact, Id, MessageBody, MessageId, RequestSpecific};

    #[test]
    fn decode_encoded() {
        let codec = BencodeCodec;
        let sender: SocketAddr = ([1, 2, 3, 4], 6881).into();
        let message = Message::new(
            MessageId::random(),
            Contact::new(Id::random(), sender),
            MessageBody::Request(RequestSpecific::Ping),
        );

        let bytes = codec.encode(&message, ([5, 6, 7, 8], 1).into()).unwrap();

        assert_eq!(codec.decode(bytes, sender).unwrap(), message);
    }
}
