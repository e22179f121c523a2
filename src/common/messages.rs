//! Serialize and deserialize DHT messages.

mod internal;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_bytes::ByteBuf;

use crate::common::{Contact, Id, MessageId, ID_SIZE};
use crate::{Error, Result};

/// Size of an ed25519 signature.
pub const SIGNATURE_SIZE: usize = 64;

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    pub id: MessageId,

    /// The node that sent this message.
    ///
    /// For inbound messages the address is the datagram's source address.
    pub sender: Contact,

    pub body: MessageBody,

    /// Optional ed25519 signature over [Message::signable_bytes].
    pub signature: Option<Bytes>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageBody {
    Request(RequestSpecific),

    Response(ResponseSpecific),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The kind of a request, used to route it to a request handler.
pub enum RequestType {
    Ping,
    FindNode,
    FindValue,
    Store,
    Stats,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestSpecific {
    Ping,
    FindNode(FindNodeRequestArguments),
    FindValue(FindValueRequestArguments),
    Store(StoreRequestArguments),
    Stats(StatsRequestArguments),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    Pong(PingResponseArguments),
    FindNode(FindNodeResponseArguments),
    FindValue(FindValueResponseArguments),
    Store(StoreResponseArguments),
    Stats(StatsResponseArguments),
}

// === PING ===

#[derive(Debug, PartialEq, Clone)]
pub struct PingResponseArguments {
    /// The requester's address as seen by the responder.
    pub external_address: SocketAddr,
    /// The responder's estimate of the DHT size.
    pub estimated_size: u64,
}

// === FIND_NODE ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeRequestArguments {
    pub target: Id,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeResponseArguments {
    /// Token the requester must present in a subsequent store request.
    pub token: Bytes,
    pub nodes: Vec<Contact>,
}

// === FIND_VALUE ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindValueRequestArguments {
    pub target: Id,
    /// Secondary keys, when only some of the values under `target` are wanted.
    pub keys: Vec<Id>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindValueResponseArguments {
    pub values: Vec<Bytes>,
    /// Secondary keys of values that did not fit in this response.
    pub keys: Vec<Id>,
}

// === STORE ===

#[derive(Debug, PartialEq, Clone)]
pub struct StoreRequestArguments {
    pub token: Bytes,
    pub values: Vec<Bytes>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct StoreResponseArguments {
    /// Keys of the values that were stored.
    pub stored: Vec<Id>,
}

// === STATS ===

#[derive(Debug, PartialEq, Clone)]
pub struct StatsRequestArguments {
    pub kind: u8,
}

#[derive(Debug, PartialEq, Clone)]
pub struct StatsResponseArguments {
    pub statistics: Bytes,
}

impl RequestSpecific {
    pub fn request_type(&self) -> RequestType {
        match self {
            RequestSpecific::Ping => RequestType::Ping,
            RequestSpecific::FindNode(_) => RequestType::FindNode,
            RequestSpecific::FindValue(_) => RequestType::FindValue,
            RequestSpecific::Store(_) => RequestType::Store,
            RequestSpecific::Stats(_) => RequestType::Stats,
        }
    }

    /// Returns true if `response` is a legitimate answer to this request.
    ///
    /// A find_value request may be answered with closer nodes instead of values.
    pub fn accepts(&self, response: &ResponseSpecific) -> bool {
        matches!(
            (self, response),
            (RequestSpecific::Ping, ResponseSpecific::Pong(_))
                | (RequestSpecific::FindNode(_), ResponseSpecific::FindNode(_))
                | (RequestSpecific::FindValue(_), ResponseSpecific::FindNode(_))
                | (RequestSpecific::FindValue(_), ResponseSpecific::FindValue(_))
                | (RequestSpecific::Store(_), ResponseSpecific::Store(_))
                | (RequestSpecific::Stats(_), ResponseSpecific::Stats(_))
        )
    }
}

impl Message {
    /// Creates an unsigned message.
    pub fn new(id: MessageId, sender: Contact, body: MessageBody) -> Message {
        Message {
            id,
            sender,
            body,
            signature: None,
        }
    }

    // === Getters ===

    pub fn is_request(&self) -> bool {
        matches!(self.body, MessageBody::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self.body, MessageBody::Response(_))
    }

    pub fn request(&self) -> Option<&RequestSpecific> {
        match &self.body {
            MessageBody::Request(request) => Some(request),
            MessageBody::Response(_) => None,
        }
    }

    pub fn response(&self) -> Option<&ResponseSpecific> {
        match &self.body {
            MessageBody::Response(response) => Some(response),
            MessageBody::Request(_) => None,
        }
    }

    pub fn is_ping_response(&self) -> bool {
        matches!(self.body, MessageBody::Response(ResponseSpecific::Pong(_)))
    }

    /// Returns true if this is a ping sent with a collision ping sender
    /// for `local_id`.
    pub fn is_collision_ping(&self, local_id: &Id) -> bool {
        matches!(self.body, MessageBody::Request(RequestSpecific::Ping))
            && self.sender.is_collision_ping_sender(local_id)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    // === Signatures ===

    /// The bytes covered by the signature: message id, sender id and the
    /// encoded body.
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        let body = serde_bencode::to_bytes(&body_to_serde(&self.body))?;

        let mut bytes = Vec::with_capacity(self.id.0.len() + ID_SIZE + body.len());
        bytes.extend_from_slice(self.id.as_bytes());
        bytes.extend_from_slice(self.sender.id.as_bytes());
        bytes.extend_from_slice(&body);

        Ok(bytes)
    }

    /// Signs this message in place.
    pub fn sign(&mut self, signing_key: &SigningKey) -> Result<()> {
        let signature = signing_key.sign(&self.signable_bytes()?);
        self.signature = Some(Bytes::copy_from_slice(&signature.to_bytes()));

        Ok(())
    }

    /// Returns true if this message carries a valid signature from `key`.
    pub fn verify_signature(&self, key: &VerifyingKey) -> bool {
        let Some(signature) = &self.signature else {
            return false;
        };

        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };

        match self.signable_bytes() {
            Ok(bytes) => key.verify(&bytes, &signature).is_ok(),
            Err(_) => false,
        }
    }

    // === Wire ===

    /// Decodes a message received from `source`.
    pub fn from_bytes(bytes: &[u8], source: SocketAddr) -> Result<Message> {
        Message::from_serde_message(internal::DHTMessage::from_bytes(bytes)?, source)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.to_serde_message().to_bytes()?)
    }

    fn to_serde_message(&self) -> internal::DHTMessage {
        internal::DHTMessage {
            message_id: ByteBuf::from(self.id.0.to_vec()),
            node_id: ByteBuf::from(self.sender.id.to_vec()),
            version: self.sender.version.into(),
            firewalled: Some(if self.sender.firewalled { 1 } else { 0 }),
            variant: body_to_serde(&self.body),
            signature: self
                .signature
                .as_ref()
                .map(|signature| ByteBuf::from(signature.to_vec())),
        }
    }

    fn from_serde_message(msg: internal::DHTMessage, source: SocketAddr) -> Result<Message> {
        let signature = match msg.signature {
            Some(signature) if signature.len() != SIGNATURE_SIZE => {
                return Err(Error::InvalidSignatureSize(signature.len()));
            }
            Some(signature) => Some(Bytes::from(signature.into_vec())),
            None => None,
        };

        Ok(Message {
            id: MessageId::from_bytes(&msg.message_id)?,
            sender: Contact {
                id: Id::from_bytes(&msg.node_id)?,
                address: source,
                version: u16::try_from(msg.version)
                    .map_err(|_| Error::InvalidVersion(msg.version))?,
                firewalled: msg.firewalled.unwrap_or(0) > 0,
            },
            body: body_from_serde(msg.variant)?,
            signature,
        })
    }
}

fn body_to_serde(body: &MessageBody) -> internal::DHTMessageVariant {
    match body {
        MessageBody::Request(request) => internal::DHTMessageVariant::Request(match request {
            RequestSpecific::Ping => internal::DHTRequestSpecific::Ping {
                arguments: internal::DHTPingRequestArguments {},
            },
            RequestSpecific::FindNode(args) => internal::DHTRequestSpecific::FindNode {
                arguments: internal::DHTFindNodeRequestArguments {
                    target: ByteBuf::from(args.target.to_vec()),
                },
            },
            RequestSpecific::FindValue(args) => internal::DHTRequestSpecific::FindValue {
                arguments: internal::DHTFindValueRequestArguments {
                    target: ByteBuf::from(args.target.to_vec()),
                    keys: ids_to_bytes(&args.keys),
                },
            },
            RequestSpecific::Store(args) => internal::DHTRequestSpecific::Store {
                arguments: internal::DHTStoreRequestArguments {
                    token: ByteBuf::from(args.token.to_vec()),
                    values: values_to_bytes(&args.values),
                },
            },
            RequestSpecific::Stats(args) => internal::DHTRequestSpecific::Stats {
                arguments: internal::DHTStatsRequestArguments {
                    kind: args.kind.into(),
                },
            },
        }),

        MessageBody::Response(response) => internal::DHTMessageVariant::Response(match response {
            ResponseSpecific::Pong(args) => internal::DHTResponseSpecific::Pong {
                arguments: internal::DHTPingResponseArguments {
                    external_address: ByteBuf::from(sockaddr_to_bytes(&args.external_address)),
                    estimated_size: args.estimated_size as i64,
                },
            },
            ResponseSpecific::FindNode(args) => internal::DHTResponseSpecific::FindNode {
                arguments: internal::DHTFindNodeResponseArguments {
                    token: ByteBuf::from(args.token.to_vec()),
                    nodes: args
                        .nodes
                        .iter()
                        .map(|contact| ByteBuf::from(contact_to_bytes(contact)))
                        .collect(),
                },
            },
            ResponseSpecific::FindValue(args) => internal::DHTResponseSpecific::FindValue {
                arguments: internal::DHTFindValueResponseArguments {
                    values: values_to_bytes(&args.values),
                    keys: ids_to_bytes(&args.keys),
                },
            },
            ResponseSpecific::Store(args) => internal::DHTResponseSpecific::Store {
                arguments: internal::DHTStoreResponseArguments {
                    stored: ids_to_bytes(&args.stored),
                },
            },
            ResponseSpecific::Stats(args) => internal::DHTResponseSpecific::Stats {
                arguments: internal::DHTStatsResponseArguments {
                    statistics: ByteBuf::from(args.statistics.to_vec()),
                },
            },
        }),
    }
}

fn body_from_serde(variant: internal::DHTMessageVariant) -> Result<MessageBody> {
    Ok(match variant {
        internal::DHTMessageVariant::Request(request) => MessageBody::Request(match request {
            internal::DHTRequestSpecific::Ping { .. } => RequestSpecific::Ping,
            internal::DHTRequestSpecific::FindNode { arguments } => {
                RequestSpecific::FindNode(FindNodeRequestArguments {
                    target: Id::from_bytes(&arguments.target)?,
                })
            }
            internal::DHTRequestSpecific::FindValue { arguments } => {
                RequestSpecific::FindValue(FindValueRequestArguments {
                    target: Id::from_bytes(&arguments.target)?,
                    keys: bytes_to_ids(arguments.keys)?,
                })
            }
            internal::DHTRequestSpecific::Store { arguments } => {
                RequestSpecific::Store(StoreRequestArguments {
                    token: Bytes::from(arguments.token.into_vec()),
                    values: bytes_to_values(arguments.values),
                })
            }
            internal::DHTRequestSpecific::Stats { arguments } => {
                RequestSpecific::Stats(StatsRequestArguments {
                    kind: u8::try_from(arguments.kind)
                        .map_err(|_| Error::InvalidStatsKind(arguments.kind))?,
                })
            }
        }),

        internal::DHTMessageVariant::Response(response) => MessageBody::Response(match response {
            internal::DHTResponseSpecific::Pong { arguments } => {
                ResponseSpecific::Pong(PingResponseArguments {
                    external_address: bytes_to_sockaddr(&arguments.external_address)?,
                    estimated_size: arguments.estimated_size.max(0) as u64,
                })
            }
            internal::DHTResponseSpecific::FindNode { arguments } => {
                ResponseSpecific::FindNode(FindNodeResponseArguments {
                    token: Bytes::from(arguments.token.into_vec()),
                    nodes: arguments
                        .nodes
                        .iter()
                        .map(|bytes| bytes_to_contact(bytes))
                        .collect::<Result<Vec<_>>>()?,
                })
            }
            internal::DHTResponseSpecific::FindValue { arguments } => {
                ResponseSpecific::FindValue(FindValueResponseArguments {
                    values: bytes_to_values(arguments.values),
                    keys: bytes_to_ids(arguments.keys)?,
                })
            }
            internal::DHTResponseSpecific::Store { arguments } => {
                ResponseSpecific::Store(StoreResponseArguments {
                    stored: bytes_to_ids(arguments.stored)?,
                })
            }
            internal::DHTResponseSpecific::Stats { arguments } => {
                ResponseSpecific::Stats(StatsResponseArguments {
                    statistics: Bytes::from(arguments.statistics.into_vec()),
                })
            }
        }),
    })
}

fn ids_to_bytes(ids: &[Id]) -> Vec<ByteBuf> {
    ids.iter().map(|id| ByteBuf::from(id.to_vec())).collect()
}

fn bytes_to_ids(bytes: Vec<ByteBuf>) -> Result<Vec<Id>> {
    bytes.iter().map(Id::from_bytes).collect()
}

fn values_to_bytes(values: &[Bytes]) -> Vec<ByteBuf> {
    values.iter().map(|value| ByteBuf::from(value.to_vec())).collect()
}

fn bytes_to_values(bytes: Vec<ByteBuf>) -> Vec<Bytes> {
    bytes
        .into_iter()
        .map(|value| Bytes::from(value.into_vec()))
        .collect()
}

/// Compact address: 4 or 16 bytes of ip followed by a big endian port.
fn sockaddr_to_bytes(address: &SocketAddr) -> Vec<u8> {
    let mut bytes = match address.ip() {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    };
    bytes.extend_from_slice(&address.port().to_be_bytes());

    bytes
}

fn bytes_to_sockaddr(bytes: &[u8]) -> Result<SocketAddr> {
    match bytes.len() {
        6 => {
            let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
            let port = u16::from_be_bytes([bytes[4], bytes[5]]);

            Ok(SocketAddr::new(ip.into(), port))
        }
        18 => {
            let mut octets = [0_u8; 16];
            octets.copy_from_slice(&bytes[..16]);
            let port = u16::from_be_bytes([bytes[16], bytes[17]]);

            Ok(SocketAddr::new(Ipv6Addr::from(octets).into(), port))
        }
        len => Err(Error::InvalidAddressSize(len)),
    }
}

/// Compact contact: id, big endian version, firewalled flag and compact address.
fn contact_to_bytes(contact: &Contact) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ID_SIZE + 3 + 18);
    bytes.extend_from_slice(contact.id.as_bytes());
    bytes.extend_from_slice(&contact.version.to_be_bytes());
    bytes.push(contact.firewalled as u8);
    bytes.extend_from_slice(&sockaddr_to_bytes(&contact.address));

    bytes
}

fn bytes_to_contact(bytes: &[u8]) -> Result<Contact> {
    if bytes.len() != ID_SIZE + 3 + 6 && bytes.len() != ID_SIZE + 3 + 18 {
        return Err(Error::InvalidContactSize(bytes.len()));
    }

    Ok(Contact {
        id: Id::from_bytes(&bytes[..ID_SIZE])?,
        version: u16::from_be_bytes([bytes[ID_SIZE], bytes[ID_SIZE + 1]]),
        firewalled: bytes[ID_SIZE + 2] > 0,
        address: bytes_to_sockaddr(&bytes[ID_SIZE + 3..])?,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn sender() -> Contact {
        Contact::new(Id::random(), ([1, 2, 3, 4], 6881).into())
    }

    #[test]
    fn decode_preserves_id_type_and_uses_source_address() {
        let message = Message::new(
            MessageId::random(),
            sender(),
            MessageBody::Request(RequestSpecific::FindValue(FindValueRequestArguments {
                target: Id::random(),
                keys: vec![Id::random()],
            })),
        );
        let source: SocketAddr = ([5, 6, 7, 8], 4000).into();

        let decoded = Message::from_bytes(&message.to_bytes().unwrap(), source).unwrap();

        assert_eq!(decoded.id, message.id);
        assert_eq!(decoded.sender.id, message.sender.id);
        assert_eq!(decoded.sender.address, source);
        assert_eq!(decoded.body, message.body);
    }

    #[test]
    fn find_node_response_contacts() {
        let nodes = vec![
            Contact::new(Id::random(), ([9, 9, 9, 9], 1).into()),
            Contact::new(Id::random(), "[2a00:1450::1]:7000".parse().unwrap())
                .with_firewalled(true),
        ];
        let message = Message::new(
            MessageId::random(),
            sender(),
            MessageBody::Response(ResponseSpecific::FindNode(FindNodeResponseArguments {
                token: Bytes::from_static(b"tok"),
                nodes: nodes.clone(),
            })),
        );

        let decoded =
            Message::from_bytes(&message.to_bytes().unwrap(), message.sender.address).unwrap();

        assert_eq!(
            decoded.response(),
            Some(&ResponseSpecific::FindNode(FindNodeResponseArguments {
                token: Bytes::from_static(b"tok"),
                nodes,
            }))
        );
    }

    #[test]
    fn accepts_counterpart_only() {
        let pong = ResponseSpecific::Pong(PingResponseArguments {
            external_address: ([1, 1, 1, 1], 1).into(),
            estimated_size: 0,
        });
        let nodes = ResponseSpecific::FindNode(FindNodeResponseArguments {
            token: Bytes::new(),
            nodes: vec![],
        });
        let store = ResponseSpecific::Store(StoreResponseArguments { stored: vec![] });
        let find_node = RequestSpecific::FindNode(FindNodeRequestArguments {
            target: Id::random(),
        });
        let find_value = RequestSpecific::FindValue(FindValueRequestArguments {
            target: Id::random(),
            keys: vec![],
        });

        assert!(RequestSpecific::Ping.accepts(&pong));
        assert!(!RequestSpecific::Ping.accepts(&nodes));
        assert!(find_node.accepts(&nodes));
        assert!(!find_node.accepts(&store));
        assert!(find_value.accepts(&nodes));
        assert!(!find_value.accepts(&pong));
    }

    #[test]
    fn signatures() {
        let signing_key = SigningKey::from_bytes(&[7; 32]);
        let mut message = Message::new(
            MessageId::random(),
            sender(),
            MessageBody::Request(RequestSpecific::Stats(StatsRequestArguments { kind: 1 })),
        );

        assert!(!message.verify_signature(&signing_key.verifying_key()));

        message.sign(&signing_key).unwrap();
        assert!(message.is_signed());
        assert!(message.verify_signature(&signing_key.verifying_key()));

        let decoded =
            Message::from_bytes(&message.to_bytes().unwrap(), message.sender.address).unwrap();
        assert!(decoded.verify_signature(&signing_key.verifying_key()));

        let other = SigningKey::from_bytes(&[8; 32]);
        assert!(!decoded.verify_signature(&other.verifying_key()));
    }

    #[test]
    fn malformed_bytes() {
        let source: SocketAddr = ([1, 2, 3, 4], 1).into();

        assert!(Message::from_bytes(b"not bencode", source).is_err());
        assert!(Message::from_bytes(b"de", source).is_err());
    }

    #[test]
    fn out_of_range_integers_are_rejected() {
        let source: SocketAddr = ([1, 2, 3, 4], 1).into();

        let mut wire = Message::new(
            MessageId::random(),
            sender(),
            MessageBody::Request(RequestSpecific::Ping),
        )
        .to_serde_message();
        wire.version = 70_000;

        assert!(matches!(
            Message::from_bytes(&wire.to_bytes().unwrap(), source),
            Err(Error::InvalidVersion(70_000))
        ));

        let mut wire = Message::new(
            MessageId::random(),
            sender(),
            MessageBody::Request(RequestSpecific::Stats(StatsRequestArguments { kind: 1 })),
        )
        .to_serde_message();
        if let internal::DHTMessageVariant::Request(internal::DHTRequestSpecific::Stats {
            arguments,
        }) = &mut wire.variant
        {
            arguments.kind = -1;
        }

        assert!(matches!(
            Message::from_bytes(&wire.to_bytes().unwrap(), source),
            Err(Error::InvalidStatsKind(-1))
        ));
    }
}
