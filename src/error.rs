//! Main Crate Error

use std::net::SocketAddr;

use crate::common::{Id, MessageId};

#[derive(thiserror::Error, Debug)]
/// Dht dispatcher error enum.
pub enum Error {
    /// For errors raised by request handlers.
    #[error("Generic error: {0}")]
    Generic(String),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    /// Indicates that a node id is not [crate::common::ID_SIZE] bytes.
    #[error("Invalid Id size, expected 20, got {0}")]
    InvalidIdSize(usize),

    /// Indicates that a message id is not [crate::common::MESSAGE_ID_SIZE] bytes.
    #[error("Invalid MessageId size, expected 16, got {0}")]
    InvalidMessageIdSize(usize),

    /// Compact socket address of unexpected length.
    #[error("Invalid compact address size: {0}")]
    InvalidAddressSize(usize),

    /// Compact contact of unexpected length.
    #[error("Invalid compact contact size: {0}")]
    InvalidContactSize(usize),

    #[error("Invalid signature size: {0}")]
    InvalidSignatureSize(usize),

    /// Protocol version out of the `u16` range.
    #[error("Invalid protocol version: {0}")]
    InvalidVersion(i64),

    /// Statistics kind out of the `u8` range.
    #[error("Invalid statistics kind: {0}")]
    InvalidStatsKind(i64),

    /// `bind` was called on an already bound dispatcher.
    #[error("MessageDispatcher is already bound")]
    AlreadyBound,

    /// `start` was called before `bind`.
    #[error("MessageDispatcher is not bound")]
    NotBound,

    /// A message was submitted before `start` or after `stop`.
    #[error("MessageDispatcher is not running")]
    NotRunning,

    /// Destination is the local node's own contact address.
    #[error("{0} is the local node's contact address")]
    LocalContactAddress(SocketAddr),

    /// Destination carries the local node's id and is not a collision probe.
    #[error("{0:?} is the local node's id")]
    LocalNodeId(Id),

    #[error("Invalid IP:Port {0}")]
    IllegalAddress(SocketAddr),

    #[error("Private IP:Port {0}")]
    PrivateAddress(SocketAddr),

    #[error("Illegal message size: {0}")]
    IllegalMessageSize(usize),

    #[error("Message is too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// A receipt for this message id is still outstanding.
    #[error("Duplicate {0}")]
    DuplicateMessageId(MessageId),

    /// The request was still queued when the dispatcher stopped.
    #[error("MessageDispatcher was stopped")]
    Shutdown,

    /// The request was still awaiting a response when the dispatcher closed.
    #[error("MessageDispatcher was closed")]
    Closed,
}
