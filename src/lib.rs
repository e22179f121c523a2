#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

mod codec;
mod common;
mod error;
pub mod rpc;
mod verifier;

pub use crate::codec::{BencodeCodec, MessageCodec};
pub use crate::common::{
    is_private_addr, is_same_address_space, is_valid_socket_addr, messages, Contact, Id, Message,
    MessageBody, MessageId, RequestSpecific, RequestType, ResponseSpecific, ID_SIZE,
    MESSAGE_ID_SIZE, PROTOCOL_VERSION, TOKEN_SIZE,
};
pub use crate::error::Error;
pub use crate::rpc::{Config, DispatcherEvent, EventType, MessageDispatcher, Tag};
pub use crate::verifier::{Ed25519Verifier, SecurityVerifier, VerifyCallback};
pub use bytes::Bytes;

pub use ed25519_dalek::{SigningKey, VerifyingKey};

/// Alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
