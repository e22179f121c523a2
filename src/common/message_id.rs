//! Message identifier correlating requests and responses.
use rand::Rng;
use std::fmt::{self, Debug, Display, Formatter};

use crate::{Error, Result};

/// The size of message ids in bytes.
pub const MESSAGE_ID_SIZE: usize = 16;
/// The size of the security token embedded at the start of tagged message ids.
pub const TOKEN_SIZE: usize = 4;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// A 128 bit, pseudo random, message identifier.
///
/// Tagged ids carry a [TOKEN_SIZE] bytes security token in their first bytes,
/// see [crate::rpc::MessageTagger].
pub struct MessageId(pub [u8; MESSAGE_ID_SIZE]);

impl MessageId {
    pub fn random() -> MessageId {
        let mut rng = rand::thread_rng();

        MessageId(rng.gen())
    }

    /// Creates a random id whose first bytes are the given token.
    pub fn with_token(token: [u8; TOKEN_SIZE]) -> MessageId {
        let mut id = Self::random();
        id.0[..TOKEN_SIZE].copy_from_slice(&token);

        id
    }

    /// Create a new MessageId from some bytes. Returns Err if `bytes` is not of length
    /// [MESSAGE_ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<MessageId> {
        let bytes = bytes.as_ref();
        if bytes.len() != MESSAGE_ID_SIZE {
            return Err(Error::InvalidMessageIdSize(bytes.len()));
        }

        let mut tmp = [0; MESSAGE_ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(MessageId(tmp))
    }

    /// The bytes that would hold a security token if this id was tagged.
    pub fn token(&self) -> [u8; TOKEN_SIZE] {
        let mut token = [0; TOKEN_SIZE];
        token.copy_from_slice(&self.0[..TOKEN_SIZE]);

        token
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_SIZE] {
        &self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

impl Debug for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({self})")
    }
}
