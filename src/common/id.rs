//! Kademlia node Id
use rand::Rng;
use std::fmt::{self, Debug, Display, Formatter};

use crate::{Error, Result};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Kademlia node Id
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE](crate::common::ID_SIZE).
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Id(tmp))
    }

    /// Returns the bitwise complement of this Id.
    ///
    /// Used as the sender id of node id collision probes, so the probed
    /// node never mistakes the probe for a spoofing attempt.
    pub fn invert(&self) -> Id {
        let mut inverted = self.0;
        for byte in inverted.iter_mut() {
            *byte = !*byte;
        }

        Id(inverted)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invert_is_an_involution() {
        let id = Id::random();

        assert_ne!(id.invert(), id);
        assert_eq!(id.invert().invert(), id);
    }

    #[test]
    fn from_bytes_rejects_wrong_size() {
        assert!(matches!(
            Id::from_bytes([0_u8; 19]),
            Err(Error::InvalidIdSize(19))
        ));
        assert_eq!(Id::from_bytes([7_u8; 20]).unwrap(), Id([7; 20]));
    }

    #[test]
    fn display_hex() {
        let mut bytes = [0_u8; ID_SIZE];
        bytes[0] = 0xab;
        bytes[19] = 0x01;

        let hex = Id(bytes).to_string();

        assert_eq!(hex.len(), 40);
        assert!(hex.starts_with("ab00"));
        assert!(hex.ends_with("01"));
    }
}
