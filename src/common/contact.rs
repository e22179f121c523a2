//! Remote or local DHT node descriptor.
use std::net::SocketAddr;

use crate::common::Id;

/// Protocol version advertised by this implementation.
pub const PROTOCOL_VERSION: u16 = 0x0100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// A DHT node as seen on the wire: its id, contact address, protocol version
/// and whether it declared itself firewalled.
pub struct Contact {
    pub id: Id,
    pub address: SocketAddr,
    pub version: u16,
    pub firewalled: bool,
}

impl Contact {
    /// Creates a new, not firewalled, Contact speaking [PROTOCOL_VERSION].
    pub fn new(id: Id, address: SocketAddr) -> Contact {
        Contact {
            id,
            address,
            version: PROTOCOL_VERSION,
            firewalled: false,
        }
    }

    pub fn with_firewalled(mut self, firewalled: bool) -> Self {
        self.firewalled = firewalled;
        self
    }

    /// Returns the sender used to probe the network for another node using
    /// our own id.
    ///
    /// The id is inverted and the contact is marked firewalled so the probed
    /// node neither suspects spoofing nor adds the probe to its routing table.
    pub fn collision_ping_sender(local: &Contact) -> Contact {
        Contact {
            id: local.id.invert(),
            address: local.address,
            version: local.version,
            firewalled: true,
        }
    }

    /// Returns true if this contact is a collision ping sender for `local_id`.
    pub fn is_collision_ping_sender(&self, local_id: &Id) -> bool {
        self.firewalled && self.id == local_id.invert()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn collision_ping_sender() {
        let local = Contact::new(Id::random(), ([1, 2, 3, 4], 5000).into());
        let sender = Contact::collision_ping_sender(&local);

        assert!(sender.firewalled);
        assert_eq!(sender.address, local.address);
        assert!(sender.is_collision_ping_sender(&local.id));

        assert!(!local.is_collision_ping_sender(&local.id));
        assert!(!sender
            .with_firewalled(false)
            .is_collision_ping_sender(&local.id));
    }
}
