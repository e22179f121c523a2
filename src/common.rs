//! Miscellaneous common structs used throughout the library.

mod address;
mod contact;
mod id;
mod message_id;
pub mod messages;

pub use address::*;
pub use contact::*;
pub use id::*;
pub use message_id::*;
pub use messages::*;
