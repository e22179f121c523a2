//! Request/response dispatching over a datagram transport.

mod config;
mod dispatcher;
mod events;
mod handler;
mod reactor;
mod receipts;
pub mod socket;
mod tag;
mod tokens;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use config::*;
pub use dispatcher::{DispatcherBuilder, MessageDispatcher};
pub use events::{DispatcherEvent, DispatcherListener, EventType};
pub use handler::{
    ChannelHandler, DefaultFilter, DefaultHandler, HostFilter, MessageFilter, NoopHandler,
    PingRequestHandler, RequestHandler, RequestOutcome, ResponseHandler,
};
pub use receipts::{ReceiptMap, Resolution, Sweep};
pub use socket::{MioUdp, Transport, Wakeup};
pub use tag::{Receipt, Tag};
pub use tokens::MessageTagger;

// Handlers never run while a lock is held, a poisoned lock still guards
// consistent state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
