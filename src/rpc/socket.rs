//! Datagram transports driven by the reactor.

pub mod sim;
mod udp;

use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub use udp::MioUdp;

/// A non-blocking datagram socket with readiness notification.
pub trait Transport: Debug + Send {
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Returns [io::ErrorKind::WouldBlock] when no datagram is available.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Returns [io::ErrorKind::WouldBlock] when the datagram can not be sent yet.
    fn send_to(&mut self, buf: &[u8], address: SocketAddr) -> io::Result<usize>;

    /// Block until the socket is readable, writable if `write_interest` is set,
    /// the [Wakeup] is triggered, or `timeout` elapsed.
    fn wait(&mut self, write_interest: bool, timeout: Duration) -> io::Result<()>;

    /// Returns a handle interrupting [Transport::wait] from another thread.
    fn waker(&self) -> io::Result<Arc<dyn Wakeup>>;
}

pub trait Wakeup: Debug + Send + Sync {
    fn wake(&self) -> io::Result<()>;
}

impl Wakeup for mio::Waker {
    fn wake(&self) -> io::Result<()> {
        mio::Waker::wake(self)
    }
}
