use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::trace;

use super::{Transport, Wakeup};
use crate::rpc::Config;

const SOCKET: Token = Token(0);
const WAKER: Token = Token(1);

#[derive(Debug)]
/// A UDP socket registered with a mio [Poll].
pub struct MioUdp {
    socket: UdpSocket,
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    write_interest: bool,
}

impl MioUdp {
    /// Bind a non-blocking UDP socket to `address`, with the buffer sizes from `config`.
    pub fn bind(address: SocketAddr, config: &Config) -> io::Result<MioUdp> {
        let socket = Socket::new(Domain::for_address(address), Type::DGRAM, Some(Protocol::UDP))?;

        socket.set_recv_buffer_size(config.receive_buffer_size)?;
        socket.set_send_buffer_size(config.send_buffer_size)?;
        socket.set_nonblocking(true)?;
        socket.bind(&address.into())?;

        let mut socket = UdpSocket::from_std(socket.into());

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        trace!(context = "socket", local_addr = ?socket.local_addr(), "Bound UDP socket");

        Ok(MioUdp {
            socket,
            poll,
            events: Events::with_capacity(16),
            waker,
            write_interest: false,
        })
    }
}

impl Transport for MioUdp {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    fn send_to(&mut self, buf: &[u8], address: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, address)
    }

    fn wait(&mut self, write_interest: bool, timeout: Duration) -> io::Result<()> {
        if write_interest != self.write_interest {
            let interest = if write_interest {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };

            self.poll
                .registry()
                .reregister(&mut self.socket, SOCKET, interest)?;
            self.write_interest = write_interest;
        }

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Err(error) if error.kind() == ErrorKind::Interrupted => Ok(()),
            result => result,
        }
    }

    fn waker(&self) -> io::Result<Arc<dyn Wakeup>> {
        let waker: Arc<dyn Wakeup> = self.waker.clone();

        Ok(waker)
    }
}
