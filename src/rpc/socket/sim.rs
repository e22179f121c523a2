//! In-process datagram network, for deterministic tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use bytes::Bytes;

use super::{Transport, Wakeup};

static NETWORK: OnceLock<Mutex<HashMap<SocketAddr, Arc<Mailbox>>>> = OnceLock::new();

fn network() -> MutexGuard<'static, HashMap<SocketAddr, Arc<Mailbox>>> {
    NETWORK
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct Mailbox {
    state: Mutex<MailboxState>,
    ready: Condvar,
}

#[derive(Debug, Default)]
struct MailboxState {
    queue: VecDeque<(Bytes, SocketAddr)>,
    woken: bool,
    block_writes: bool,
    failing: HashSet<SocketAddr>,
    sent: usize,
}

impl Mailbox {
    fn state(&self) -> MutexGuard<'_, MailboxState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug)]
/// A simulated UDP socket, registered in a process wide network until dropped.
pub struct SimUdp {
    address: SocketAddr,
    mailbox: Arc<Mailbox>,
}

impl SimUdp {
    /// Fails with [io::ErrorKind::AddrInUse] if `address` is taken.
    pub fn bind(address: SocketAddr) -> io::Result<SimUdp> {
        let mut network = network();

        if network.contains_key(&address) {
            return Err(io::ErrorKind::AddrInUse.into());
        }

        let mailbox = Arc::new(Mailbox::default());
        network.insert(address, mailbox.clone());

        Ok(SimUdp { address, mailbox })
    }

    /// Returns a handle to inject faults into this socket.
    pub fn control(&self) -> SimControl {
        SimControl {
            mailbox: self.mailbox.clone(),
        }
    }
}

impl Drop for SimUdp {
    fn drop(&mut self) {
        let mut network = network();

        if let Some(mailbox) = network.get(&self.address) {
            if Arc::ptr_eq(mailbox, &self.mailbox) {
                network.remove(&self.address);
            }
        }
    }
}

impl Transport for SimUdp {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.address)
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let Some((datagram, from)) = self.mailbox.state().queue.pop_front() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };

        // Truncated like a real datagram socket.
        let size = datagram.len().min(buf.len());
        buf[..size].copy_from_slice(&datagram[..size]);

        Ok((size, from))
    }

    fn send_to(&mut self, buf: &[u8], address: SocketAddr) -> io::Result<usize> {
        {
            let mut state = self.mailbox.state();

            if state.block_writes {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            if state.failing.contains(&address) {
                return Err(io::ErrorKind::ConnectionRefused.into());
            }

            state.sent += 1;
        }

        let target = network().get(&address).cloned();

        // Datagrams to unbound addresses are lost.
        if let Some(mailbox) = target {
            mailbox
                .state()
                .queue
                .push_back((Bytes::copy_from_slice(buf), self.address));
            mailbox.ready.notify_all();
        }

        Ok(buf.len())
    }

    fn wait(&mut self, write_interest: bool, timeout: Duration) -> io::Result<()> {
        let state = self.mailbox.state();

        let (mut state, _) = self
            .mailbox
            .ready
            .wait_timeout_while(state, timeout, |state| {
                state.queue.is_empty()
                    && !state.woken
                    && !(write_interest && !state.block_writes)
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        state.woken = false;

        Ok(())
    }

    fn waker(&self) -> io::Result<Arc<dyn Wakeup>> {
        let waker: Arc<dyn Wakeup> = Arc::new(SimWaker {
            mailbox: self.mailbox.clone(),
        });

        Ok(waker)
    }
}

#[derive(Debug)]
struct SimWaker {
    mailbox: Arc<Mailbox>,
}

impl Wakeup for SimWaker {
    fn wake(&self) -> io::Result<()> {
        self.mailbox.state().woken = true;
        self.mailbox.ready.notify_all();

        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Fault injection for a [SimUdp].
pub struct SimControl {
    mailbox: Arc<Mailbox>,
}

impl SimControl {
    /// While set, every send fails with [io::ErrorKind::WouldBlock].
    pub fn block_writes(&self, block: bool) {
        self.mailbox.state().block_writes = block;
        self.mailbox.ready.notify_all();
    }

    /// Every send to `address` fails with [io::ErrorKind::ConnectionRefused].
    pub fn fail_destination(&self, address: SocketAddr) {
        self.mailbox.state().failing.insert(address);
    }

    /// Number of datagrams successfully sent.
    pub fn sent(&self) -> usize {
        self.mailbox.state().sent
    }

    /// Number of datagrams waiting to be received.
    pub fn pending(&self) -> usize {
        self.mailbox.state().queue.len()
    }
}
