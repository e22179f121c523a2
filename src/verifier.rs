//! Signature verification of signed messages.

use std::fmt::Debug;
use std::thread::{self, JoinHandle};

use ed25519_dalek::VerifyingKey;
use tracing::{debug, error};

use crate::common::Message;

/// Called exactly once with the message and whether its signature is valid.
pub type VerifyCallback = Box<dyn FnOnce(Message, bool) + Send>;

/// Checks signed messages off the reactor thread.
pub trait SecurityVerifier: Send + Debug {
    /// Must call `callback` exactly once, and must not block the caller.
    fn verify(&mut self, message: Message, callback: VerifyCallback);
}

type Job = (Message, VerifyCallback);

#[derive(Debug)]
/// Verifies ed25519 signatures against a single key, on a dedicated thread.
pub struct Ed25519Verifier {
    sender: Option<flume::Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl Ed25519Verifier {
    pub fn new(key: VerifyingKey) -> std::io::Result<Self> {
        let (sender, receiver) = flume::unbounded::<Job>();

        let handle = thread::Builder::new()
            .name("dht-verifier".to_string())
            .spawn(move || {
                for (message, callback) in receiver.iter() {
                    let valid = message.verify_signature(&key);
                    callback(message, valid);
                }
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

impl SecurityVerifier for Ed25519Verifier {
    fn verify(&mut self, message: Message, callback: VerifyCallback) {
        let Some(sender) = &self.sender else {
            callback(message, false);
            return;
        };

        if let Err(flume::SendError((message, callback))) = sender.send((message, callback)) {
            error!(context = "verifier", "Verifier thread is gone");
            callback(message, false);
        }
    }
}

impl Drop for Ed25519Verifier {
    fn drop(&mut self) {
        self.sender.take();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!(context = "verifier", "Verifier thread panicked");
            }
        }
    }
}
