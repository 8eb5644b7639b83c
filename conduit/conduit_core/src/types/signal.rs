//! Asynchronous notifications.
//!
//! A signal carries no payload. Submitting a signal that has not been
//! consumed yet has no additional effect, so a receiver wakes up at most
//! once per batch of submissions.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::fmt;

use crate::id::SignalId;

/// The sending side of a signal context.
#[derive(Clone)]
pub struct SignalHandler {
    id: SignalId,
    sender: Sender<()>,
}

impl SignalHandler {
    /// Id of the signal context.
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Submit a signal.
    pub fn submit(&self) {
        // A full channel means a signal is already pending.
        let _ = self.sender.try_send(());
    }
}

impl PartialEq for SignalHandler {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SignalHandler {}

impl fmt::Debug for SignalHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalHandler").field("id", &self.id).finish()
    }
}

/// The receiving side of a signal context.
pub struct SignalReceiver {
    id: SignalId,
    receiver: Receiver<()>,
}

impl SignalReceiver {
    /// Id of the signal context.
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Block until a signal arrives.
    ///
    /// Returns immediately if all handlers are gone.
    pub fn wait(&self) {
        let _ = self.receiver.recv();
    }

    /// Consume a pending signal without blocking.
    pub fn pending(&self) -> bool {
        match self.receiver.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }
}

impl fmt::Debug for SignalReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalReceiver").field("id", &self.id).finish()
    }
}

/// Create a signal context.
pub fn signal_context() -> (SignalHandler, SignalReceiver) {
    let id = SignalId::new();
    let (sender, receiver) = bounded(1);
    (SignalHandler { id, sender }, SignalReceiver { id, receiver })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_coalesce() {
        let (handler, receiver) = signal_context();
        handler.submit();
        handler.submit();

        assert!(receiver.pending());
        assert!(!receiver.pending());
    }

    #[test]
    fn test_wait_returns_once_handlers_are_gone() {
        let (handler, receiver) = signal_context();
        drop(handler);
        receiver.wait();
        assert!(!receiver.pending());
    }

    #[test]
    fn test_wait_across_threads() {
        let (handler, receiver) = signal_context();
        let sender = std::thread::spawn(move || handler.submit());
        receiver.wait();
        sender.join().unwrap();
    }
}
