//! Single-slot, first-writer-wins outcome buffer.

use tokio::sync::mpsc::{self, error::TrySendError};

use super::Connection;
use crate::error::DialError;

pub(crate) type Outcome = Result<Connection, DialError>;

pub(crate) fn channel() -> (ResultSlot, OutcomeReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (ResultSlot(tx), OutcomeReceiver(rx))
}

/// Writer end. Never blocks.
#[derive(Clone)]
pub(crate) struct ResultSlot(mpsc::Sender<Outcome>);

impl ResultSlot {
    /// Stores `outcome` if the slot is empty and still read. Returns whether
    /// it was stored; a rejected outcome is dropped here.
    pub(crate) fn offer(&self, outcome: Outcome) -> bool {
        match self.0.try_send(outcome) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Closed(_)) => false,
        }
    }
}

pub(crate) struct OutcomeReceiver(mpsc::Receiver<Outcome>);

impl OutcomeReceiver {
    /// The stored outcome; `None` if every writer went away without one.
    pub(crate) async fn recv(&mut self) -> Option<Outcome> {
        self.0.recv().await
    }
}
