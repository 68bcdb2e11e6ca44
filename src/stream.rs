//! Message streams for streaming calls.
//!
//! A streaming call is one logical call carrying many messages each way.
//! The server end ([`ServerStream`]) is handed to the stream handler; the
//! client end ([`ClientStream`]) is returned from [`Client::open`]. When the
//! handler finishes, its result travels to the client as the stream's
//! terminal status, read after the last message.
//!
//! [`Client::open`]: crate::Client::open

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::status::Status;

type Terminal = Result<(), Status>;

/// Creates a connected stream pair with `capacity` messages of buffering
/// in each direction, plus the handle that delivers the terminal status.
pub(crate) fn pair(capacity: usize) -> (ClientStream, ServerStream, Trailer) {
    let (to_server, from_client) = mpsc::channel(capacity);
    let (to_client, from_server) = mpsc::channel(capacity);
    let (trailer_tx, trailer_rx) = oneshot::channel();

    let client = ClientStream {
        outgoing: Some(to_server),
        incoming: from_server,
        trailer: Some(trailer_rx),
    };
    let server = ServerStream { incoming: from_client, outgoing: to_client };
    (client, server, Trailer(trailer_tx))
}

/// Sends the terminal status of a stream exactly once.
pub(crate) struct Trailer(oneshot::Sender<Terminal>);

impl Trailer {
    /// A client that already went away is not an error.
    pub(crate) fn finish(self, result: Terminal) {
        let _ = self.0.send(result);
    }
}

// ── Server end ────────────────────────────────────────────────────────────────

/// The serving side of a streaming call.
pub struct ServerStream {
    incoming: mpsc::Receiver<Bytes>,
    outgoing: mpsc::Sender<Bytes>,
}

impl ServerStream {
    /// Next message from the client, `None` once the client closed its side.
    pub async fn message(&mut self) -> Option<Bytes> {
        self.incoming.recv().await
    }

    pub async fn send(&self, message: impl Into<Bytes>) -> Result<(), Status> {
        self.outgoing
            .send(message.into())
            .await
            .map_err(|_| Status::unavailable("client closed the stream"))
    }
}

// ── Client end ────────────────────────────────────────────────────────────────

/// The calling side of a streaming call.
pub struct ClientStream {
    outgoing: Option<mpsc::Sender<Bytes>>,
    incoming: mpsc::Receiver<Bytes>,
    trailer: Option<oneshot::Receiver<Terminal>>,
}

impl ClientStream {
    pub async fn send(&self, message: impl Into<Bytes>) -> Result<(), Status> {
        let Some(tx) = &self.outgoing else {
            return Err(Status::new(crate::Code::FailedPrecondition, "send after close_send"));
        };
        tx.send(message.into())
            .await
            .map_err(|_| Status::unavailable("server closed the stream"))
    }

    /// Signals the server that no more messages follow.
    pub fn close_send(&mut self) {
        self.outgoing = None;
    }

    /// Next message from the server.
    ///
    /// Returns `Ok(None)` when the server finished successfully and the
    /// handler's error once it failed; after that, `Ok(None)` forever.
    pub async fn message(&mut self) -> Result<Option<Bytes>, Status> {
        if let Some(message) = self.incoming.recv().await {
            return Ok(Some(message));
        }
        match self.trailer.take() {
            Some(rx) => match rx.await {
                Ok(terminal) => terminal.map(|()| None),
                Err(_) => Err(Status::internal("stream ended without a status")),
            },
            None => Ok(None),
        }
    }
}
