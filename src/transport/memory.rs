//! In-process transport.
//!
//! Client and server live in the same process and exchange calls over a
//! bounded channel. There is no framing and no serialisation: payloads and
//! metadata are handed over as they are, which keeps tests fast and
//! deterministic while still exercising every middleware chain.
//!
//! ```rust
//! use conduit::transport::memory;
//!
//! let (acceptor, transport) = memory::channel();
//! // Server::serve(acceptor) on one side, Client::new(transport) on the other.
//! # drop((acceptor, transport));
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{Acceptor, Incoming, IncomingCall, Transport};
use crate::response::Response;
use crate::scope::CallScope;
use crate::status::Status;
use crate::stream::{self, ClientStream};

/// Calls queued between client and server before `send` waits.
pub const DEFAULT_CALL_CAPACITY: usize = 64;

/// Messages buffered in each direction of a streaming call.
pub const DEFAULT_STREAM_CAPACITY: usize = 16;

// every channel gets its own loopback peer so peers are distinguishable
static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(0);

const FIRST_PORT: u16 = 40000;
const PORTS: u64 = (u16::MAX - FIRST_PORT) as u64 + 1;

/// A connected acceptor/transport pair with default capacities.
pub fn channel() -> (MemoryAcceptor, MemoryTransport) {
    with_capacity(DEFAULT_CALL_CAPACITY, DEFAULT_STREAM_CAPACITY)
}

pub fn with_capacity(calls: usize, stream_messages: usize) -> (MemoryAcceptor, MemoryTransport) {
    let (tx, rx) = mpsc::channel(calls);
    let peer = synthetic_peer(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed));

    let acceptor = MemoryAcceptor { calls: rx };
    let transport = MemoryTransport { calls: tx, peer, stream_capacity: stream_messages };
    (acceptor, transport)
}

/// Ports cycle through `40000..=65535`; each full cycle moves to the next
/// address in `127.0.0.0/8`, starting at `127.0.0.1`.
fn synthetic_peer(channel: u64) -> SocketAddr {
    let port = FIRST_PORT + (channel % PORTS) as u16;
    let host = u32::from(Ipv4Addr::LOCALHOST).wrapping_add((channel / PORTS) as u32) & 0x00ff_ffff;
    SocketAddr::from((Ipv4Addr::from(0x7f00_0000 | host), port))
}

// ── Server end ────────────────────────────────────────────────────────────────

pub struct MemoryAcceptor {
    calls: mpsc::Receiver<Incoming>,
}

#[async_trait]
impl Acceptor for MemoryAcceptor {
    async fn accept(&mut self) -> Option<Incoming> {
        self.calls.recv().await
    }

    fn close(&mut self) {
        self.calls.close();
    }
}

// ── Client end ────────────────────────────────────────────────────────────────

/// Client end of an in-memory channel. Cheap to clone; clones share the
/// channel and report the same peer address to the server.
#[derive(Clone)]
pub struct MemoryTransport {
    calls: mpsc::Sender<Incoming>,
    peer: SocketAddr,
    stream_capacity: usize,
}

impl MemoryTransport {
    /// Address the server sees as this client's peer.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The scope the server runs the call under.
    ///
    /// Cancels with the client scope, carries its deadline and idempotency
    /// key, and sees the client's outbound metadata as inbound.
    fn server_scope(&self, scope: &CallScope) -> CallScope {
        let mut server = CallScope::new(scope.method())
            .with_token(scope.token().child_token())
            .with_inbound(scope.outbound().clone())
            .with_peer(self.peer);
        if let Some(key) = scope.idempotency_key() {
            server = server.with_idempotency_key(key);
        }
        match scope.deadline() {
            Some(deadline) => server.with_deadline(deadline),
            None => server,
        }
    }

    async fn deliver(&self, incoming: Incoming) -> Result<(), Status> {
        self.calls
            .send(incoming)
            .await
            .map_err(|_| Status::unavailable("transport is closing"))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn unary(&self, scope: CallScope, request: Bytes) -> Result<Response, Status> {
        let server_scope = self.server_scope(&scope);
        // dropping this call future before an answer cancels the server side
        let abandon = server_scope.token().clone().drop_guard();

        let (reply, answer) = oneshot::channel();
        let incoming = Incoming { scope: server_scope, call: IncomingCall::Unary { request, reply } };

        let result = tokio::select! {
            biased;
            err = scope.done() => Err(err.into()),
            sent = self.deliver(incoming) => match sent {
                Ok(()) => tokio::select! {
                    biased;
                    err = scope.done() => Err(err.into()),
                    answer = answer => answer.unwrap_or_else(|_| {
                        debug!(method = %scope.method(), "call ended without an answer");
                        Err(Status::internal("call ended without an answer"))
                    }),
                },
                Err(status) => Err(status),
            },
        };

        let _ = abandon.disarm();
        result
    }

    async fn open(&self, scope: CallScope) -> Result<ClientStream, Status> {
        let (client, server, trailer) = stream::pair(self.stream_capacity);
        let incoming = Incoming {
            scope: self.server_scope(&scope),
            call: IncomingCall::Stream { stream: server, trailer },
        };

        tokio::select! {
            biased;
            err = scope.done() => Err(err.into()),
            sent = self.deliver(incoming) => sent.map(|()| client),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::status::Code;

    #[test]
    fn synthetic_peers_do_not_repeat_when_ports_run_out() {
        assert_eq!(synthetic_peer(0), "127.0.0.1:40000".parse().unwrap());
        assert_eq!(synthetic_peer(PORTS - 1), "127.0.0.1:65535".parse().unwrap());
        assert_eq!(synthetic_peer(PORTS), "127.0.0.2:40000".parse().unwrap());

        let peers: std::collections::HashSet<_> = (PORTS - 10..PORTS + 10).map(synthetic_peer).collect();
        assert_eq!(peers.len(), 20);
        assert!(peers.iter().all(|p| p.port() >= FIRST_PORT));
    }

    #[tokio::test]
    async fn server_scope_mirrors_client_scope() {
        let (mut acceptor, transport) = channel();

        let mut scope = CallScope::new("/s.S/M")
            .with_timeout(Duration::from_secs(30))
            .with_idempotency_key("k-1");
        scope.outbound_mut().insert("traceid", "t-1").unwrap();
        let deadline = scope.deadline();

        let call = tokio::spawn(async move { transport.unary(scope, Bytes::from("req")).await });

        let incoming = acceptor.accept().await.unwrap();
        assert_eq!(incoming.scope().method(), "/s.S/M");
        assert_eq!(incoming.scope().deadline(), deadline);
        assert_eq!(incoming.scope().inbound().and_then(|m| m.get("traceid")), Some("t-1"));
        assert!(incoming.scope().peer().is_some());
        assert_eq!(incoming.scope().idempotency_key(), Some("k-1"));

        incoming.reject(Status::not_found("no such thing"));
        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn closed_acceptor_is_unavailable() {
        let (mut acceptor, transport) = channel();
        acceptor.close();

        let err = transport.unary(CallScope::new("/s.S/M"), Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert!(acceptor.accept().await.is_none());
    }

    #[tokio::test]
    async fn client_cancel_reaches_server() {
        let (mut acceptor, transport) = channel();
        let scope = CallScope::new("/s.S/M");
        let canceler = scope.clone();

        let call = tokio::spawn(async move { transport.unary(scope, Bytes::new()).await });
        let incoming = acceptor.accept().await.unwrap();

        canceler.cancel();
        assert_eq!(incoming.scope().done().await, crate::scope::ScopeError::Canceled);
        assert_eq!(call.await.unwrap().unwrap_err().code(), Code::Canceled);
    }

    #[test]
    fn each_channel_has_its_own_peer() {
        let (_a, one) = channel();
        let (_b, two) = channel();
        assert_ne!(one.peer(), two.peer());
    }
}
