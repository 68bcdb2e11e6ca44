//! In-process test harness.
//!
//! [`Harness`] runs a real [`Server`] on an in-memory transport, so tests
//! exercise routing and both sides' middleware chains without a socket:
//!
//! ```rust
//! use bytes::Bytes;
//! use conduit::testing::Harness;
//! use conduit::{CallScope, Status};
//!
//! async fn echo(_: CallScope, req: Bytes) -> Result<Bytes, Status> { Ok(req) }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut harness = Harness::builder().build();
//! harness.register_service(|r| {
//!     r.unary("/echo.Echo/Say", echo);
//! })?;
//! harness.start()?;
//!
//! let res = harness.client().unary(CallScope::new("/echo.Echo/Say"), "hi").await?;
//! assert_eq!(res.payload(), "hi");
//!
//! harness.cleanup().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`MemorySink`] collects middleware events for assertions.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::client::Client;
use crate::error::Error;
use crate::middleware::sink::{AuditEntry, CallEvent, EventSink};
use crate::middleware::{Chain, ClientStreaming, ClientUnary, ServerStreaming, ServerUnary};
use crate::router::Router;
use crate::server::Server;
use crate::transport::Acceptor;
use crate::transport::memory::{self, MemoryAcceptor, MemoryTransport};

// ── MemorySink ────────────────────────────────────────────────────────────────

/// Event sink that keeps every event in memory. Clones share the buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<CallEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far, oldest first.
    pub fn events(&self) -> Vec<CallEvent> {
        self.events.lock().clone()
    }

    /// Only the audit records.
    pub fn audits(&self) -> Vec<AuditEntry> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CallEvent::Audit(entry) => Some(entry.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &CallEvent) {
        self.events.lock().push(event.clone());
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

/// Chains and options for a [`Harness`].
#[derive(Default)]
pub struct HarnessBuilder {
    server_unary: Chain<ServerUnary>,
    server_stream: Chain<ServerStreaming>,
    client_unary: Chain<ClientUnary>,
    client_stream: Chain<ClientStreaming>,
    health: bool,
}

impl HarnessBuilder {
    pub fn server_unary(mut self, chain: Chain<ServerUnary>) -> Self {
        self.server_unary = chain;
        self
    }

    pub fn server_stream(mut self, chain: Chain<ServerStreaming>) -> Self {
        self.server_stream = chain;
        self
    }

    pub fn client_unary(mut self, chain: Chain<ClientUnary>) -> Self {
        self.client_unary = chain;
        self
    }

    pub fn client_stream(mut self, chain: Chain<ClientStreaming>) -> Self {
        self.client_stream = chain;
        self
    }

    pub fn disable_health_check(mut self) -> Self {
        self.health = false;
        self
    }

    pub fn build(self) -> Harness {
        let (acceptor, transport) = memory::channel();
        Harness {
            pending: Some(Pending {
                router: Router::new(),
                server_unary: self.server_unary,
                server_stream: self.server_stream,
                health: self.health,
                acceptor,
            }),
            client_unary: self.client_unary,
            client_stream: self.client_stream,
            transport,
            running: None,
        }
    }
}

/// Server-side state before `start`.
struct Pending {
    router: Router,
    server_unary: Chain<ServerUnary>,
    server_stream: Chain<ServerStreaming>,
    health: bool,
    acceptor: MemoryAcceptor,
}

struct Running {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// An in-process server plus a client connected to it.
///
/// Lifecycle: [`register_service`](Self::register_service) any number of
/// times, [`start`](Self::start) once, make calls through
/// [`client`](Self::client), then [`cleanup`](Self::cleanup).
pub struct Harness {
    pending: Option<Pending>,
    client_unary: Chain<ClientUnary>,
    client_stream: Chain<ClientStreaming>,
    transport: MemoryTransport,
    running: Option<Running>,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder { health: true, ..HarnessBuilder::default() }
    }

    /// Registers a service's methods. Only allowed before [`start`](Self::start).
    pub fn register_service(&mut self, binder: impl FnOnce(&mut Router)) -> Result<(), Error> {
        let pending = self.pending.as_mut().ok_or(Error::AlreadyStarted)?;
        binder(&mut pending.router);
        Ok(())
    }

    /// Starts serving on a background task. Requires a tokio runtime.
    pub fn start(&mut self) -> Result<(), Error> {
        let pending = self.pending.take().ok_or(Error::AlreadyStarted)?;

        let mut builder = Server::builder()
            .router(pending.router)
            .unary_chain(pending.server_unary)
            .stream_chain(pending.server_stream);
        if !pending.health {
            builder = builder.disable_health_check();
        }
        let server = builder.build();

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();
        let acceptor = pending.acceptor;
        let task = tokio::spawn(async move { server.serve_with_shutdown(acceptor, signal).await });

        self.running = Some(Running { shutdown, task });
        debug!(peer = %self.transport.peer(), "harness started");
        Ok(())
    }

    /// A client on the in-memory transport, with the configured client chains.
    pub fn client(&self) -> Client {
        Client::new(self.transport.clone())
            .with_unary_chain(self.client_unary.clone())
            .with_stream_chain(self.client_stream.clone())
    }

    /// Stops the server: no new calls are taken, in-flight calls finish, and
    /// the transport is closed before this returns. Later calls from any
    /// client of this harness fail with `Unavailable`.
    ///
    /// Calling it again, or before `start`, is harmless.
    pub async fn cleanup(&mut self) {
        // never started: dropping the acceptor closes the transport
        if let Some(mut pending) = self.pending.take() {
            pending.acceptor.close();
        }

        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
            if let Err(e) = running.task.await {
                error!("harness server task failed: {e}");
            }
            debug!("harness stopped");
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}
