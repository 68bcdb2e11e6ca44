//! The seam between calls and whatever carries them.
//!
//! A [`Transport`] is the client end: it delivers one call to a server and
//! brings back the outcome. An [`Acceptor`] is the server end: it yields
//! [`Incoming`] calls for [`Server::serve`](crate::Server::serve) to run.
//!
//! Wire framing is out of scope. The in-process [`memory`] transport is the
//! one shipped implementation and is what the test
//! [`Harness`](crate::testing::Harness) runs on.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::middleware::{ClientStreaming, ClientUnary, Endpoint, Outcome};
use crate::response::Response;
use crate::scope::CallScope;
use crate::status::Status;
use crate::stream::{ClientStream, ServerStream, Trailer};

/// Carries calls from a client to a server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one request and waits for the response or the scope to finish.
    async fn unary(&self, scope: CallScope, request: Bytes) -> Result<Response, Status>;

    /// Opens a streaming call. Returns as soon as the server has the call.
    async fn open(&self, scope: CallScope) -> Result<ClientStream, Status>;
}

/// Hands calls to a server.
#[async_trait]
pub trait Acceptor: Send + 'static {
    /// Next call, `None` once the acceptor is closed and drained.
    async fn accept(&mut self) -> Option<Incoming>;

    /// Stops taking new calls. Calls already queued are still returned by
    /// [`accept`](Self::accept).
    fn close(&mut self);
}

/// One call as received by the server: its scope plus the way back.
pub struct Incoming {
    pub(crate) scope: CallScope,
    pub(crate) call: IncomingCall,
}

pub(crate) enum IncomingCall {
    Unary { request: Bytes, reply: oneshot::Sender<Result<Response, Status>> },
    Stream { stream: ServerStream, trailer: Trailer },
}

impl Incoming {
    pub fn scope(&self) -> &CallScope {
        &self.scope
    }

    /// Answers the call with `status` without running it.
    pub fn reject(self, status: Status) {
        match self.call {
            IncomingCall::Unary { reply, .. } => {
                let _ = reply.send(Err(status));
            }
            IncomingCall::Stream { trailer, .. } => trailer.finish(Err(status)),
        }
    }
}

// ── Chain terminal ────────────────────────────────────────────────────────────

/// The network invocation at the end of every client chain.
pub(crate) struct Invoke<'t>(pub(crate) &'t dyn Transport);

impl Endpoint<ClientUnary> for Invoke<'_> {
    fn invoke(&self, scope: CallScope, request: Bytes) -> BoxFuture<'_, Outcome<ClientUnary>> {
        self.0.unary(scope, request)
    }
}

impl Endpoint<ClientStreaming> for Invoke<'_> {
    fn invoke(&self, scope: CallScope, (): ()) -> BoxFuture<'_, Outcome<ClientStreaming>> {
        self.0.open(scope)
    }
}
