//! Call server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately closing the acceptor: no new calls are taken, and calls
//!    still queued are answered with `Unavailable`.
//! 2. Letting every in-flight call run to completion.
//! 3. Returning from [`Server::serve`], which lets `main` exit cleanly.
//!
//! Set `terminationGracePeriodSeconds` in your pod spec to a value longer
//! than your slowest call.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{self, BoxFuture};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::health::{self, HEALTH_CHECK_METHOD};
use crate::middleware::{Chain, Endpoint, Outcome, ServerStreaming, ServerUnary};
use crate::response::Response;
use crate::router::{Route, Router};
use crate::scope::CallScope;
use crate::status::Status;
use crate::stream::ServerStream;
use crate::transport::{Acceptor, Incoming, IncomingCall};

/// Serves registered methods through the server chains.
///
/// Cheap to clone; clones share routes and chains.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    router: Router,
    unary: Chain<ServerUnary>,
    stream: Chain<ServerStreaming>,
}

/// Configures a [`Server`].
///
/// ```rust
/// # use bytes::Bytes;
/// # use conduit::{CallScope, Status};
/// use conduit::Server;
/// use conduit::middleware::defaults::Defaults;
///
/// # async fn say_hello(_: CallScope, _: Bytes) -> Result<&'static str, Status> { Ok("hi") }
/// # fn build() -> Result<Server, conduit::Error> {
/// let defaults = Defaults::new();
/// let server = Server::builder()
///     .unary_chain(defaults.server()?)
///     .stream_chain(defaults.server()?)
///     .service(|r| {
///         r.unary("/helloworld.Greeter/SayHello", say_hello);
///     })
///     .build();
/// # Ok(server)
/// # }
/// ```
pub struct ServerBuilder {
    router: Router,
    unary: Chain<ServerUnary>,
    stream: Chain<ServerStreaming>,
    health: bool,
}

impl ServerBuilder {
    pub fn unary_chain(mut self, chain: Chain<ServerUnary>) -> Self {
        self.unary = chain;
        self
    }

    pub fn stream_chain(mut self, chain: Chain<ServerStreaming>) -> Self {
        self.stream = chain;
        self
    }

    /// Registers one service's methods.
    pub fn service(mut self, binder: impl FnOnce(&mut Router)) -> Self {
        binder(&mut self.router);
        self
    }

    /// Replaces the routes registered so far with `router`.
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Leaves [`HEALTH_CHECK_METHOD`] unregistered, e.g. to register your own.
    pub fn disable_health_check(mut self) -> Self {
        self.health = false;
        self
    }

    pub fn build(self) -> Server {
        let mut router = self.router;
        if self.health && router.lookup(HEALTH_CHECK_METHOD).is_none() {
            router.unary(HEALTH_CHECK_METHOD, health::check);
        }

        Server {
            inner: Arc::new(Inner { router, unary: self.unary, stream: self.stream }),
        }
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            router: Router::new(),
            unary: Chain::empty(),
            stream: Chain::empty(),
            health: true,
        }
    }

    /// Runs one unary call through the unary chain.
    ///
    /// Unknown methods still pass through the chain and end in
    /// `Unimplemented`, so they are audited like any other call.
    pub async fn unary(&self, scope: CallScope, request: Bytes) -> Result<Response, Status> {
        let endpoint = UnaryEndpoint(self.inner.router.lookup(scope.method()));
        self.inner.unary.call(scope, request, &endpoint).await
    }

    /// Runs one streaming call through the streaming chain.
    pub async fn stream(&self, scope: CallScope, stream: ServerStream) -> Result<(), Status> {
        let endpoint = StreamEndpoint(self.inner.router.lookup(scope.method()));
        self.inner.stream.call(scope, stream, &endpoint).await
    }

    /// Serves calls from `acceptor` until SIGTERM or Ctrl-C.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(&self, acceptor: impl Acceptor) {
        self.serve_with_shutdown(acceptor, shutdown_signal()).await;
    }

    /// Serves calls from `acceptor` until `shutdown` resolves or the
    /// acceptor runs dry, then drains in-flight calls.
    pub async fn serve_with_shutdown<A, F>(&self, mut acceptor: A, shutdown: F)
    where
        A: Acceptor,
        F: Future<Output = ()> + Send,
    {
        info!("conduit serving");

        // every spawned call, so shutdown can wait for them
        let mut tasks = JoinSet::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // shutdown first: a signal stops intake even while calls are queued
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining calls");
                    break;
                }

                incoming = acceptor.accept() => {
                    let Some(incoming) = incoming else {
                        info!(in_flight = tasks.len(), "acceptor closed, draining calls");
                        break;
                    };
                    let server = self.clone();
                    tasks.spawn(async move { server.handle(incoming).await });
                }

                // reap finished calls so the set does not grow without bound
                Some(res) = tasks.join_next(), if !tasks.is_empty() => reap(res),
            }
        }

        acceptor.close();
        while let Some(incoming) = acceptor.accept().await {
            incoming.reject(Status::unavailable("server is shutting down"));
        }

        while let Some(res) = tasks.join_next().await {
            reap(res);
        }

        info!("conduit stopped");
    }

    async fn handle(&self, incoming: Incoming) {
        let Incoming { scope, call } = incoming;
        debug!(method = %scope.method(), "call accepted");

        match call {
            IncomingCall::Unary { request, reply } => {
                let result = self.unary(scope, request).await;
                // the caller may have given up already
                let _ = reply.send(result);
            }
            IncomingCall::Stream { stream, trailer } => {
                let result = self.stream(scope, stream).await;
                trailer.finish(result);
            }
        }
    }
}

fn reap(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        error!("call task failed: {e}");
    }
}

// ── Route endpoints ───────────────────────────────────────────────────────────

struct UnaryEndpoint(Option<Route>);

impl Endpoint<ServerUnary> for UnaryEndpoint {
    fn invoke(&self, scope: CallScope, request: Bytes) -> BoxFuture<'_, Outcome<ServerUnary>> {
        match &self.0 {
            Some(Route::Unary(handler)) => handler.call(scope, request),
            _ => Box::pin(future::ready(Err::<Response, _>(unimplemented(&scope)))),
        }
    }
}

struct StreamEndpoint(Option<Route>);

impl Endpoint<ServerStreaming> for StreamEndpoint {
    fn invoke(&self, scope: CallScope, stream: ServerStream) -> BoxFuture<'_, Outcome<ServerStreaming>> {
        match &self.0 {
            Some(Route::Stream(handler)) => handler.call(scope, stream),
            _ => Box::pin(future::ready(Err::<(), _>(unimplemented(&scope)))),
        }
    }
}

fn unimplemented(scope: &CallScope) -> Status {
    Status::unimplemented(format!("unknown method {}", scope.method()))
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available. A signal that cannot be installed
/// is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;

    async fn greet(scope: CallScope, request: Bytes) -> Result<String, Status> {
        let name = String::from_utf8_lossy(&request).into_owned();
        Ok(format!("hello {name} from {}", scope.method()))
    }

    #[tokio::test]
    async fn routes_unary_calls() {
        let server = Server::builder()
            .service(|r| {
                r.unary("/helloworld.Greeter/SayHello", greet);
            })
            .build();

        let res = server
            .unary(CallScope::new("/helloworld.Greeter/SayHello"), Bytes::from("bob"))
            .await
            .unwrap();
        assert_eq!(res.payload(), "hello bob from /helloworld.Greeter/SayHello");

        let err = server.unary(CallScope::new("/helloworld.Greeter/Nope"), Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[tokio::test]
    async fn health_check_is_registered_unless_disabled() {
        let server = Server::builder().build();
        let res = server.unary(CallScope::new(HEALTH_CHECK_METHOD), Bytes::new()).await.unwrap();
        assert_eq!(res.payload(), health::SERVING);

        let server = Server::builder().disable_health_check().build();
        let err = server.unary(CallScope::new(HEALTH_CHECK_METHOD), Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[tokio::test]
    async fn stream_route_is_not_callable_as_unary() {
        async fn sink(_: CallScope, _: ServerStream) -> Result<(), Status> { Ok(()) }

        let server = Server::builder()
            .service(|r| {
                r.stream("/s.S/Sink", sink);
            })
            .build();

        let err = server.unary(CallScope::new("/s.S/Sink"), Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }
}
