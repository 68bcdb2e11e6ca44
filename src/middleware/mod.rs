//! Middleware layer.
//!
//! Middleware wraps calls and is the right place for cross-cutting concerns:
//! authentication, auditing, timeout and cancellation logging, panic
//! recovery and header propagation.
//!
//! # Call kinds
//!
//! There are four kinds of call, one marker type each:
//!
//! | Kind | Input | Output |
//! |---|---|---|
//! | [`ClientUnary`] | request payload | [`Response`] |
//! | [`ClientStreaming`] | `()` | [`ClientStream`] |
//! | [`ServerUnary`] | request payload | [`Response`] |
//! | [`ServerStreaming`] | [`ServerStream`] | `()` |
//!
//! A unit implements [`Middleware<K>`] for the kinds it makes sense on, so a
//! server-only unit such as [`Audit`](audit::Audit) cannot end up in a client
//! chain.
//!
//! # Ordering
//!
//! A [`Chain`] is declared in *layering* order: every listed unit wraps the
//! units listed before it, and the first listed unit sits directly around the
//! terminal handler.
//!
//! ```text
//! Chain::builder().layer(auth).layer(audit).layer(recover).build()
//!
//!   recover ─▶ audit ─▶ auth ─▶ handler
//!   recover ◀─ audit ◀─ auth ◀─ handler
//! ```
//!
//! The last listed unit is entered first and exited last. That is why
//! [`RecoverPanics`](recovery::RecoverPanics) must be listed last, and why
//! [`Audit`](audit::Audit) listed after [`Authenticate`](auth::Authenticate)
//! still records calls that authentication rejected.

pub mod audit;
pub mod auth;
pub mod canceled;
pub mod defaults;
pub mod hostname;
pub mod propagate;
pub mod recovery;
pub mod sink;
pub mod timeout;

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::Error;
use crate::response::Response;
use crate::scope::CallScope;
use crate::status::Status;
use crate::stream::{ClientStream, ServerStream};

// ── Call kinds ────────────────────────────────────────────────────────────────

/// What a chain carries in and out of each unit.
pub trait CallKind: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;
}

/// Kinds that run on the serving side of a connection.
pub trait ServerSide: CallKind {}

/// Kinds that run on the calling side of a connection.
pub trait ClientSide: CallKind {}

/// Result of running a chain of kind `K`.
pub type Outcome<K> = Result<<K as CallKind>::Output, Status>;

pub enum ClientUnary {}
pub enum ClientStreaming {}
pub enum ServerUnary {}
pub enum ServerStreaming {}

impl CallKind for ClientUnary {
    type Input = Bytes;
    type Output = Response;
}

impl CallKind for ClientStreaming {
    type Input = ();
    type Output = ClientStream;
}

impl CallKind for ServerUnary {
    type Input = Bytes;
    type Output = Response;
}

impl CallKind for ServerStreaming {
    type Input = ServerStream;
    type Output = ();
}

impl ClientSide for ClientUnary {}
impl ClientSide for ClientStreaming {}
impl ServerSide for ServerUnary {}
impl ServerSide for ServerStreaming {}

// ── Middleware ────────────────────────────────────────────────────────────────

/// Where a unit may sit in a chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placement {
    Anywhere,
    /// Must be the last listed layer, i.e. the first one entered.
    Outermost,
}

/// One cross-cutting behavior wrapped around calls of kind `K`.
///
/// Units are built once and shared by every concurrent call, so they hold
/// only what was injected at construction (a sink, a config) and no per-call
/// state. A unit either calls `next.run(..)` exactly once or short-circuits
/// with an error.
pub trait Middleware<K: CallKind>: Send + Sync + 'static {
    fn call<'a>(&'a self, scope: CallScope, input: K::Input, next: Next<'a, K>) -> BoxFuture<'a, Outcome<K>>;

    /// Short name used in logs and chain validation errors.
    fn name(&self) -> &'static str;

    fn placement(&self) -> Placement {
        Placement::Anywhere
    }
}

/// The terminal of a chain: the RPC implementation on the server side, the
/// network invocation on the client side.
pub trait Endpoint<K: CallKind>: Send + Sync {
    fn invoke(&self, scope: CallScope, input: K::Input) -> BoxFuture<'_, Outcome<K>>;
}

/// The rest of the chain, as seen from inside one unit.
pub struct Next<'a, K: CallKind> {
    rest: &'a [Arc<dyn Middleware<K>>],
    endpoint: &'a dyn Endpoint<K>,
}

impl<'a, K: CallKind> Next<'a, K> {
    /// Hands the call to the next unit, or to the endpoint after the last one.
    pub fn run(self, scope: CallScope, input: K::Input) -> BoxFuture<'a, Outcome<K>> {
        match self.rest.split_first() {
            Some((unit, rest)) => unit.call(scope, input, Next { rest, endpoint: self.endpoint }),
            None => self.endpoint.invoke(scope, input),
        }
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// An immutable, compiled sequence of units.
///
/// Cloning is one atomic increment; every clone runs the same units in the
/// same order.
pub struct Chain<K: CallKind> {
    // outermost first
    units: Arc<[Arc<dyn Middleware<K>>]>,
}

impl<K: CallKind> Chain<K> {
    pub fn builder() -> ChainBuilder<K> {
        ChainBuilder { layers: Vec::new() }
    }

    /// A chain with no units: calls go straight to the endpoint.
    pub fn empty() -> Self {
        Self { units: Arc::from(Vec::new()) }
    }

    /// Runs one call through every unit and then `endpoint`.
    pub fn call<'a>(
        &'a self,
        scope: CallScope,
        input: K::Input,
        endpoint: &'a dyn Endpoint<K>,
    ) -> BoxFuture<'a, Outcome<K>> {
        Next { rest: &self.units, endpoint }.run(scope, input)
    }

    /// Unit names in the order a call enters them.
    pub fn names(&self) -> Vec<&'static str> {
        self.units.iter().map(|u| u.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl<K: CallKind> Clone for Chain<K> {
    fn clone(&self) -> Self {
        Self { units: Arc::clone(&self.units) }
    }
}

impl<K: CallKind> Default for Chain<K> {
    fn default() -> Self { Self::empty() }
}

/// Collects units in layering order and validates them into a [`Chain`].
pub struct ChainBuilder<K: CallKind> {
    layers: Vec<Arc<dyn Middleware<K>>>,
}

impl<K: CallKind> ChainBuilder<K> {
    /// Wraps everything layered so far in `unit`.
    pub fn layer(self, unit: impl Middleware<K>) -> Self {
        self.layer_shared(Arc::new(unit))
    }

    /// Like [`layer`](Self::layer) for a unit shared with other chains.
    pub fn layer_shared(mut self, unit: Arc<dyn Middleware<K>>) -> Self {
        self.layers.push(unit);
        self
    }

    /// Compiles the chain.
    ///
    /// Fails when a unit that must be outermost is not the last listed one,
    /// which also rejects two such units in one chain.
    pub fn build(self) -> Result<Chain<K>, Error> {
        let count = self.layers.len();
        for (i, unit) in self.layers.iter().enumerate() {
            if unit.placement() == Placement::Outermost && i + 1 != count {
                return Err(Error::Chain(format!(
                    "`{}` must be the last listed layer, found at position {} of {count}",
                    unit.name(),
                    i + 1,
                )));
            }
        }

        let mut units = self.layers;
        units.reverse();
        Ok(Chain { units: Arc::from(units) })
    }
}

// ── Closure endpoints ─────────────────────────────────────────────────────────

/// Endpoint backed by a closure; see [`endpoint_fn`].
pub struct EndpointFn<K, F> {
    f: F,
    kind: PhantomData<fn() -> K>,
}

/// Turns an async closure into an [`Endpoint`], mostly for driving a chain
/// directly in tests.
///
/// ```rust
/// # use bytes::Bytes;
/// use conduit::middleware::{Chain, ServerUnary, endpoint_fn};
/// use conduit::{CallScope, Response};
///
/// # async fn run() {
/// let chain = Chain::<ServerUnary>::empty();
/// let echo = endpoint_fn::<ServerUnary, _, _>(|_scope: CallScope, req: Bytes| async move { Ok(Response::new(req)) });
/// let res = chain.call(CallScope::new("/echo.Echo/Say"), Bytes::from("hi"), &echo).await;
/// # }
/// ```
pub fn endpoint_fn<K, F, Fut>(f: F) -> EndpointFn<K, F>
where
    K: CallKind,
    F: Fn(CallScope, K::Input) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome<K>> + Send + 'static,
{
    EndpointFn { f, kind: PhantomData }
}

impl<K, F, Fut> Endpoint<K> for EndpointFn<K, F>
where
    K: CallKind,
    F: Fn(CallScope, K::Input) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome<K>> + Send + 'static,
{
    fn invoke(&self, scope: CallScope, input: K::Input) -> BoxFuture<'_, Outcome<K>> {
        Box::pin((self.f)(scope, input))
    }
}
