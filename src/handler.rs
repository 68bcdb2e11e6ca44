//! Handler traits and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* concrete types in one radix
//! tree, so each handler is hidden behind a trait object and stored
//! uniformly:
//!
//! ```text
//! async fn say_hello(scope: CallScope, req: Bytes) -> Result<Response, Status>
//!        ↓ router.unary("/helloworld.Greeter/SayHello", say_hello)
//! say_hello.into_boxed_handler()                   ← UnaryHandler blanket impl
//!        ↓
//! Arc::new(UnaryFn(say_hello))                     ← heap-allocated wrapper
//!        ↓  stored as BoxedUnaryHandler = Arc<dyn ErasedUnaryHandler>
//! handler.call(scope, req)  at call time           ← one vtable dispatch
//! ```
//!
//! Streaming handlers follow the same path with a [`ServerStream`] in place
//! of the request payload.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::response::{IntoResponse, Response};
use crate::scope::CallScope;
use crate::status::Status;
use crate::stream::ServerStream;

// ── Internal types ────────────────────────────────────────────────────────────

#[doc(hidden)]
pub trait ErasedUnaryHandler {
    fn call(&self, scope: CallScope, request: Bytes) -> BoxFuture<'static, Result<Response, Status>>;
}

#[doc(hidden)]
pub trait ErasedStreamHandler {
    fn call(&self, scope: CallScope, stream: ServerStream) -> BoxFuture<'static, Result<(), Status>>;
}

/// A type-erased unary handler shared across concurrent calls.
#[doc(hidden)]
pub type BoxedUnaryHandler = Arc<dyn ErasedUnaryHandler + Send + Sync + 'static>;

/// A type-erased streaming handler shared across concurrent calls.
#[doc(hidden)]
pub type BoxedStreamHandler = Arc<dyn ErasedStreamHandler + Send + Sync + 'static>;

// ── Public handler traits ─────────────────────────────────────────────────────

/// Implemented for every valid unary handler.
///
/// You never implement this yourself. It is satisfied by any `async fn`
/// (or closure) with the signature:
///
/// ```text
/// async fn name(scope: CallScope, request: Bytes) -> Result<impl IntoResponse, Status>
/// ```
pub trait UnaryHandler: private::SealedUnary + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedUnaryHandler;
}

/// Implemented for every valid streaming handler:
///
/// ```text
/// async fn name(scope: CallScope, stream: ServerStream) -> Result<(), Status>
/// ```
pub trait StreamHandler: private::SealedStream + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedStreamHandler;
}

mod private {
    pub trait SealedUnary {}
    pub trait SealedStream {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::SealedUnary for F
where
    F: Fn(CallScope, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Status>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> UnaryHandler for F
where
    F: Fn(CallScope, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Status>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedUnaryHandler {
        Arc::new(UnaryFn(self))
    }
}

impl<F, Fut> private::SealedStream for F
where
    F: Fn(CallScope, ServerStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
}

impl<F, Fut> StreamHandler for F
where
    F: Fn(CallScope, ServerStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedStreamHandler {
        Arc::new(StreamFn(self))
    }
}

// ── Concrete wrappers ─────────────────────────────────────────────────────────

struct UnaryFn<F>(F);

impl<F, Fut, R> ErasedUnaryHandler for UnaryFn<F>
where
    F: Fn(CallScope, Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, Status>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, scope: CallScope, request: Bytes) -> BoxFuture<'static, Result<Response, Status>> {
        let fut = (self.0)(scope, request);
        Box::pin(async move { fut.await.map(IntoResponse::into_response) })
    }
}

struct StreamFn<F>(F);

impl<F, Fut> ErasedStreamHandler for StreamFn<F>
where
    F: Fn(CallScope, ServerStream) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    fn call(&self, scope: CallScope, stream: ServerStream) -> BoxFuture<'static, Result<(), Status>> {
        Box::pin((self.0)(scope, stream))
    }
}
