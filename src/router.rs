//! Radix-tree method router.
//!
//! Maps full method paths (`/package.Service/Method`) to handlers. O(path-length)
//! lookup, built once before the server starts and shared read-only across
//! every call afterwards.

use matchit::Router as MatchitRouter;

use crate::handler::{BoxedStreamHandler, BoxedUnaryHandler, StreamHandler, UnaryHandler};

/// What a method path resolves to.
#[derive(Clone)]
pub(crate) enum Route {
    Unary(BoxedUnaryHandler),
    Stream(BoxedStreamHandler),
}

/// The service registry of a [`Server`](crate::Server).
///
/// Services register their methods through a binder closure handed to
/// [`Harness::register_service`](crate::testing::Harness::register_service)
/// or [`ServerBuilder::service`](crate::ServerBuilder::service):
///
/// ```rust
/// # use bytes::Bytes;
/// # use conduit::{CallScope, Router, ServerStream, Status};
/// # async fn say_hello(_: CallScope, _: Bytes) -> Result<&'static str, Status> { Ok("hi") }
/// # async fn chat(_: CallScope, _: ServerStream) -> Result<(), Status> { Ok(()) }
/// let mut router = Router::new();
/// router
///     .unary("/helloworld.Greeter/SayHello", say_hello)
///     .stream("/helloworld.Greeter/Chat", chat);
/// ```
pub struct Router {
    routes: MatchitRouter<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: MatchitRouter::new() }
    }

    /// Registers a unary method.
    ///
    /// # Panics
    ///
    /// Panics if `method` is already registered or is not a valid path.
    pub fn unary(&mut self, method: &str, handler: impl UnaryHandler) -> &mut Self {
        self.add(method, Route::Unary(handler.into_boxed_handler()))
    }

    /// Registers a streaming method.
    ///
    /// # Panics
    ///
    /// Panics if `method` is already registered or is not a valid path.
    pub fn stream(&mut self, method: &str, handler: impl StreamHandler) -> &mut Self {
        self.add(method, Route::Stream(handler.into_boxed_handler()))
    }

    fn add(&mut self, method: &str, route: Route) -> &mut Self {
        self.routes
            .insert(method, route)
            .unwrap_or_else(|e| panic!("invalid method `{method}`: {e}"));
        self
    }

    pub(crate) fn lookup(&self, method: &str) -> Option<Route> {
        self.routes.at(method).ok().map(|matched| matched.value.clone())
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
