//! Turns panics on the serving side into `Internal` errors.
//!
//! Without this unit a panicking handler takes down the task serving the
//! call, and the client only learns that the call ended without an answer.
//! With it, the panic is caught, reported to the sink and replaced by
//! `Internal`, so the client gets a proper status and nothing else notices.
//!
//! It must be the last listed layer so that panics raised by the other units
//! are caught too; [`ChainBuilder::build`](super::ChainBuilder::build)
//! enforces that.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::sink::{CallEvent, SharedSink, default_sink};
use super::{Middleware, Next, Outcome, Placement, ServerSide};
use crate::scope::CallScope;
use crate::status::Status;

#[derive(Clone)]
pub struct RecoverPanics {
    sink: SharedSink,
}

impl RecoverPanics {
    pub fn new() -> Self {
        Self { sink: default_sink() }
    }

    pub fn with_sink(sink: SharedSink) -> Self {
        Self { sink }
    }
}

impl Default for RecoverPanics {
    fn default() -> Self { Self::new() }
}

impl<K: ServerSide> Middleware<K> for RecoverPanics {
    fn call<'a>(&'a self, scope: CallScope, input: K::Input, next: Next<'a, K>) -> BoxFuture<'a, Outcome<K>> {
        Box::pin(async move {
            let method = scope.method().to_owned();
            // the inner call is started lazily so a unit that panics before
            // returning its future is caught as well
            let inner = AssertUnwindSafe(async move { next.run(scope, input).await });

            match inner.catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    self.sink.record(&CallEvent::Panic { method, message });
                    Err(Status::internal("something went wrong"))
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "recovery"
    }

    fn placement(&self) -> Placement {
        Placement::Outermost
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
