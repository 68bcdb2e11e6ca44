//! Forwards inbound headers on downstream calls.
//!
//! A service that calls other services while handling a request usually
//! wants trace and session identifiers to follow along. Build the downstream
//! scope with [`CallScope::downstream`] so it sees the inbound metadata, and
//! put [`PropagateHeaders`] in the client chain:
//!
//! ```rust
//! use conduit::middleware::{Chain, ClientUnary};
//! use conduit::middleware::propagate::PropagateHeaders;
//!
//! let chain = Chain::<ClientUnary>::builder()
//!     .layer(PropagateHeaders::only(["traceid", "session-id"]))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;

use super::{ClientSide, Middleware, Next, Outcome};
use crate::scope::CallScope;

/// Copies inbound metadata into the outbound metadata of a client call.
///
/// Values already set on the outbound side are kept; copied values are
/// appended next to them. A scope without inbound metadata passes through
/// untouched.
#[derive(Clone, Debug)]
pub struct PropagateHeaders {
    // lowercase; empty means every key
    keys: Arc<[String]>,
}

impl PropagateHeaders {
    /// Forwards every inbound key.
    pub fn all() -> Self {
        Self { keys: Arc::from(Vec::new()) }
    }

    /// Forwards only the listed keys, compared case-insensitively.
    ///
    /// An empty list forwards everything, same as [`all`](Self::all).
    pub fn only<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_ascii_lowercase()).collect();
        Self { keys: Arc::from(keys) }
    }

    fn keeps(&self, key: &str) -> bool {
        self.keys.is_empty() || self.keys.iter().any(|k| k.eq_ignore_ascii_case(key))
    }
}

impl<K: ClientSide> Middleware<K> for PropagateHeaders {
    fn call<'a>(&'a self, mut scope: CallScope, input: K::Input, next: Next<'a, K>) -> BoxFuture<'a, Outcome<K>> {
        scope.forward_inbound(|key| self.keeps(key));
        next.run(scope, input)
    }

    fn name(&self) -> &'static str {
        "propagate"
    }
}
