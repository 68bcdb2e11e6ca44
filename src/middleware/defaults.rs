//! Ready-made chains for the common case.
//!
//! | Side | Layers, innermost first |
//! |---|---|
//! | server | ([`Authenticate`]), [`Audit`], [`DetectCancellation`], [`DetectTimeout`], [`RecoverPanics`] |
//! | client | [`DetectTimeout`] |
//!
//! Every unit reports to the same sink.
//!
//! ```rust
//! use conduit::middleware::defaults::Defaults;
//! use conduit::middleware::auth::StaticCredentials;
//! use conduit::middleware::{ServerUnary, ServerStreaming};
//!
//! let defaults = Defaults::new();
//! let unary = defaults.authenticated_server::<ServerUnary, _>(StaticCredentials::new().user("alice", "123")).unwrap();
//! let stream = defaults.server::<ServerStreaming>().unwrap();
//! assert_eq!(unary.names(), ["recovery", "timeout", "canceled", "audit", "auth"]);
//! ```

use super::audit::{Audit, AuditConfig};
use super::auth::{Authenticate, CredentialVerifier};
use super::canceled::DetectCancellation;
use super::recovery::RecoverPanics;
use super::sink::{SharedSink, default_sink};
use super::timeout::DetectTimeout;
use super::{Chain, ChainBuilder, ClientSide, ServerSide};
use crate::error::Error;

#[derive(Clone)]
pub struct Defaults {
    sink: SharedSink,
    audit: AuditConfig,
}

impl Defaults {
    pub fn new() -> Self {
        Self { sink: default_sink(), audit: AuditConfig::default() }
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_audit(mut self, config: AuditConfig) -> Self {
        self.audit = config;
        self
    }

    /// Server chain without authentication.
    pub fn server<K: ServerSide>(&self) -> Result<Chain<K>, Error> {
        self.wrap_server(Chain::builder())
    }

    /// Server chain that authenticates every call with `verifier` first.
    pub fn authenticated_server<K, V>(&self, verifier: V) -> Result<Chain<K>, Error>
    where
        K: ServerSide,
        V: CredentialVerifier,
    {
        self.wrap_server(Chain::builder().layer(Authenticate::new(verifier)))
    }

    pub fn client<K: ClientSide>(&self) -> Result<Chain<K>, Error> {
        Chain::builder()
            .layer(DetectTimeout::with_sink(self.sink.clone()))
            .build()
    }

    fn wrap_server<K: ServerSide>(&self, inner: ChainBuilder<K>) -> Result<Chain<K>, Error> {
        inner
            .layer(Audit::new(self.audit.clone()).with_sink(self.sink.clone()))
            .layer(DetectCancellation::with_sink(self.sink.clone()))
            .layer(DetectTimeout::with_sink(self.sink.clone()))
            .layer(RecoverPanics::with_sink(self.sink.clone()))
            .build()
    }
}

impl Default for Defaults {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{ClientStreaming, ClientUnary, ServerStreaming, ServerUnary};

    #[test]
    fn recovery_is_entered_first() {
        let defaults = Defaults::new();
        assert_eq!(
            defaults.server::<ServerUnary>().unwrap().names(),
            ["recovery", "timeout", "canceled", "audit"],
        );
        assert_eq!(defaults.server::<ServerStreaming>().unwrap().len(), 4);
    }

    #[test]
    fn client_chains_detect_timeouts() {
        let defaults = Defaults::new();
        assert_eq!(defaults.client::<ClientUnary>().unwrap().names(), ["timeout"]);
        assert_eq!(defaults.client::<ClientStreaming>().unwrap().names(), ["timeout"]);
    }
}
