//! One audit record per finished call.
//!
//! Every call is recorded once it finishes, successful or not, except the
//! health check, which load balancers poll often enough to drown the log.
//! The record carries method, peer, user agents, duration and the final
//! code; its [`severity`](super::sink::AuditEntry::severity) follows the
//! code (caller mistakes are warnings, server failures are errors). A call
//! that panics is recorded as `Internal` before the panic moves on to
//! [`RecoverPanics`](super::recovery::RecoverPanics).
//!
//! List [`Audit`] after [`Authenticate`](super::auth::Authenticate) so that
//! rejected credentials are audited too.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;

use super::recovery::panic_message;
use super::sink::{AuditEntry, CallEvent, SharedSink, default_sink};
use super::{Middleware, Next, Outcome, ServerSide};
use crate::health::HEALTH_CHECK_METHOD;
use crate::scope::CallScope;
use crate::status::{Code, Status, code_of};

#[derive(Clone, Debug)]
pub struct AuditConfig {
    health_check_method: String,
}

impl AuditConfig {
    /// Method exempt from auditing. Matched exactly.
    pub fn health_check_method(mut self, method: impl Into<String>) -> Self {
        self.health_check_method = method.into();
        self
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { health_check_method: HEALTH_CHECK_METHOD.to_owned() }
    }
}

#[derive(Clone)]
pub struct Audit {
    config: Arc<AuditConfig>,
    sink: SharedSink,
}

impl Audit {
    pub fn new(config: AuditConfig) -> Self {
        Self { config: Arc::new(config), sink: default_sink() }
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }
}

impl Default for Audit {
    fn default() -> Self { Self::new(AuditConfig::default()) }
}

impl<K: ServerSide> Middleware<K> for Audit {
    fn call<'a>(&'a self, scope: CallScope, input: K::Input, next: Next<'a, K>) -> BoxFuture<'a, Outcome<K>> {
        Box::pin(async move {
            // unattributable calls are refused
            let peer = scope
                .peer()
                .ok_or_else(|| Status::invalid_argument("missing peer info"))?;
            let user_agent: Vec<String> = scope
                .inbound()
                .ok_or_else(|| Status::invalid_argument("missing metadata"))?
                .get_all("user-agent")
                .into_iter()
                .map(str::to_owned)
                .collect();

            let method = scope.method().to_owned();
            let start = Instant::now();
            // a panic is audited as Internal, then left for recovery to handle
            let result = AssertUnwindSafe(async move { next.run(scope, input).await })
                .catch_unwind()
                .await;

            if method != self.config.health_check_method {
                let (code, message) = match &result {
                    Ok(outcome) => (code_of(outcome), outcome.as_ref().err().map(|s| s.message().to_owned())),
                    Err(payload) => (Code::Internal, Some(panic_message(&**payload))),
                };
                let entry = AuditEntry { method, peer, user_agent, duration: start.elapsed(), code, message };
                self.sink.record(&CallEvent::Audit(entry));
            }
            result.unwrap_or_else(|payload| panic::resume_unwind(payload))
        })
    }

    fn name(&self) -> &'static str {
        "audit"
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use bytes::Bytes;

    use super::*;
    use crate::metadata::Metadata;
    use crate::middleware::recovery::RecoverPanics;
    use crate::middleware::{Chain, ServerUnary, endpoint_fn};
    use crate::response::Response;
    use crate::status::Severity;
    use crate::testing::MemorySink;

    fn chain(sink: &MemorySink) -> Chain<ServerUnary> {
        Chain::builder()
            .layer(Audit::default().with_sink(Arc::new(sink.clone())))
            .build()
            .unwrap()
    }

    fn scope(method: &str) -> CallScope {
        let peer: SocketAddr = "10.0.0.7:51000".parse().unwrap();
        let md = Metadata::from_pairs([("user-agent", "grpc-go/1.60"), ("user-agent", "probe/2")]).unwrap();
        CallScope::new(method).with_peer(peer).with_inbound(md)
    }

    #[tokio::test]
    async fn records_success_and_failure() {
        let sink = MemorySink::new();
        let chain = chain(&sink);

        let ok = endpoint_fn::<ServerUnary, _, _>(|_: CallScope, _: Bytes| async { Ok(Response::new("hi")) });
        chain.call(scope("/s.S/Ok"), Bytes::new(), &ok).await.unwrap();

        let fail = endpoint_fn::<ServerUnary, _, _>(|_: CallScope, _: Bytes| async {
            Err::<Response, _>(Status::internal("db down"))
        });
        chain.call(scope("/s.S/Fail"), Bytes::new(), &fail).await.unwrap_err();

        let audits = sink.audits();
        assert_eq!(audits.len(), 2);

        assert_eq!(audits[0].method, "/s.S/Ok");
        assert_eq!(audits[0].code, Code::Ok);
        assert_eq!(audits[0].severity(), Severity::Info);
        assert_eq!(audits[0].user_agent, ["grpc-go/1.60", "probe/2"]);
        assert_eq!(audits[0].message, None);

        assert_eq!(audits[1].code, Code::Internal);
        assert_eq!(audits[1].severity(), Severity::Error);
        assert_eq!(audits[1].message.as_deref(), Some("db down"));
    }

    #[tokio::test]
    async fn health_check_is_not_audited() {
        let sink = MemorySink::new();
        let ok = endpoint_fn::<ServerUnary, _, _>(|_: CallScope, _: Bytes| async { Ok(Response::new("SERVING")) });

        chain(&sink).call(scope(HEALTH_CHECK_METHOD), Bytes::new(), &ok).await.unwrap();
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn unattributable_calls_are_refused() {
        let sink = MemorySink::new();
        let ok = endpoint_fn::<ServerUnary, _, _>(|_: CallScope, _: Bytes| async { Ok(Response::default()) });

        let no_peer = CallScope::new("/s.S/M").with_inbound(Metadata::new());
        let err = chain(&sink).call(no_peer, Bytes::new(), &ok).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        let no_metadata = CallScope::new("/s.S/M").with_peer("127.0.0.1:1".parse().unwrap());
        let err = chain(&sink).call(no_metadata, Bytes::new(), &ok).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn panicking_call_is_audited_as_internal() {
        let sink = MemorySink::new();
        let chain = Chain::<ServerUnary>::builder()
            .layer(Audit::default().with_sink(Arc::new(sink.clone())))
            .layer(RecoverPanics::with_sink(Arc::new(sink.clone())))
            .build()
            .unwrap();
        let boom = endpoint_fn::<ServerUnary, _, _>(|_: CallScope, req: Bytes| async move {
            if req.is_empty() {
                panic!("handler blew up");
            }
            Ok(Response::new(req))
        });

        let err = chain.call(scope("/s.S/Boom"), Bytes::new(), &boom).await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);

        let audits = sink.audits();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].code, Code::Internal);
        assert_eq!(audits[0].severity(), Severity::Error);
        assert_eq!(audits[0].message.as_deref(), Some("handler blew up"));
        assert!(sink.events().iter().any(|e| matches!(e, CallEvent::Panic { .. })));
    }
}
